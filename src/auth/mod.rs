//! # Auth Module
//!
//! This module handles all authentication-related functionality including:
//! - Email/password registration and credential verification
//! - Google and GitHub OAuth sign-in with identity linking
//! - Single-use password reset tokens
//! - JWT session issuance, validation and renewal
//! - AuthedUser extractor for protected routes

pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod password;
pub mod providers;
pub mod reset;
pub mod routes;
pub mod session;

#[cfg(test)]
mod tests;

pub use extractors::AuthedUser;
pub use routes::auth_routes;
