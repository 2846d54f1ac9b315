//! # Billing Module
//!
//! Paid plans and the payment gateway round trip:
//! - Product catalog mapping plans and billing cycles to gateway products
//! - Checkout initiation through the `PaymentGateway` trait
//! - Reconciliation of gateway success callbacks into subscription periods
//! - Current subscription and history queries

pub mod catalog;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod reconciler;
pub mod routes;
pub mod service;


pub use routes::billing_routes;
