//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/register` - Email and password registration
/// - `POST /api/auth/login` - Email and password sign-in
/// - `POST /api/auth/google` - Google OAuth authentication
/// - `POST /api/auth/github` - GitHub OAuth authentication
/// - `POST /api/auth/session` - Session renewal
/// - `GET /api/me` - Get current user information
/// - `POST /api/auth/forgot-password` - Request a password reset email
/// - `POST /api/auth/reset-password` - Set a new password with a reset token
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/google", post(handlers::google_auth))
        .route("/api/auth/github", post(handlers::github_auth))
        .route("/api/auth/session", post(handlers::renew_session))
        .route("/api/me", get(handlers::me_handler))
        .route("/api/auth/forgot-password", post(handlers::forgot_password))
        .route("/api/auth/reset-password", post(handlers::reset_password))
}
