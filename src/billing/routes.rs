//! Billing routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// # Routes
/// - `POST /api/create-payment` - Start a gateway checkout
/// - `GET /api/payment/success` - Gateway success callback (redirects)
/// - `GET /api/subscription` - Current subscription period
/// - `GET /api/subscription/history` - All subscription periods
pub fn billing_routes() -> Router {
    Router::new()
        .route("/api/create-payment", post(handlers::create_payment))
        .route("/api/payment/success", get(handlers::payment_success))
        .route("/api/subscription", get(handlers::current_subscription))
        .route(
            "/api/subscription/history",
            get(handlers::subscription_history),
        )
}
