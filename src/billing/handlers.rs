//! Billing handlers

use axum::{
    extract::{rejection::QueryRejection, Extension, Json, Query},
    response::Redirect,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::models::{CreatePaymentRequest, CreatePaymentResponse, SubscriptionPeriod, SubscriptionSummary};
use super::reconciler::{
    redirect_url, CallbackParams, ReconcileError, ReconcileOutcome, SubscriptionReconciler,
};
use super::service::BillingService;
use crate::auth::AuthedUser;
use crate::common::{ApiError, AppState};

fn billing_service(state: &AppState) -> BillingService {
    BillingService::new(
        state.db.clone(),
        state.catalog.clone(),
        state.payment_gateway.clone(),
    )
}

async fn user_email(state: &AppState, user_id: &str) -> Result<String, ApiError> {
    let email: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;
    email
        .map(|(e,)| e)
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

/// POST /api/create-payment
///
/// # Request Body
/// ```json
/// {
///   "plan": "pro",
///   "billingCycle": "yearly"
/// }
/// ```
///
/// # Response
/// ```json
/// { "url": "<gateway checkout url>" }
/// ```
pub async fn create_payment(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<CreatePaymentResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let url = billing_service(&state)
        .initiate_checkout(
            &user.id,
            payload.plan.as_deref(),
            payload.billing_cycle.as_deref(),
            &state.config.payment_callback_url(),
        )
        .await?;

    Ok(Json(CreatePaymentResponse { url }))
}

/// GET /api/payment/success
/// Gateway redirect after checkout. Always answers with a redirect.
pub async fn payment_success(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> Redirect {
    let state = state_lock.read().await.clone();
    let base_url = state.config.app_base_url.clone();

    let params = match params {
        Ok(Query(p)) => p,
        Err(e) => {
            warn!(error = %e, "Unparseable payment callback query");
            return Redirect::to(&redirect_url(
                &base_url,
                &Err(ReconcileError::MissingParameters),
            ));
        }
    };

    let reconciler = SubscriptionReconciler::new(
        state.db.clone(),
        state.catalog.clone(),
        state.config.creem_api_key.clone(),
    );

    // Detached so a client disconnect cannot abandon the write half-way
    let task = tokio::spawn(async move { reconciler.reconcile(&params).await });
    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Payment callback task failed");
            Err(ReconcileError::Processing(e.to_string()))
        }
    };

    match &result {
        Ok(ReconcileOutcome::Created(_)) => info!("Payment callback reconciled"),
        Ok(ReconcileOutcome::Duplicate) => info!("Payment callback already reconciled"),
        Err(e @ (ReconcileError::Database(_) | ReconcileError::Processing(_))) => {
            error!(error = %e, "Payment callback processing error")
        }
        Err(e) => warn!(code = e.redirect_code(), "Payment callback rejected"),
    }

    Redirect::to(&redirect_url(&base_url, &result))
}

/// GET /api/subscription
/// Latest subscription period, or `null` when the user never subscribed
pub async fn current_subscription(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
) -> Result<Json<Option<SubscriptionSummary>>, ApiError> {
    let state = state_lock.read().await.clone();
    let email = user_email(&state, &user.id).await?;

    let summary = billing_service(&state)
        .current_summary_at(&email, Utc::now())
        .await?;

    Ok(Json(summary))
}

/// GET /api/subscription/history
pub async fn subscription_history(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
) -> Result<Json<Vec<SubscriptionPeriod>>, ApiError> {
    let state = state_lock.read().await.clone();
    let email = user_email(&state, &user.id).await?;

    let periods = billing_service(&state).history_at(&email, Utc::now()).await?;

    Ok(Json(periods))
}
