//! Reconciliation of payment gateway success callbacks
//!
//! The gateway redirects the browser back with the checkout identifiers and
//! a signature. A verified callback becomes exactly one `subscriptions` row;
//! the `(checkout_id, subscription_id)` unique constraint makes replays of
//! the same callback harmless.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::catalog::ProductCatalog;
use super::models::Subscription;
use crate::common::{generate_subscription_id, safe_email_log, safe_token_log};

/// Query parameters appended by the gateway to the success URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub request_id: Option<String>,
    pub checkout_id: Option<String>,
    pub order_id: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub product_id: Option<String>,
    pub signature: Option<String>,
}

/// A callback with every required field present
#[derive(Debug, Clone)]
struct CompleteCallback<'a> {
    checkout_id: &'a str,
    order_id: &'a str,
    customer_id: &'a str,
    subscription_id: &'a str,
    product_id: &'a str,
    signature: &'a str,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl CallbackParams {
    fn complete(&self) -> Result<CompleteCallback<'_>, ReconcileError> {
        let signature = present(&self.signature).ok_or(ReconcileError::InvalidSignature)?;

        match (
            present(&self.checkout_id),
            present(&self.order_id),
            present(&self.customer_id),
            present(&self.subscription_id),
            present(&self.product_id),
        ) {
            (
                Some(checkout_id),
                Some(order_id),
                Some(customer_id),
                Some(subscription_id),
                Some(product_id),
            ) => Ok(CompleteCallback {
                checkout_id,
                order_id,
                customer_id,
                subscription_id,
                product_id,
                signature,
            }),
            _ => Err(ReconcileError::MissingParameters),
        }
    }

    /// Signed fields in canonical order, skipping absent ones
    fn signed_fields(&self) -> [(&'static str, Option<&str>); 6] {
        [
            ("request_id", present(&self.request_id)),
            ("checkout_id", present(&self.checkout_id)),
            ("order_id", present(&self.order_id)),
            ("customer_id", present(&self.customer_id)),
            ("subscription_id", present(&self.subscription_id)),
            ("product_id", present(&self.product_id)),
        ]
    }
}

/// SHA-256 hex of `key=value|...|salt={api_key}` over the present fields
pub fn callback_signature(params: &CallbackParams, api_key: &str) -> String {
    let data = params
        .signed_fields()
        .iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, v)))
        .chain(std::iter::once(format!("salt={}", api_key)))
        .collect::<Vec<_>>()
        .join("|");

    hex::encode(Sha256::digest(data.as_bytes()))
}

fn signature_matches(expected: &str, provided: &str) -> bool {
    let provided = provided.to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Callback signature missing or invalid")]
    InvalidSignature,

    #[error("Callback is missing required parameters")]
    MissingParameters,

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("No user holds checkout {0}")]
    UnknownCheckout(String),

    #[error("Callback processing failed: {0}")]
    Processing(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ReconcileError {
    /// Code carried on the error redirect
    pub fn redirect_code(&self) -> &'static str {
        match self {
            ReconcileError::InvalidSignature => "invalid_signature",
            ReconcileError::MissingParameters => "missing_parameters",
            ReconcileError::UnknownProduct(_) => "invalid_product",
            ReconcileError::UnknownCheckout(_) => "user_not_found",
            ReconcileError::Processing(_) | ReconcileError::Database(_) => "processing_error",
        }
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Created(Subscription),
    /// Already recorded by an earlier delivery of the same callback
    Duplicate,
}

/// Browser destination after a callback
pub fn redirect_url(app_base_url: &str, result: &Result<ReconcileOutcome, ReconcileError>) -> String {
    match result {
        Ok(_) => format!("{}/account?success=true", app_base_url),
        Err(e) => format!("{}/subscribe?error={}", app_base_url, e.redirect_code()),
    }
}

pub struct SubscriptionReconciler {
    db: SqlitePool,
    catalog: Arc<ProductCatalog>,
    api_key: Option<String>,
}

impl SubscriptionReconciler {
    pub fn new(db: SqlitePool, catalog: Arc<ProductCatalog>, api_key: Option<String>) -> Self {
        Self {
            db,
            catalog,
            api_key,
        }
    }

    pub async fn reconcile(
        &self,
        params: &CallbackParams,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile_at(params, Utc::now()).await
    }

    pub async fn reconcile_at(
        &self,
        params: &CallbackParams,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let callback = params.complete().map_err(|e| {
            warn!(
                has_signature = params.signature.is_some(),
                checkout_id = ?params.checkout_id,
                error = %e,
                "Rejecting incomplete payment callback"
            );
            e
        })?;

        // Signature check precedes every store read
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            error!("CREEM_API_KEY not configured; payment callbacks cannot be verified");
            ReconcileError::InvalidSignature
        })?;

        let expected = callback_signature(params, api_key);
        if !signature_matches(&expected, callback.signature) {
            warn!(
                checkout_id = %callback.checkout_id,
                signature = %safe_token_log(callback.signature),
                "Payment callback signature mismatch"
            );
            return Err(ReconcileError::InvalidSignature);
        }

        let (plan, cycle) = self.catalog.resolve(callback.product_id).ok_or_else(|| {
            warn!(product_id = %callback.product_id, "Payment callback for unknown product");
            ReconcileError::UnknownProduct(callback.product_id.to_string())
        })?;

        let start = now;
        let end = cycle.period_end(start).ok_or_else(|| {
            ReconcileError::Processing(format!("period end out of range for {}", start))
        })?;

        let user_email: Option<(String,)> =
            sqlx::query_as("SELECT email FROM users WHERE checkout_id = ?")
                .bind(callback.checkout_id)
                .fetch_optional(&self.db)
                .await?;

        let user_email = match user_email {
            Some((email,)) => email,
            None => {
                let recorded: Option<(String,)> = sqlx::query_as(
                    "SELECT id FROM subscriptions WHERE checkout_id = ? AND subscription_id = ?",
                )
                .bind(callback.checkout_id)
                .bind(callback.subscription_id)
                .fetch_optional(&self.db)
                .await?;

                if recorded.is_some() {
                    debug!(
                        checkout_id = %callback.checkout_id,
                        subscription_id = %callback.subscription_id,
                        "Duplicate payment callback for a detached checkout"
                    );
                    return Ok(ReconcileOutcome::Duplicate);
                }

                warn!(checkout_id = %callback.checkout_id, "No user found for payment callback");
                return Err(ReconcileError::UnknownCheckout(
                    callback.checkout_id.to_string(),
                ));
            }
        };

        // A single statement: the unique pair decides between concurrent deliveries
        let inserted = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (
                id, user_email, subscription_id, order_id, customer_id, checkout_id,
                product_id, plan, billing_cycle, status, start_date, end_date
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)
            ON CONFLICT(checkout_id, subscription_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(generate_subscription_id())
        .bind(&user_email)
        .bind(callback.subscription_id)
        .bind(callback.order_id)
        .bind(callback.customer_id)
        .bind(callback.checkout_id)
        .bind(callback.product_id)
        .bind(plan.as_str())
        .bind(cycle.as_str())
        .bind(start)
        .bind(end)
        .fetch_optional(&self.db)
        .await?;

        match inserted {
            Some(subscription) => {
                info!(
                    subscription_row = %subscription.id,
                    email = %safe_email_log(&user_email),
                    plan = %plan.as_str(),
                    billing_cycle = %cycle.as_str(),
                    end_date = %end,
                    "Subscription recorded from payment callback"
                );
                Ok(ReconcileOutcome::Created(subscription))
            }
            None => {
                debug!(
                    checkout_id = %callback.checkout_id,
                    subscription_id = %callback.subscription_id,
                    "Duplicate payment callback ignored"
                );
                Ok(ReconcileOutcome::Duplicate)
            }
        }
    }
}
