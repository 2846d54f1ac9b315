//! Checkout initiation and subscription queries

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::catalog::{BillingCycle, Plan, ProductCatalog};
use super::gateway::{GatewayError, PaymentGateway};
use super::models::{Subscription, SubscriptionPeriod, SubscriptionSummary};
use crate::common::{safe_email_log, ApiError};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("plan and billingCycle are required")]
    MissingParameters,

    #[error("The free plan does not require payment")]
    FreePlan,

    #[error("Invalid plan or billing cycle")]
    UnknownPlan,

    #[error("User not found")]
    UserNotFound,

    #[error("Payment gateway unavailable: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::MissingParameters
            | PaymentError::FreePlan
            | PaymentError::UnknownPlan => ApiError::BadRequest(e.to_string()),
            PaymentError::UserNotFound => ApiError::NotFound(e.to_string()),
            PaymentError::Gateway(_) => {
                ApiError::ServiceUnavailable("Failed to create payment session".to_string())
            }
            PaymentError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

/// Resolve the requested plan and cycle against the catalog
pub fn select_product<'a>(
    catalog: &'a ProductCatalog,
    plan: Option<&str>,
    billing_cycle: Option<&str>,
) -> Result<(Plan, BillingCycle, &'a str), PaymentError> {
    let (plan, billing_cycle) = match (plan, billing_cycle) {
        (Some(p), Some(c)) if !p.is_empty() && !c.is_empty() => (p, c),
        _ => return Err(PaymentError::MissingParameters),
    };

    if plan == "free" {
        return Err(PaymentError::FreePlan);
    }

    let plan = Plan::parse(plan).ok_or(PaymentError::UnknownPlan)?;
    let cycle = BillingCycle::parse(billing_cycle).ok_or(PaymentError::UnknownPlan)?;
    let product_id = catalog
        .product_id(plan, cycle)
        .ok_or(PaymentError::UnknownPlan)?;

    Ok((plan, cycle, product_id))
}

pub struct BillingService {
    db: SqlitePool,
    catalog: Arc<ProductCatalog>,
    gateway: Arc<dyn PaymentGateway>,
}

impl BillingService {
    pub fn new(
        db: SqlitePool,
        catalog: Arc<ProductCatalog>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            catalog,
            gateway,
        }
    }

    /// Open a gateway checkout for the user and remember its id on the user
    /// row so the success callback can find them. Returns the checkout URL.
    pub async fn initiate_checkout(
        &self,
        user_id: &str,
        plan: Option<&str>,
        billing_cycle: Option<&str>,
        success_url: &str,
    ) -> Result<String, PaymentError> {
        let (plan, cycle, product_id) = select_product(&self.catalog, plan, billing_cycle)
            .map_err(|e| {
                warn!(user_id = %user_id, error = %e, "Rejected checkout request");
                e
            })?;

        let email: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        let (email,) = email.ok_or(PaymentError::UserNotFound)?;

        let session = self
            .gateway
            .create_checkout(product_id, success_url, &email)
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    user_id = %user_id,
                    email = %safe_email_log(&email),
                    "Failed to create checkout session"
                );
                e
            })?;

        sqlx::query("UPDATE users SET checkout_id = ? WHERE id = ?")
            .bind(&session.id)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        info!(
            user_id = %user_id,
            checkout_id = %session.id,
            plan = %plan.as_str(),
            billing_cycle = %cycle.as_str(),
            "Checkout session stored for user"
        );

        Ok(session.checkout_url)
    }

    /// Most recent period for the email, newest start first
    pub async fn current(&self, email: &str) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_email = ?
            ORDER BY start_date DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
    }

    pub async fn history(&self, email: &str) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_email = ?
            ORDER BY start_date DESC, created_at DESC
            "#,
        )
        .bind(email)
        .fetch_all(&self.db)
        .await
    }

    pub async fn current_summary_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionSummary>, sqlx::Error> {
        Ok(self.current(email).await?.map(|s| s.summary_at(now)))
    }

    pub async fn history_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionPeriod>, sqlx::Error> {
        Ok(self
            .history(email)
            .await?
            .iter()
            .map(|s| s.period_at(now))
            .collect())
    }
}
