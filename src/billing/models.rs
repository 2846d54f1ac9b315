//! Billing data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Subscription database model. One row per paid period.
#[derive(FromRow, Serialize, Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub user_email: String,
    pub subscription_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub checkout_id: String,
    pub product_id: String,
    pub plan: String,
    pub billing_cycle: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Stored status, or `expired` once the period has ended
    pub fn effective_status_at(&self, now: DateTime<Utc>) -> &str {
        if self.status == "active" && now > self.end_date {
            "expired"
        } else {
            &self.status
        }
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> SubscriptionSummary {
        SubscriptionSummary {
            status: self.effective_status_at(now).to_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            product_id: self.product_id.clone(),
        }
    }

    pub fn period_at(&self, now: DateTime<Utc>) -> SubscriptionPeriod {
        SubscriptionPeriod {
            id: self.id.clone(),
            plan: self.plan.clone(),
            billing_cycle: self.billing_cycle.clone(),
            status: self.effective_status_at(now).to_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            product_id: self.product_id.clone(),
            subscription_id: self.subscription_id.clone(),
        }
    }
}

/// Response body of `GET /api/subscription`
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub product_id: String,
}

/// One entry of `GET /api/subscription/history`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPeriod {
    pub id: String,
    pub plan: String,
    pub billing_cycle: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub product_id: String,
    pub subscription_id: String,
}

#[derive(Deserialize, Debug)]
pub struct CreatePaymentRequest {
    pub plan: Option<String>,
    #[serde(rename = "billingCycle")]
    pub billing_cycle: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct CreatePaymentResponse {
    pub url: String,
}
