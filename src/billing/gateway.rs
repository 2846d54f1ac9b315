//! Payment gateway client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::common::safe_email_log;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway not configured")]
    NotConfigured,

    #[error("Payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// A checkout session created at the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub checkout_url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(
        &self,
        product_id: &str,
        success_url: &str,
        customer_email: &str,
    ) -> Result<CheckoutSession, GatewayError>;
}

#[derive(Serialize)]
struct CheckoutCustomer<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct CreateCheckoutBody<'a> {
    product_id: &'a str,
    success_url: &'a str,
    customer: CheckoutCustomer<'a>,
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    message: Option<serde_json::Value>,
}

/// Creem checkout API
pub struct CreemGateway {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CreemGateway {
    pub fn new(http: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl PaymentGateway for CreemGateway {
    async fn create_checkout(
        &self,
        product_id: &str,
        success_url: &str,
        customer_email: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        let api_key = self.api_key.as_deref().ok_or(GatewayError::NotConfigured)?;
        let url = format!("{}/v1/checkouts", self.base_url);

        debug!(
            url = %url,
            product_id = %product_id,
            success_url = %success_url,
            customer = %safe_email_log(customer_email),
            "Creating checkout session"
        );

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&CreateCheckoutBody {
                product_id,
                success_url,
                customer: CheckoutCustomer {
                    email: customer_email,
                },
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "HTTP error contacting payment gateway");
                GatewayError::Http(e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<GatewayErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .map(|m| match m {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("API error: {}", status.as_u16()));

            error!(http_status = %status, message = %message, "Payment gateway rejected checkout");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let session = resp.json::<CheckoutSession>().await?;
        info!(checkout_id = %session.id, product_id = %product_id, "Checkout session created");

        Ok(session)
    }
}
