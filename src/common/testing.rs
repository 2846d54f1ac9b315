//! Fakes and state builders shared by the test modules

use async_trait::async_trait;
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::auth::session::SessionIssuer;
use crate::billing::catalog::ProductCatalog;
use crate::billing::gateway::{CheckoutSession, GatewayError, PaymentGateway};
use crate::common::config::{AppConfig, ProductIds};
use crate::common::AppState;
use crate::services::email::{EmailError, EmailSender};

pub const TEST_JWT_SECRET: &str = "test_secret_key";
pub const TEST_CREEM_API_KEY: &str = "creem_test_key";

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Records every message instead of delivering it
#[derive(Default)]
pub struct RecordingEmailSender {
    pub sent: Mutex<Vec<SentEmail>>,
}

impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }

    async fn verify(&self) -> Result<(), EmailError> {
        Ok(())
    }
}

/// Rejects every message
pub struct FailingEmailSender;

#[async_trait]
impl EmailSender for FailingEmailSender {
    async fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), EmailError> {
        Err(EmailError::SESError("Send failed: connection refused".to_string()))
    }

    async fn verify(&self) -> Result<(), EmailError> {
        Err(EmailError::SESError("unreachable".to_string()))
    }
}

/// Hands out sequential checkout ids and records requests
#[derive(Default)]
pub struct FakeGateway {
    pub requests: Mutex<Vec<(String, String, String)>>,
    pub fail: bool,
}

impl FakeGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout(
        &self,
        product_id: &str,
        success_url: &str,
        customer_email: &str,
    ) -> Result<CheckoutSession, GatewayError> {
        if self.fail {
            return Err(GatewayError::Rejected {
                status: 500,
                message: "gateway down".to_string(),
            });
        }

        let mut requests = self.requests.lock().unwrap();
        requests.push((
            product_id.to_string(),
            success_url.to_string(),
            customer_email.to_string(),
        ));
        let id = format!("CK{}", requests.len());

        Ok(CheckoutSession {
            checkout_url: format!("https://pay.example.com/{}", id),
            id,
        })
    }
}

pub fn test_product_ids() -> ProductIds {
    ProductIds {
        pro_monthly: Some("prod_pro_monthly".to_string()),
        pro_yearly: Some("prod_pro_yearly".to_string()),
        business_monthly: Some("prod_business_monthly".to_string()),
        business_yearly: Some("prod_business_yearly".to_string()),
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        app_base_url: "https://app.example.com".to_string(),
        jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        creem_api_key: Some(TEST_CREEM_API_KEY.to_string()),
        product_ids: test_product_ids(),
        ..AppConfig::default()
    }
}

pub fn test_state(
    db: SqlitePool,
    email_sender: Arc<dyn EmailSender>,
    payment_gateway: Arc<dyn PaymentGateway>,
) -> AppState {
    let config = test_config();
    AppState {
        db,
        http: Client::new(),
        sessions: Arc::new(SessionIssuer::new(config.jwt_secret.clone())),
        email_sender,
        payment_gateway,
        catalog: Arc::new(ProductCatalog::from_product_ids(&config.product_ids)),
        config: Arc::new(config),
    }
}

pub fn shared(state: AppState) -> Arc<RwLock<AppState>> {
    Arc::new(RwLock::new(state))
}

/// Insert a user row directly, optionally with a password hash and checkout id
pub async fn insert_user(
    db: &SqlitePool,
    id: &str,
    email: &str,
    password_hash: Option<&str>,
    checkout_id: Option<&str>,
) {
    sqlx::query("INSERT INTO users (id, email, password_hash, checkout_id) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .bind(checkout_id)
        .execute(db)
        .await
        .unwrap();
}

pub async fn count_rows(db: &SqlitePool, table: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(db)
        .await
        .unwrap();
    count
}
