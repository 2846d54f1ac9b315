// src/common/config.rs
//! Environment configuration

use std::env;
use std::time::Duration;

/// Gateway product ids for each (plan, billing cycle) pair
#[derive(Debug, Clone, Default)]
pub struct ProductIds {
    pub pro_monthly: Option<String>,
    pub pro_yearly: Option<String>,
    pub business_monthly: Option<String>,
    pub business_yearly: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Public URL of the web front end; reset links and payment redirects hang off it
    pub app_base_url: String,
    pub jwt_secret: Option<String>,
    pub cors_origins: Vec<String>,
    pub google_client_id: Option<String>,
    pub creem_api_base_url: String,
    pub creem_api_key: Option<String>,
    pub product_ids: ProductIds,
    pub ses_from_email: Option<String>,
    pub ses_region: String,
    pub http_timeout: Duration,
    pub reset_db: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://saas.db".to_string(),
            port: 8080,
            app_base_url: "http://localhost:3000".to_string(),
            jwt_secret: None,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            google_client_id: None,
            creem_api_base_url: "https://api.creem.io".to_string(),
            creem_api_key: None,
            product_ids: ProductIds::default(),
            ses_from_email: None,
            ses_region: "us-east-1".to_string(),
            http_timeout: Duration::from_secs(10),
            reset_db: false,
        }
    }
}

/// Reads a variable, treating empty values as unset
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = non_empty_var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(port) = non_empty_var("PORT").and_then(|p| p.parse::<u16>().ok()) {
            config.port = port;
        }

        if let Some(base) = non_empty_var("APP_BASE_URL") {
            config.app_base_url = base.trim_end_matches('/').to_string();
        }

        config.jwt_secret = non_empty_var("JWT_SECRET");

        if let Some(origins) = non_empty_var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config.google_client_id = non_empty_var("GOOGLE_CLIENT_ID");

        if let Some(base) = non_empty_var("CREEM_API_BASE_URL") {
            config.creem_api_base_url = base.trim_end_matches('/').to_string();
        }
        config.creem_api_key = non_empty_var("CREEM_API_KEY");

        config.product_ids = ProductIds {
            pro_monthly: non_empty_var("CREEM_PRODUCT_ID_PRO_MONTHLY"),
            pro_yearly: non_empty_var("CREEM_PRODUCT_ID_PRO_YEARLY"),
            business_monthly: non_empty_var("CREEM_PRODUCT_ID_BUSINESS_MONTHLY"),
            business_yearly: non_empty_var("CREEM_PRODUCT_ID_BUSINESS_YEARLY"),
        };

        config.ses_from_email = non_empty_var("AWS_SES_FROM_EMAIL");
        if let Some(region) = non_empty_var("AWS_SES_REGION") {
            config.ses_region = region;
        }

        if let Some(secs) = non_empty_var("HTTP_TIMEOUT_SECS").and_then(|s| s.parse::<u64>().ok())
        {
            config.http_timeout = Duration::from_secs(secs);
        }

        config.reset_db = non_empty_var("RESET_DB")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        config
    }

    /// Where the payment gateway sends the browser after checkout
    pub fn payment_callback_url(&self) -> String {
        format!("{}/api/payment/success", self.app_base_url)
    }

    pub fn reset_password_url(&self, token: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.app_base_url,
            urlencoding::encode(token)
        )
    }
}
