// src/services/email.rs
//! Outbound email delivery.
//!
//! The sender is injected into the password reset flow as an
//! `Arc<dyn EmailSender>`. `SesEmailSender` owns its SES client for the
//! lifetime of the process: built once by `connect`, checked by `verify`,
//! released when the last handle is dropped at shutdown.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::config::Region;
use aws_sdk_sesv2::types::{Body as SesBody, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::common::safe_email_log;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email delivery not configured: {0}")]
    NotConfigured(String),

    #[error("SES operation failed: {0}")]
    SESError(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one HTML message to a single recipient
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError>;

    /// Check that the transport can currently deliver mail
    async fn verify(&self) -> Result<(), EmailError>;
}

// ============================================================================
// Amazon SES
// ============================================================================

pub struct SesEmailSender {
    client: SesClient,
    from_email: String,
}

impl SesEmailSender {
    /// Build the SES client from the default AWS credential chain
    pub async fn connect(from_email: &str, region: &str) -> Result<Self, EmailError> {
        if from_email.is_empty() {
            return Err(EmailError::NotConfigured(
                "SES from email not configured".to_string(),
            ));
        }

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        info!(region = %region, "SES email sender initialized");

        Ok(Self {
            client: SesClient::new(&aws_config),
            from_email: from_email.to_string(),
        })
    }
}

#[async_trait]
impl EmailSender for SesEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        let destination = Destination::builder().to_addresses(to).build();

        let subject_content = Content::builder()
            .data(subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| EmailError::SESError(format!("Failed to build subject: {}", e)))?;

        let body_content = Content::builder()
            .data(html_body)
            .charset("UTF-8")
            .build()
            .map_err(|e| EmailError::SESError(format!("Failed to build body: {}", e)))?;

        let message = Message::builder()
            .subject(subject_content)
            .body(SesBody::builder().html(body_content).build())
            .build();

        let result = self
            .client
            .send_email()
            .from_email_address(&self.from_email)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, to = %safe_email_log(to), "Failed to send email via SES");
                EmailError::SESError(format!("Send failed: {}", e))
            })?;

        info!(
            to = %safe_email_log(to),
            message_id = ?result.message_id(),
            "Email sent successfully via SES"
        );

        Ok(())
    }

    async fn verify(&self) -> Result<(), EmailError> {
        self.client.get_account().send().await.map_err(|e| {
            warn!(error = %e, "SES connection check failed");
            EmailError::SESError(format!("Failed to access SES: {}", e))
        })?;

        info!("SES server is ready to take our messages");
        Ok(())
    }
}

// ============================================================================
// Development fallback
// ============================================================================

/// Writes messages to the log instead of delivering them.
/// Used when SES is not configured so reset links remain reachable locally.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        warn!(
            to = %safe_email_log(to),
            subject = %subject,
            body = %html_body,
            "Email delivery not configured; message logged instead of sent"
        );
        Ok(())
    }

    async fn verify(&self) -> Result<(), EmailError> {
        Ok(())
    }
}

// ============================================================================
// Templates
// ============================================================================

pub const RESET_PASSWORD_SUBJECT: &str = "Reset your password";

pub fn generate_reset_password_email(reset_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .header {{ background-color: #4F46E5; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 20px; background-color: #f9f9f9; }}
        .footer {{ padding: 20px; text-align: center; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Reset your password</h1>
        </div>
        <div class="content">
            <p>Click the link below to choose a new password:</p>
            <p><a href="{0}">{0}</a></p>
            <p>This link expires in 1 hour and can be used once.</p>
            <p>If you did not request a password reset, you can ignore this email.</p>
        </div>
        <div class="footer">
            <p>This is an automated message. Please do not reply directly to this email.</p>
        </div>
    </div>
</body>
</html>"#,
        reset_url
    )
}
