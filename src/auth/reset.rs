//! Single-use password reset tokens

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::password::{check_password_strength, hash_password_blocking, CredentialError};
use crate::common::{safe_email_log, safe_token_log, ApiError};
use crate::services::email::{
    generate_reset_password_email, EmailError, EmailSender, RESET_PASSWORD_SUBJECT,
};

pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;
/// 256 bits of entropy, hex-encoded to 64 characters
const RESET_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("No account is registered with this email")]
    UnknownEmail,

    #[error("Invalid reset token")]
    InvalidToken,

    #[error("Reset token has expired")]
    ExpiredToken,

    #[error("Password must be at least 8 characters")]
    WeakPassword,

    #[error("Failed to deliver reset email: {0}")]
    DeliveryFailed(#[source] EmailError),

    #[error("Password hashing failed")]
    HashingFailed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CredentialError> for ResetError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::WeakPassword => ResetError::WeakPassword,
            CredentialError::Database(e) => ResetError::Database(e),
            _ => ResetError::HashingFailed,
        }
    }
}

impl From<ResetError> for ApiError {
    fn from(e: ResetError) -> Self {
        match e {
            ResetError::UnknownEmail => ApiError::NotFound(e.to_string()),
            ResetError::InvalidToken | ResetError::ExpiredToken => {
                ApiError::BadRequest(e.to_string())
            }
            ResetError::WeakPassword => ApiError::ValidationError(e.to_string()),
            ResetError::DeliveryFailed(_) => ApiError::ServiceUnavailable(
                "Failed to send the password reset email".to_string(),
            ),
            ResetError::HashingFailed => ApiError::InternalServer(e.to_string()),
            ResetError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct PasswordResetService {
    db: SqlitePool,
    email_sender: Arc<dyn EmailSender>,
}

impl PasswordResetService {
    pub fn new(db: SqlitePool, email_sender: Arc<dyn EmailSender>) -> Self {
        Self { db, email_sender }
    }

    /// Issue a token and email the reset link built by `reset_url`.
    ///
    /// A delivery failure is reported as `DeliveryFailed`, but the token stays
    /// valid so the user can simply ask again.
    pub async fn issue(
        &self,
        email: &str,
        reset_url: impl Fn(&str) -> String,
    ) -> Result<String, ResetError> {
        let token = self.create_token_at(email, Utc::now()).await?;

        let html = generate_reset_password_email(&reset_url(&token));
        if let Err(e) = self
            .email_sender
            .send(email, RESET_PASSWORD_SUBJECT, &html)
            .await
        {
            error!(
                error = %e,
                email = %safe_email_log(email),
                "Reset token issued but email delivery failed"
            );
            return Err(ResetError::DeliveryFailed(e));
        }

        info!(email = %safe_email_log(email), "Password reset email sent");
        Ok(token)
    }

    /// Store a fresh token for the email. Outstanding tokens for the same
    /// email are invalidated and expired tokens are purged in the same
    /// transaction.
    pub async fn create_token_at(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ResetError> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        if exists.is_none() {
            debug!(email = %safe_email_log(email), "Password reset requested for unknown email");
            return Err(ResetError::UnknownEmail);
        }

        let token = generate_reset_token();
        let expires_at = now + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

        let mut tx = self.db.begin().await?;

        let removed = sqlx::query("DELETE FROM reset_tokens WHERE identifier = ? OR expires_at < ?")
            .bind(email)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            "INSERT INTO reset_tokens (token, identifier, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&token)
        .bind(email)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            email = %safe_email_log(email),
            token = %safe_token_log(&token),
            removed_tokens = removed,
            expires_at = %expires_at,
            "Password reset token issued"
        );

        Ok(token)
    }

    /// Set a new password using a token. The token is gone afterwards.
    pub async fn consume(&self, token: &str, new_password: &str) -> Result<(), ResetError> {
        self.consume_at(token, new_password, Utc::now()).await
    }

    pub async fn consume_at(
        &self,
        token: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ResetError> {
        check_password_strength(new_password)?;

        // Unknown tokens are turned away before paying for a hash
        let known: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM reset_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.db)
            .await?;
        if known.is_none() {
            warn!(token = %safe_token_log(token), "Password reset with unknown token");
            return Err(ResetError::InvalidToken);
        }

        // Hash before opening the transaction so the write lock is held briefly
        let password_hash = hash_password_blocking(new_password.to_string()).await?;

        let mut tx = self.db.begin().await?;

        // Deleting first claims the token: a concurrent consume deletes nothing.
        // This, not the lookup above, decides who wins.
        let claimed: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            "DELETE FROM reset_tokens WHERE token = ? RETURNING identifier, expires_at",
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let (identifier, expires_at) = match claimed {
            Some(row) => row,
            None => {
                warn!(token = %safe_token_log(token), "Password reset token already claimed");
                return Err(ResetError::InvalidToken);
            }
        };

        if now > expires_at {
            // Keep the deletion; the expired row is useless
            tx.commit().await?;
            warn!(
                email = %safe_email_log(&identifier),
                expired_at = %expires_at,
                "Password reset with expired token"
            );
            return Err(ResetError::ExpiredToken);
        }

        let updated = sqlx::query("UPDATE users SET password_hash = ? WHERE email = ?")
            .bind(&password_hash)
            .bind(&identifier)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            // The account behind the token is gone; roll back and reject
            warn!(email = %safe_email_log(&identifier), "Reset token refers to a missing user");
            return Err(ResetError::InvalidToken);
        }

        tx.commit().await?;

        info!(email = %safe_email_log(&identifier), "Password reset completed");
        Ok(())
    }
}
