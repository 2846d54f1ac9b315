//! Session token issuance and validation
//!
//! Sessions are HS256 JWTs carrying the user id. Validation only checks the
//! signature and expiry, so no store lookup happens on authenticated requests.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::models::Claims;
use crate::common::ApiError;

/// Session lifetime
pub const SESSION_MAX_AGE_DAYS: i64 = 30;
/// Sessions older than this are re-issued on renewal
pub const SESSION_UPDATE_AGE_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session signing key unavailable")]
    SigningKeyUnavailable,

    #[error("Invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::SigningKeyUnavailable => {
                error!("JWT signing key is not configured");
                ApiError::InternalServer("session signing unavailable".to_string())
            }
            SessionError::InvalidToken(_) => ApiError::Unauthorized("invalid token".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct SessionIssuer {
    secret: Option<String>,
    max_age: Duration,
    update_age: Duration,
}

impl SessionIssuer {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            max_age: Duration::days(SESSION_MAX_AGE_DAYS),
            update_age: Duration::hours(SESSION_UPDATE_AGE_HOURS),
        }
    }

    fn secret(&self) -> Result<&[u8], SessionError> {
        self.secret
            .as_deref()
            .map(str::as_bytes)
            .ok_or(SessionError::SigningKeyUnavailable)
    }

    /// Mint a session token for the user
    pub fn issue(&self, user_id: &str) -> Result<String, SessionError> {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<String, SessionError> {
        let secret = self.secret()?;
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.max_age).timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret),
        )?;

        debug!(user_id = %user_id, exp = claims.exp, "Session token issued");
        Ok(token)
    }

    /// Check signature and expiry and return the claims
    pub fn validate(&self, token: &str) -> Result<Claims, SessionError> {
        let secret = self.secret()?;
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            warn!(error = %e, "JWT token validation failed");
            SessionError::InvalidToken(e)
        })?;

        Ok(decoded.claims)
    }

    /// Re-issue the token when it was issued more than a day ago.
    /// Returns the token to use and whether it changed.
    pub fn renew(&self, token: &str) -> Result<(String, bool), SessionError> {
        self.renew_at(token, Utc::now())
    }

    pub fn renew_at(&self, token: &str, now: DateTime<Utc>) -> Result<(String, bool), SessionError> {
        let claims = self.validate(token)?;

        if now.timestamp() - claims.iat > self.update_age.num_seconds() {
            let renewed = self.issue_at(&claims.sub, now)?;
            debug!(user_id = %claims.sub, "Session token renewed");
            Ok((renewed, true))
        } else {
            Ok((token.to_string(), false))
        }
    }
}
