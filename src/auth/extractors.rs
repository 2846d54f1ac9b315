//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::models::Claims;
use crate::common::{ApiError, AppState};

/// Authenticated user extractor
///
/// Validates the session token's signature and expiry. No store lookup:
/// handlers that need the user row load it themselves.
#[derive(Debug)]
pub struct AuthedUser {
    pub id: String,
    pub token: String,
    pub claims: Claims,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(state_lock): Extension<Arc<RwLock<AppState>>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let sessions = state_lock.read().await.sessions.clone();

        let token = match parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        {
            Some(t) => t.to_string(),
            None => {
                warn!("Authentication failed: missing Authorization header");
                return Err(ApiError::Unauthorized("missing auth".into()));
            }
        };

        // Handle "Bearer <token>" format or raw token
        let bare_token = match token.strip_prefix("Bearer ") {
            Some(rest) => rest.trim().to_string(),
            None => token,
        };

        let claims = sessions.validate(&bare_token)?;

        debug!(user_id = %claims.sub, "User authentication successful via extractor");

        Ok(AuthedUser {
            id: claims.sub.clone(),
            token: bare_token,
            claims,
        })
    }
}
