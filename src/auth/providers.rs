//! Verification of OAuth provider credentials
//!
//! Each function turns a client-supplied provider credential into a
//! `ProviderIdentity` only after the provider itself vouches for it.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::models::ProviderIdentity;
use crate::common::{safe_email_log, ApiError};

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Malformed(msg) => ApiError::BadRequest(msg),
            ProviderError::Rejected(msg) => ApiError::Unauthorized(msg),
            ProviderError::Unavailable(msg) => ApiError::ServiceUnavailable(msg),
        }
    }
}

/// Relevant fields of Google's tokeninfo response
#[derive(Debug, Deserialize)]
pub struct GoogleTokenInfo {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub email_verified: Option<serde_json::Value>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub aud: Option<String>,
    pub exp: Option<serde_json::Value>,
}

/// tokeninfo encodes booleans and numbers as strings
fn json_bool(value: &Option<serde_json::Value>) -> Option<bool> {
    match value {
        Some(serde_json::Value::Bool(b)) => Some(*b),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn json_i64(value: &Option<serde_json::Value>) -> Option<i64> {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn require_client_id(expected_audience: Option<&str>) -> Result<&str, ProviderError> {
    expected_audience.filter(|id| !id.is_empty()).ok_or_else(|| {
        error!("GOOGLE_CLIENT_ID not configured; Google sign-in is disabled");
        ProviderError::Unavailable("google sign-in is not configured".to_string())
    })
}

/// Check the claims of a Google ID token. Without a configured client id
/// every token is refused.
pub fn check_google_token_info(
    info: GoogleTokenInfo,
    expected_audience: Option<&str>,
) -> Result<ProviderIdentity, ProviderError> {
    let client_id = require_client_id(expected_audience)?;

    let (email, sub) = match (info.email.clone(), info.sub.clone()) {
        (Some(email), Some(sub)) if !email.is_empty() && !sub.is_empty() => (email, sub),
        _ => {
            warn!(
                has_email = info.email.is_some(),
                has_sub = info.sub.is_some(),
                "Google token missing required fields (email/sub)"
            );
            return Err(ProviderError::Malformed(
                "token missing required fields".to_string(),
            ));
        }
    };

    if json_bool(&info.email_verified) != Some(true) {
        warn!(
            email = %safe_email_log(&email),
            email_verified = ?info.email_verified,
            "Google token does not assert a verified email address"
        );
        return Err(ProviderError::Rejected("email address not verified".to_string()));
    }

    if let Some(exp) = json_i64(&info.exp) {
        let current_time = Utc::now().timestamp();
        if exp < current_time {
            warn!(token_exp = exp, current_time = current_time, "Google token has expired");
            return Err(ProviderError::Rejected("token has expired".to_string()));
        }
    }

    match info.aud.as_deref() {
        Some(aud) if aud == client_id => {
            debug!(token_audience = %aud, "Google token audience validation successful");
        }
        Some(aud) => {
            warn!(
                token_audience = %aud,
                expected_client_id = %client_id,
                "Google token audience validation failed - rejecting token"
            );
            return Err(ProviderError::Rejected("token audience mismatch".to_string()));
        }
        None => {
            warn!(expected_client_id = %client_id, "Google token missing audience field");
            return Err(ProviderError::Rejected("token missing audience".to_string()));
        }
    }

    Ok(ProviderIdentity {
        provider: "google".to_string(),
        provider_account_id: sub,
        email,
        name: info.name,
        avatar: info.picture,
    })
}

/// Validate a Google ID token with Google's tokeninfo endpoint
/// Docs: https://developers.google.com/identity/sign-in/web/backend-auth
pub async fn verify_google_id_token(
    http: &Client,
    id_token: &str,
    expected_audience: Option<&str>,
) -> Result<ProviderIdentity, ProviderError> {
    // Refused before any network call
    require_client_id(expected_audience)?;

    debug!("Initiating Google token validation with tokeninfo endpoint");

    let resp = http
        .get(GOOGLE_TOKENINFO_URL)
        .query(&[("id_token", id_token)])
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, endpoint = GOOGLE_TOKENINFO_URL, "HTTP error contacting Google tokeninfo endpoint");
            ProviderError::Unavailable("google token validation service unavailable".to_string())
        })?;

    let status = resp.status();
    if !status.is_success() {
        warn!(http_status = %status, "Google tokeninfo returned error status");
        return Err(match status {
            StatusCode::BAD_REQUEST => {
                ProviderError::Malformed("invalid or malformed id_token".to_string())
            }
            StatusCode::UNAUTHORIZED => {
                ProviderError::Rejected("expired or invalid id_token".to_string())
            }
            _ => ProviderError::Malformed("id_token validation failed".to_string()),
        });
    }

    let info = resp.json::<GoogleTokenInfo>().await.map_err(|e| {
        error!(error = %e, "Failed to parse Google tokeninfo JSON response");
        ProviderError::Malformed("malformed id_token".to_string())
    })?;

    check_google_token_info(info, expected_audience)
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GithubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// The primary address, and only if GitHub has verified it
pub fn primary_verified_email(emails: &[GithubEmail]) -> Option<&str> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email.as_str())
}

async fn github_get<T: serde::de::DeserializeOwned>(
    http: &Client,
    access_token: &str,
    path: &str,
) -> Result<T, ProviderError> {
    let url = format!("{}{}", GITHUB_API_URL, path);
    let resp = http
        .get(&url)
        .bearer_auth(access_token)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .header(reqwest::header::USER_AGENT, "entitlements-api")
        .send()
        .await
        .map_err(|e| {
            error!(error = %e, endpoint = %url, "HTTP error contacting GitHub API");
            ProviderError::Unavailable("github api unavailable".to_string())
        })?;

    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!(http_status = %status, "GitHub rejected access token");
        return Err(ProviderError::Rejected("invalid github access token".to_string()));
    }
    if !status.is_success() {
        warn!(http_status = %status, endpoint = %url, "GitHub API returned error status");
        return Err(ProviderError::Unavailable("github api error".to_string()));
    }

    resp.json::<T>().await.map_err(|e| {
        error!(error = %e, endpoint = %url, "Failed to parse GitHub API response");
        ProviderError::Unavailable("unexpected github api response".to_string())
    })
}

/// Resolve a GitHub OAuth access token to the account and its verified email
pub async fn verify_github_access_token(
    http: &Client,
    access_token: &str,
) -> Result<ProviderIdentity, ProviderError> {
    let user: GithubUser = github_get(http, access_token, "/user").await?;
    let emails: Vec<GithubEmail> = github_get(http, access_token, "/user/emails").await?;

    let email = primary_verified_email(&emails).ok_or_else(|| {
        warn!(github_login = %user.login, "GitHub account has no verified primary email");
        ProviderError::Rejected("github account has no verified primary email".to_string())
    })?;

    Ok(ProviderIdentity {
        provider: "github".to_string(),
        provider_account_id: user.id.to_string(),
        email: email.to_string(),
        name: user.name.or(Some(user.login)),
        avatar: user.avatar_url,
    })
}
