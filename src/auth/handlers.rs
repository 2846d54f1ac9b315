//! Authentication handlers

use axum::{
    extract::{Extension, Json},
    http::StatusCode,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::extractors::AuthedUser;
use super::identity::IdentityLinker;
use super::models::{
    AuthResponse, ForgotPasswordRequest, GithubAccessTokenPayload, GoogleIdTokenPayload,
    LoginRequest, MessageResponse, ProviderIdentity, RegisterRequest, ResetPasswordRequest, User,
    UserResponse,
};
use super::password::CredentialVerifier;
use super::providers::{verify_github_access_token, verify_google_id_token};
use super::reset::PasswordResetService;
use crate::common::{safe_email_log, ApiError, AppState, Validator};

async fn load_user(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

/// Mint a session for the user and build the standard auth response
async fn session_response(state: &AppState, user_id: &str) -> Result<AuthResponse, ApiError> {
    let user = load_user(state, user_id).await?;
    let token = state.sessions.issue(&user.id)?;
    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

async fn sign_in_with_provider(
    state: &AppState,
    identity: ProviderIdentity,
) -> Result<Json<AuthResponse>, ApiError> {
    let linked = IdentityLinker::new(state.db.clone())
        .link_or_create(&identity)
        .await?;

    info!(
        user_id = %linked.user_id,
        provider = %identity.provider,
        created_user = linked.created_user,
        "OAuth sign-in successful"
    );

    Ok(Json(session_response(state, &linked.user_id).await?))
}

/// POST /api/register
/// Creates a password-backed account and signs it in
///
/// # Request Body
/// ```json
/// {
///   "email": "user@example.com",
///   "password": "at least 8 chars",
///   "name": "Optional Name"
/// }
/// ```
pub async fn register(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let state = state_lock.read().await.clone();

    payload.validate(&payload).into_result()?;

    let email = payload.email.trim();
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let user = CredentialVerifier::new(state.db.clone())
        .register(email, &payload.password, name)
        .await?;

    let token = state.sessions.issue(&user.id)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

/// POST /api/auth/login
/// Email and password sign-in
pub async fn login(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let state = state_lock.read().await.clone();
    let email = payload.email.trim();

    debug!(email = %safe_email_log(email), "Received credential login request");

    let user_id = CredentialVerifier::new(state.db.clone())
        .verify(email, &payload.password)
        .await?;

    Ok(Json(session_response(&state, &user_id).await?))
}

/// POST /api/auth/google
/// Authenticates a user via Google OAuth ID token
///
/// # Request Body
/// ```json
/// {
///   "id_token": "<google id token>"
/// }
/// ```
///
/// # Response
/// ```json
/// {
///   "token": "<jwt token>",
///   "user": { ... }
/// }
/// ```
pub async fn google_auth(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<GoogleIdTokenPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    info!("🔐 Received Google auth request");
    let state = state_lock.read().await.clone();

    if payload.id_token.trim().is_empty() {
        return Err(ApiError::BadRequest("id_token is required".to_string()));
    }

    let identity = verify_google_id_token(
        &state.http,
        &payload.id_token,
        state.config.google_client_id.as_deref(),
    )
    .await?;

    sign_in_with_provider(&state, identity).await
}

/// POST /api/auth/github
/// Authenticates a user via a GitHub OAuth access token
pub async fn github_auth(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<GithubAccessTokenPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    info!("🔐 Received GitHub auth request");
    let state = state_lock.read().await.clone();

    if payload.access_token.trim().is_empty() {
        return Err(ApiError::BadRequest("access_token is required".to_string()));
    }

    let identity = verify_github_access_token(&state.http, &payload.access_token).await?;

    sign_in_with_provider(&state, identity).await
}

/// POST /api/auth/session
/// Returns a fresh token when the presented one is more than a day old
pub async fn renew_session(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sessions = state_lock.read().await.sessions.clone();
    let (token, renewed) = sessions.renew(&user.token)?;

    debug!(
        user_id = %user.id,
        issued_at = user.claims.iat,
        renewed = renewed,
        "Session renewal checked"
    );

    Ok(Json(json!({ "token": token, "renewed": renewed })))
}

/// GET /api/me
pub async fn me_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    user: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();
    let user = load_user(&state, &user.id).await?;
    let response: UserResponse = user.into();

    Ok(Json(json!({ "user": response })))
}

/// POST /api/auth/forgot-password
/// Issues a reset token and emails the link
pub async fn forgot_password(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let state = state_lock.read().await.clone();
    let email = payload.email.trim();

    if email.is_empty() {
        return Err(ApiError::ValidationError("email: Email is required".to_string()));
    }

    let config = state.config.clone();
    PasswordResetService::new(state.db.clone(), state.email_sender.clone())
        .issue(email, |token| config.reset_password_url(token))
        .await?;

    Ok(Json(MessageResponse::new(
        "Password reset link sent to your email",
    )))
}

/// POST /api/auth/reset-password
///
/// # Request Body
/// ```json
/// {
///   "token": "<reset token>",
///   "password": "new password"
/// }
/// ```
pub async fn reset_password(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    if payload.token.trim().is_empty() {
        warn!("Password reset attempted without token");
        return Err(ApiError::BadRequest("Invalid reset token".to_string()));
    }

    PasswordResetService::new(state.db.clone(), state.email_sender.clone())
        .consume(payload.token.trim(), &payload.password)
        .await?;

    Ok(Json(MessageResponse::new("Password has been reset")))
}
