//! Credential verification and password registration

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sqlx::SqlitePool;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::models::User;
use crate::common::{generate_user_id, is_unique_violation, safe_email_log, ApiError};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Password must be at least 8 characters")]
    WeakPassword,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Password hashing failed")]
    HashingFailed,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::WeakPassword => ApiError::ValidationError(e.to_string()),
            CredentialError::InvalidCredentials | CredentialError::WrongPassword => {
                ApiError::Unauthorized("Invalid email or password".to_string())
            }
            CredentialError::EmailTaken => ApiError::Conflict(e.to_string()),
            CredentialError::HashingFailed => ApiError::InternalServer(e.to_string()),
            CredentialError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

/// Length check counted in characters, not bytes
pub fn check_password_strength(password: &str) -> Result<(), CredentialError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(CredentialError::WeakPassword);
    }
    Ok(())
}

/// Hash with Argon2id; salt and parameters are embedded in the PHC string
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "Password hashing failed");
            CredentialError::HashingFailed
        })
}

/// Returns false for a mismatch or an unparseable stored hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash could not be parsed");
            false
        }
    }
}

/// Hashing is CPU-heavy; keep it off the async workers
pub async fn hash_password_blocking(password: String) -> Result<String, CredentialError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|_| CredentialError::HashingFailed)?
}

async fn verify_password_blocking(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false)
}

/// Hash checked when there is no real one, so every login attempt that
/// passes the strength check pays for one Argon2 verification.
/// Built once with the same parameters as stored hashes.
pub fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("dummy-password-for-absent-accounts").ok())
        .as_deref()
}

async fn verify_against_dummy(password: String) {
    let _ = tokio::task::spawn_blocking(move || {
        if let Some(hash) = dummy_hash() {
            verify_password(&password, hash);
        }
    })
    .await;
}

pub struct CredentialVerifier {
    db: SqlitePool,
}

impl CredentialVerifier {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Verify an email/password pair and return the user id.
    /// No state changes on either path.
    pub async fn verify(&self, email: &str, password: &str) -> Result<String, CredentialError> {
        check_password_strength(password)?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        let user = match user {
            Some(u) => u,
            None => {
                debug!(email = %safe_email_log(email), "Login attempt for unknown email");
                verify_against_dummy(password.to_string()).await;
                return Err(CredentialError::InvalidCredentials);
            }
        };

        let hash = match user.password_hash.as_deref().filter(|h| !h.is_empty()) {
            Some(h) => h.to_string(),
            None => {
                debug!(user_id = %user.id, "Password login attempted on OAuth-only account");
                verify_against_dummy(password.to_string()).await;
                return Err(CredentialError::InvalidCredentials);
            }
        };

        if !verify_password_blocking(password.to_string(), hash).await {
            warn!(user_id = %user.id, "Login attempt with wrong password");
            return Err(CredentialError::WrongPassword);
        }

        info!(user_id = %user.id, "Credential verification successful");
        Ok(user.id)
    }

    /// Create a password-backed user. The email unique constraint decides
    /// races between concurrent registrations.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User, CredentialError> {
        check_password_strength(password)?;

        let password_hash = hash_password_blocking(password.to_string()).await?;
        let id = generate_user_id();

        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, password_hash)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(email)
        .bind(name)
        .bind(&password_hash)
        .fetch_one(&self.db)
        .await;

        match inserted {
            Ok(user) => {
                info!(
                    user_id = %user.id,
                    email = %safe_email_log(email),
                    "New user account created with password"
                );
                Ok(user)
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(email = %safe_email_log(email), "Registration for existing email");
                Err(CredentialError::EmailTaken)
            }
            Err(e) => {
                error!(error = %e, email = %safe_email_log(email), "Database error registering user");
                Err(CredentialError::Database(e))
            }
        }
    }
}
