//! Linking external provider identities to local users
//!
//! Both the user row and the provider account row are written with
//! `INSERT ... ON CONFLICT DO NOTHING` followed by a lookup, inside one
//! transaction. Concurrent sign-ins for the same email or the same
//! (provider, provider_account_id) therefore converge on a single row; the
//! unique constraints in the schema are the source of truth.

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::ProviderIdentity;
use crate::common::{
    generate_provider_account_id, generate_user_id, is_unique_violation, safe_email_log, ApiError,
};

/// Attempts before a repeated unique violation is surfaced
const MAX_LINK_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("This {provider} account is already linked to another user")]
    ProviderAccountConflict { provider: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::ProviderAccountConflict { .. } => ApiError::Conflict(e.to_string()),
            IdentityError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

/// Result of a link operation
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedIdentity {
    pub user_id: String,
    /// A new user row was created
    pub created_user: bool,
    /// A new provider account row was created
    pub linked_account: bool,
}

pub struct IdentityLinker {
    db: SqlitePool,
}

impl IdentityLinker {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Find or create the user and provider account for a verified identity.
    /// Idempotent: repeated calls return the same user id and create nothing.
    pub async fn link_or_create(
        &self,
        identity: &ProviderIdentity,
    ) -> Result<LinkedIdentity, IdentityError> {
        let mut attempt = 1;
        loop {
            match self.link_once(identity).await {
                Err(IdentityError::Database(e))
                    if is_unique_violation(&e) && attempt < MAX_LINK_ATTEMPTS =>
                {
                    // A concurrent writer won; the retry observes its row
                    debug!(
                        provider = %identity.provider,
                        attempt = attempt,
                        "Unique violation while linking identity, retrying as lookup"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn link_once(&self, identity: &ProviderIdentity) -> Result<LinkedIdentity, IdentityError> {
        let mut tx = self.db.begin().await?;

        // The first statement is a write so SQLite takes the write lock up
        // front instead of upgrading from a read lock mid-transaction.
        let created_user = sqlx::query(
            r#"
            INSERT INTO users (id, email, name, avatar)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(generate_user_id())
        .bind(&identity.email)
        .bind(identity.name.as_deref())
        .bind(identity.avatar.as_deref())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let (user_id,): (String,) = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&identity.email)
            .fetch_one(&mut *tx)
            .await?;

        let linked_account = sqlx::query(
            r#"
            INSERT INTO provider_accounts (id, user_id, provider, provider_account_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(provider, provider_account_id) DO NOTHING
            "#,
        )
        .bind(generate_provider_account_id())
        .bind(&user_id)
        .bind(&identity.provider)
        .bind(&identity.provider_account_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !linked_account {
            let (owner_id,): (String,) = sqlx::query_as(
                "SELECT user_id FROM provider_accounts WHERE provider = ? AND provider_account_id = ?",
            )
            .bind(&identity.provider)
            .bind(&identity.provider_account_id)
            .fetch_one(&mut *tx)
            .await?;

            if owner_id != user_id {
                warn!(
                    provider = %identity.provider,
                    user_id = %user_id,
                    owner_id = %owner_id,
                    "Provider account already linked to a different user"
                );
                // Dropping the transaction rolls back any user row created above
                return Err(IdentityError::ProviderAccountConflict {
                    provider: identity.provider.clone(),
                });
            }
        }

        tx.commit().await?;

        if created_user {
            info!(
                user_id = %user_id,
                email = %safe_email_log(&identity.email),
                provider = %identity.provider,
                "Creating new user account via OAuth"
            );
        } else if linked_account {
            info!(
                user_id = %user_id,
                provider = %identity.provider,
                "Linked new provider account to existing user"
            );
        } else {
            debug!(user_id = %user_id, provider = %identity.provider, "Provider account already linked");
        }

        Ok(LinkedIdentity {
            user_id,
            created_user,
            linked_account,
        })
    }
}
