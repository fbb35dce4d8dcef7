//! The identity-store seam the session core depends on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::db::models::Principal;

/// Identity store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Principal not found")]
    NotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Username already exists")]
    UsernameAlreadyExists,

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Storage of principal records and their session fields.
///
/// Errors are returned as-is to the caller; implementations own any retry
/// policy.
#[async_trait::async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Find the principal whose stored refresh token equals `token` exactly
    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Principal>, StoreError>;

    /// Find a principal by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError>;

    /// Find a principal by email
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    /// Current role names of a principal
    async fn roles(&self, id: Uuid) -> Result<BTreeSet<String>, StoreError>;

    /// Write the principal's profile and session fields. Roles are managed
    /// separately and are not written.
    async fn persist(&self, principal: &Principal) -> Result<(), StoreError>;

    /// Replace the refresh token of `id` only if it still equals `expected`
    /// and has not expired at `now`. Returns `false` when the condition no
    /// longer holds; nothing is written in that case.
    async fn replace_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert_eq!(StoreError::NotFound.to_string(), "Principal not found");
        assert_eq!(
            StoreError::EmailAlreadyExists.to_string(),
            "Email already exists"
        );
        assert_eq!(
            StoreError::Unavailable("connection reset".to_string()).to_string(),
            "Store unavailable: connection reset"
        );
    }
}
