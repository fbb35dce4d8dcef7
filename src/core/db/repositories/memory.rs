//! In-memory principal store
//!
//! Backed by a [`DashMap`]; the per-entry lock makes the refresh-token
//! compare-and-swap atomic. Suitable for tests and single-process embedders.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::core::db::models::Principal;
use crate::core::db::store::{PrincipalStore, StoreError};

/// Principal store held in process memory
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    principals: DashMap<Uuid, Principal>,
    // Serializes inserts so the uniqueness scan and the insert are one step
    insert_lock: Mutex<()>,
}

impl MemoryPrincipalStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new principal, enforcing unique email and username
    pub fn insert(&self, principal: Principal) -> Result<(), StoreError> {
        let _guard = self
            .insert_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("insert lock poisoned".to_string()))?;

        for entry in self.principals.iter() {
            if entry.email.eq_ignore_ascii_case(&principal.email) {
                return Err(StoreError::EmailAlreadyExists);
            }
            if entry.username == principal.username {
                return Err(StoreError::UsernameAlreadyExists);
            }
        }
        self.principals.insert(principal.id, principal);
        Ok(())
    }

    /// Grant a role. Returns `false` if the principal already had it.
    pub fn add_role(&self, id: Uuid, role: impl Into<String>) -> Result<bool, StoreError> {
        let mut principal = self.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
        Ok(principal.roles.insert(role.into()))
    }

    /// Revoke a role. Returns `false` if the principal did not have it.
    pub fn remove_role(&self, id: Uuid, role: &str) -> Result<bool, StoreError> {
        let mut principal = self.principals.get_mut(&id).ok_or(StoreError::NotFound)?;
        Ok(principal.roles.remove(role))
    }

    /// Number of stored principals
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

#[async_trait::async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .principals
            .iter()
            .find(|entry| entry.refresh_token.as_deref() == Some(token))
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Principal>, StoreError> {
        Ok(self.principals.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .principals
            .iter()
            .find(|entry| entry.email.eq_ignore_ascii_case(email))
            .map(|entry| entry.value().clone()))
    }

    async fn roles(&self, id: Uuid) -> Result<BTreeSet<String>, StoreError> {
        self.principals
            .get(&id)
            .map(|entry| entry.roles.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn persist(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut stored = self
            .principals
            .get_mut(&principal.id)
            .ok_or(StoreError::NotFound)?;

        stored.email = principal.email.clone();
        stored.username = principal.username.clone();
        stored.display_name = principal.display_name.clone();
        stored.avatar_url = principal.avatar_url.clone();
        stored.refresh_token = principal.refresh_token.clone();
        stored.refresh_token_expires_at = principal.refresh_token_expires_at;
        Ok(())
    }

    async fn replace_refresh_token(
        &self,
        id: Uuid,
        expected: &str,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut stored) = self.principals.get_mut(&id) else {
            return Ok(false);
        };

        if stored.refresh_token.as_deref() != Some(expected) || !stored.has_live_session(now) {
            return Ok(false);
        }

        stored.refresh_token = Some(token.to_string());
        stored.refresh_token_expires_at = Some(expires_at);
        Ok(true)
    }
}
