//! Principal model
//!
//! The principal record is owned by the identity store. Session code only
//! reads it and overwrites the two refresh-token fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An account the session core operates against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub roles: BTreeSet<String>,
    /// Current refresh token, `None` when no session is active
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Create a principal with a fresh id, no roles and no session
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: username.into(),
            display_name: display_name.into(),
            avatar_url: None,
            roles: BTreeSet::new(),
            refresh_token: None,
            refresh_token_expires_at: None,
        }
    }

    /// Add a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// Set avatar
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// Whether a refresh token is stored and not yet expired at `now`
    pub fn has_live_session(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some()
            && self
                .refresh_token_expires_at
                .is_some_and(|expires_at| expires_at > now)
    }

    /// Drop the stored refresh token. Returns `false` if there was none.
    pub(crate) fn clear_session(&mut self) -> bool {
        let had_session =
            self.refresh_token.is_some() || self.refresh_token_expires_at.is_some();
        self.refresh_token = None;
        self.refresh_token_expires_at = None;
        had_session
    }
}

/// Principal data for creation
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrincipal {
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Principal without session data (for API responses)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalView {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub roles: Vec<String>,
}

impl From<&Principal> for PrincipalView {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            email: principal.email.clone(),
            username: principal.username.clone(),
            display_name: principal.display_name.clone(),
            avatar_url: principal.avatar_url.clone(),
            roles: principal.roles.iter().cloned().collect(),
        }
    }
}

/// Row shape of the principal queries; roles are aggregated into an array
#[cfg(feature = "postgres")]
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PrincipalRow {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub roles: Vec<String>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "postgres")]
impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            roles: row.roles.into_iter().collect(),
            refresh_token: row.refresh_token,
            refresh_token_expires_at: row.refresh_token_expires_at,
        }
    }
}
