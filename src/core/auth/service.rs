//! Session service
//!
//! Owns the refresh-token protocol: starting a session after authentication,
//! exchanging a refresh token for a new token pair (rotating it), and ending
//! a session. Each principal holds at most one refresh token; starting a new
//! session or rotating overwrites the previous one.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::auth::jwt::{AccessToken, TokenError, TokenIssuer, generate_refresh_token};
use crate::core::db::models::{Principal, PrincipalView};
use crate::core::db::store::{PrincipalStore, StoreError};

/// Session service error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Unknown, expired or already rotated refresh token. The cause is
    /// deliberately not distinguished.
    #[error("Invalid or expired refresh token")]
    InvalidCredential,

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Token pair (access + refresh)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token (short-lived)
    pub access_token: String,
    /// Refresh token (long-lived, opaque)
    pub refresh_token: String,
    /// Access token expiration (Unix timestamp)
    pub access_expires_at: i64,
    /// Refresh token expiration (Unix timestamp)
    pub refresh_expires_at: Option<i64>,
    /// Token type (always "Bearer")
    pub token_type: String,
}

impl TokenPair {
    fn new(access: AccessToken, refresh_token: String, refresh_expires_at: Option<i64>) -> Self {
        Self {
            access_token: access.token,
            refresh_token,
            access_expires_at: access.expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        }
    }
}

/// Principal snapshot and credentials handed to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionGrant {
    pub principal: PrincipalView,
    pub tokens: TokenPair,
}

/// Token refresh request
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Session lifecycle over a principal store
#[derive(Clone)]
pub struct SessionService<S> {
    store: S,
    issuer: TokenIssuer,
}

impl<S: PrincipalStore> SessionService<S> {
    /// Create a new session service
    pub fn new(store: S, issuer: TokenIssuer) -> Self {
        Self { store, issuer }
    }

    /// The underlying principal store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The token issuer
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Start a session for an authenticated principal.
    ///
    /// Any refresh token the principal already had is overwritten, so a
    /// second call invalidates the first session. `principal` only receives
    /// the new session fields once they are persisted.
    pub async fn begin_session(
        &self,
        principal: &mut Principal,
    ) -> Result<SessionGrant, SessionError> {
        let roles = self.current_roles(principal).await?;
        let access = self.issuer.issue_access_token(principal, &roles)?;

        let refresh_token = generate_refresh_token();
        let refresh_expires_at = self.issuer.refresh_token_expiry(Utc::now())?;

        let mut updated = principal.clone();
        updated.refresh_token = Some(refresh_token.clone());
        updated.refresh_token_expires_at = Some(refresh_expires_at);
        self.store.persist(&updated).await?;
        *principal = updated;

        tracing::info!("Session started for principal: {}", principal.id);

        Ok(SessionGrant {
            principal: PrincipalView::from(&*principal),
            tokens: TokenPair::new(access, refresh_token, Some(refresh_expires_at.timestamp())),
        })
    }

    /// Exchange a refresh token for a new token pair, rotating the refresh
    /// token.
    ///
    /// The presented token must match the stored one exactly and must not
    /// have expired. The write re-checks both conditions, so of two
    /// concurrent exchanges of the same token only one succeeds.
    ///
    /// Everything fallible runs before the swap; once the new token is
    /// stored it is always returned to the caller.
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<SessionGrant, SessionError> {
        tracing::debug!("Refresh token exchange request");

        let now = Utc::now();
        let Some(mut principal) = self.store.find_by_refresh_token(refresh_token).await? else {
            tracing::debug!("Refresh rejected: no principal holds the token");
            return Err(SessionError::InvalidCredential);
        };

        if !principal.has_live_session(now) {
            tracing::debug!("Refresh rejected: token expired for {}", principal.id);
            return Err(SessionError::InvalidCredential);
        }

        let roles = self.current_roles(&mut principal).await?;
        let access = self.issuer.issue_access_token(&principal, &roles)?;

        let next_token = generate_refresh_token();
        let next_expires_at = self.issuer.refresh_token_expiry(now)?;

        let swapped = self
            .store
            .replace_refresh_token(principal.id, refresh_token, &next_token, next_expires_at, now)
            .await?;
        if !swapped {
            tracing::warn!(
                "Refresh rejected: token for {} was rotated concurrently",
                principal.id
            );
            return Err(SessionError::InvalidCredential);
        }

        principal.refresh_token = Some(next_token.clone());
        principal.refresh_token_expires_at = Some(next_expires_at);

        tracing::debug!("Refresh token rotated for principal: {}", principal.id);

        Ok(SessionGrant {
            principal: PrincipalView::from(&principal),
            tokens: TokenPair::new(access, next_token, Some(next_expires_at.timestamp())),
        })
    }

    /// Handle a refresh request from the transport layer
    pub async fn refresh(&self, request: RefreshRequest) -> Result<SessionGrant, SessionError> {
        self.exchange_refresh_token(&request.refresh_token).await
    }

    /// End the principal's session. Ending a session that is already gone
    /// is a no-op.
    /// The clear is always written, so a stale principal snapshot still
    /// ends whatever session the store holds.
    pub async fn end_session(&self, principal: &mut Principal) -> Result<(), SessionError> {
        let mut cleared = principal.clone();
        let had_session = cleared.clear_session();
        self.store.persist(&cleared).await?;
        *principal = cleared;

        if had_session {
            tracing::info!("Session ended for principal: {}", principal.id);
        } else {
            tracing::debug!("No active session for principal: {}", principal.id);
        }
        Ok(())
    }

    /// End the session of the principal with `id`; unknown ids are ignored
    pub async fn end_session_for(&self, id: Uuid) -> Result<(), SessionError> {
        match self.store.find_by_id(id).await? {
            Some(mut principal) => self.end_session(&mut principal).await,
            None => {
                tracing::debug!("Logout for unknown principal: {}", id);
                Ok(())
            }
        }
    }

    /// Mint an access token carrying the principal's current roles
    pub async fn issue_access_token(
        &self,
        principal: &mut Principal,
    ) -> Result<AccessToken, SessionError> {
        let roles = self.current_roles(principal).await?;
        Ok(self.issuer.issue_access_token(principal, &roles)?)
    }

    /// Fresh access token plus the refresh token already on record (empty
    /// if the principal has no session). Does not rotate anything.
    pub async fn current_session(
        &self,
        principal: &mut Principal,
    ) -> Result<SessionGrant, SessionError> {
        let access = self.issue_access_token(principal).await?;
        let refresh_token = principal.refresh_token.clone().unwrap_or_default();
        let refresh_expires_at = principal
            .refresh_token_expires_at
            .map(|expires_at| expires_at.timestamp());

        Ok(SessionGrant {
            principal: PrincipalView::from(&*principal),
            tokens: TokenPair::new(access, refresh_token, refresh_expires_at),
        })
    }

    /// Reload roles from the store and refresh the principal's snapshot
    async fn current_roles(
        &self,
        principal: &mut Principal,
    ) -> Result<BTreeSet<String>, SessionError> {
        let roles = self.store.roles(principal.id).await?;
        principal.roles = roles.clone();
        Ok(roles)
    }
}
