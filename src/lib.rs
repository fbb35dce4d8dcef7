//! sessionkit - access/refresh token lifecycle for account sessions
//!
//! Issues short-lived HS512 access tokens, generates opaque refresh tokens
//! and rotates them against the principal record held by an identity store.

pub mod core;

pub use crate::core::auth::{
    AccessToken, Claims, PrincipalView, SessionError, SessionGrant, SessionService, TokenError,
    TokenIssuer, TokenPair, generate_refresh_token,
};
pub use crate::core::config::{Config, ConfigError, TokenConfig};
pub use crate::core::db::{MemoryPrincipalStore, Principal, PrincipalStore, StoreError};
