//! Session tokens
//!
//! - [`jwt`] -- access token issuing/verification and refresh token generation.
//! - [`service`] -- session start, refresh token rotation and logout.

pub mod jwt;
pub mod service;

pub use crate::core::db::models::PrincipalView;
pub use jwt::{AccessToken, Claims, TokenError, TokenIssuer, generate_refresh_token};
pub use service::{RefreshRequest, SessionError, SessionGrant, SessionService, TokenPair};
