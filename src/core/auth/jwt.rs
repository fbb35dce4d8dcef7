//! Access token issuing and refresh token generation
//!
//! Access tokens are HS512-signed JWTs carrying the principal's identity and
//! one `role` entry per role. The signing key is derived once, when the
//! [`TokenIssuer`] is built, and shared by every clone of it.
//!
//! Refresh tokens are 64 random bytes from the OS generator, base64 encoded.
//! They carry no structure and are never decoded.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::{
    ConfigError, MAX_ACCESS_TOKEN_EXPIRATION_MINUTES, MAX_REFRESH_TOKEN_EXPIRATION_DAYS,
    TokenConfig,
};
use crate::core::db::models::Principal;

/// Random bytes behind every refresh token
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Token errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Token decoding failed: {0}")]
    DecodingError(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expiry is out of range")]
    ExpiryOutOfRange,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => TokenError::InvalidToken,
            _ => TokenError::DecodingError(err.to_string()),
        }
    }
}

/// JWT claims of an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (principal ID)
    pub sub: String,
    pub email: String,
    #[serde(rename = "unique_name")]
    pub username: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
    /// One entry per role, in no particular order
    #[serde(rename = "role", default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Not before (Unix timestamp), equal to `iat`
    pub nbf: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    /// Get principal ID as UUID
    pub fn principal_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::InvalidToken)
    }

    /// Check if the token carries a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A signed access token and its validity window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Compact JWS string
    pub token: String,
    /// Issued at (Unix timestamp)
    pub issued_at: i64,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
}

struct Signer {
    config: TokenConfig,
    access_lifetime: TimeDelta,
    refresh_lifetime: TimeDelta,
    header: Header,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

/// Mints and verifies access tokens with one process-wide key
#[derive(Clone)]
pub struct TokenIssuer {
    signer: Arc<Signer>,
}

impl TokenIssuer {
    /// Validate the configuration and derive the signing key.
    ///
    /// Fails with [`ConfigError`] if the secret is missing or shorter than
    /// 512 bits; build the issuer at startup so this surfaces before any
    /// request is served.
    pub fn new(config: TokenConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let access_lifetime = TimeDelta::try_minutes(config.access_token_expiration_minutes)
            .ok_or(ConfigError::InvalidLifetime {
                name: "TOKEN_ACCESS_EXPIRATION_MINUTES",
                value: config.access_token_expiration_minutes,
                max: MAX_ACCESS_TOKEN_EXPIRATION_MINUTES,
            })?;
        let refresh_lifetime = TimeDelta::try_days(config.refresh_token_expiration_days).ok_or(
            ConfigError::InvalidLifetime {
                name: "TOKEN_REFRESH_EXPIRATION_DAYS",
                value: config.refresh_token_expiration_days,
                max: MAX_REFRESH_TOKEN_EXPIRATION_DAYS,
            },
        )?;

        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        // No clock skew allowance
        validation.leeway = 0;

        Ok(Self {
            signer: Arc::new(Signer {
                config,
                access_lifetime,
                refresh_lifetime,
                header: Header::new(Algorithm::HS512),
                encoding_key,
                decoding_key,
                validation,
            }),
        })
    }

    /// Create the issuer from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(TokenConfig::from_env()?)
    }

    /// Mint an access token for `principal` carrying `roles`.
    ///
    /// Identity fields are taken from the principal as-is; callers pass a
    /// complete record.
    pub fn issue_access_token(
        &self,
        principal: &Principal,
        roles: &BTreeSet<String>,
    ) -> Result<AccessToken, TokenError> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(self.signer.access_lifetime)
            .ok_or(TokenError::ExpiryOutOfRange)?;

        let claims = Claims {
            sub: principal.id.to_string(),
            email: principal.email.clone(),
            username: principal.username.clone(),
            display_name: principal.display_name.clone(),
            roles: roles.iter().cloned().collect(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.signer.config.issuer.clone(),
            aud: self.signer.config.audience.clone(),
        };

        let token = encode(&self.signer.header, &claims, &self.signer.encoding_key)
            .map_err(|e| TokenError::EncodingError(e.to_string()))?;

        Ok(AccessToken {
            token,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    /// Verify signature, issuer, audience and lifetime of an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data =
            decode::<Claims>(token, &self.signer.decoding_key, &self.signer.validation)?;
        Ok(token_data.claims)
    }

    /// Lifetime of newly issued access tokens
    pub fn access_token_lifetime(&self) -> TimeDelta {
        self.signer.access_lifetime
    }

    /// Lifetime of newly issued refresh tokens
    pub fn refresh_token_lifetime(&self) -> TimeDelta {
        self.signer.refresh_lifetime
    }

    /// Expiry of a refresh token issued at `issued_at`
    pub fn refresh_token_expiry(
        &self,
        issued_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TokenError> {
        issued_at
            .checked_add_signed(self.signer.refresh_lifetime)
            .ok_or(TokenError::ExpiryOutOfRange)
    }
}

/// Generate an opaque refresh token from [`REFRESH_TOKEN_BYTES`] random bytes
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str =
        "test_secret_key_for_testing_only_it_has_to_be_at_least_64_bytes!!";

    fn create_test_issuer() -> TokenIssuer {
        TokenIssuer::new(TokenConfig::new(TEST_SECRET)).unwrap()
    }

    fn test_principal() -> Principal {
        Principal::new("test@example.com", "testuser", "Test User")
    }

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    // ========================================================================
    // Construction Tests
    // ========================================================================

    #[test]
    fn test_new_rejects_missing_secret() {
        let result = TokenIssuer::new(TokenConfig::new(""));
        assert!(matches!(result, Err(ConfigError::MissingSecret)));
    }

    #[test]
    fn test_new_rejects_weak_secret() {
        let result = TokenIssuer::new(TokenConfig::new("secret_one"));
        assert!(matches!(result, Err(ConfigError::WeakSecret { .. })));
    }

    #[test]
    fn test_lifetimes_follow_config() {
        let issuer = TokenIssuer::new(
            TokenConfig::new(TEST_SECRET)
                .access_token_expiration(30)
                .refresh_token_expiration(14),
        )
        .unwrap();

        assert_eq!(issuer.access_token_lifetime(), TimeDelta::minutes(30));
        assert_eq!(issuer.refresh_token_lifetime(), TimeDelta::days(14));
    }

    #[test]
    fn test_new_rejects_out_of_range_lifetimes() {
        let result =
            TokenIssuer::new(TokenConfig::new(TEST_SECRET).access_token_expiration(i64::MAX));
        assert!(matches!(result, Err(ConfigError::InvalidLifetime { .. })));

        let config = TokenConfig::new(TEST_SECRET).refresh_token_expiration(1_000_000_000);
        let result = TokenIssuer::new(config);
        assert!(matches!(result, Err(ConfigError::InvalidLifetime { .. })));

        let result = TokenIssuer::new(TokenConfig::new(TEST_SECRET).access_token_expiration(-1));
        assert!(matches!(result, Err(ConfigError::InvalidLifetime { .. })));
    }

    #[test]
    fn test_refresh_token_expiry() {
        let issuer = create_test_issuer();
        let issued_at = Utc::now();

        let expires_at = issuer.refresh_token_expiry(issued_at).unwrap();
        assert_eq!(expires_at - issued_at, TimeDelta::days(7));

        let result = issuer.refresh_token_expiry(DateTime::<Utc>::MAX_UTC);
        assert!(matches!(result, Err(TokenError::ExpiryOutOfRange)));
    }

    // ========================================================================
    // Access Token Tests
    // ========================================================================

    #[test]
    fn test_issue_and_validate_access_token() {
        let issuer = create_test_issuer();
        let principal = test_principal();

        let access = issuer
            .issue_access_token(&principal, &roles(&["Employee", "Manager"]))
            .unwrap();
        let claims = issuer.validate_access_token(&access.token).unwrap();

        assert_eq!(claims.principal_id().unwrap(), principal.id);
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.username, "testuser");
        assert_eq!(claims.display_name, "Test User");
        assert_eq!(claims.iss, "sessionkit");
        assert_eq!(claims.aud, "sessionkit-clients");
        assert_eq!(
            claims.roles.iter().cloned().collect::<BTreeSet<_>>(),
            roles(&["Employee", "Manager"])
        );
        assert!(claims.has_role("Manager"));
        assert!(!claims.has_role("Admin"));
    }

    #[test]
    fn test_expiry_is_issued_at_plus_lifetime() {
        let issuer = TokenIssuer::new(TokenConfig::new(TEST_SECRET).access_token_expiration(20))
            .unwrap();

        let access = issuer
            .issue_access_token(&test_principal(), &BTreeSet::new())
            .unwrap();
        let claims = issuer.validate_access_token(&access.token).unwrap();

        assert_eq!(claims.exp - claims.iat, 20 * 60);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(access.issued_at, claims.iat);
        assert_eq!(access.expires_at, claims.exp);
    }

    #[test]
    fn test_default_lifetime_is_fifteen_minutes() {
        let issuer = create_test_issuer();
        let access = issuer
            .issue_access_token(&test_principal(), &BTreeSet::new())
            .unwrap();

        assert_eq!(access.expires_at - access.issued_at, 15 * 60);
    }

    #[test]
    fn test_token_uses_hs512() {
        let issuer = create_test_issuer();
        let access = issuer
            .issue_access_token(&test_principal(), &BTreeSet::new())
            .unwrap();

        let header = jsonwebtoken::decode_header(&access.token).unwrap();
        assert_eq!(header.alg, Algorithm::HS512);
    }

    #[test]
    fn test_empty_role_set_has_no_role_claim() {
        let issuer = create_test_issuer();
        let access = issuer
            .issue_access_token(&test_principal(), &BTreeSet::new())
            .unwrap();

        let claims = issuer.validate_access_token(&access.token).unwrap();
        assert!(claims.roles.is_empty());

        let json = serde_json::to_string(&claims).unwrap();
        assert!(!json.contains("\"role\""));
    }

    #[test]
    fn test_claim_names() {
        let issuer = create_test_issuer();
        let access = issuer
            .issue_access_token(&test_principal(), &roles(&["Admin"]))
            .unwrap();
        let claims = issuer.validate_access_token(&access.token).unwrap();

        let json: serde_json::Value = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["unique_name"], "testuser");
        assert_eq!(json["DisplayName"], "Test User");
        assert_eq!(json["role"], serde_json::json!(["Admin"]));
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let issuer_a = create_test_issuer();
        let issuer_b = TokenIssuer::new(TokenConfig::new(TEST_SECRET.replace('!', "?"))).unwrap();

        let access = issuer_a
            .issue_access_token(&test_principal(), &BTreeSet::new())
            .unwrap();

        let result = issuer_b.validate_access_token(&access.token);
        assert!(matches!(result, Err(TokenError::InvalidToken)));
    }

    #[test]
    fn test_validate_token_wrong_audience() {
        let issuer_a = create_test_issuer();
        let issuer_b =
            TokenIssuer::new(TokenConfig::new(TEST_SECRET).audience("someone-else")).unwrap();

        let access = issuer_a
            .issue_access_token(&test_principal(), &BTreeSet::new())
            .unwrap();

        let result = issuer_b.validate_access_token(&access.token);
        assert!(matches!(result, Err(TokenError::InvalidToken)));
    }

    #[test]
    fn test_validate_invalid_token() {
        let issuer = create_test_issuer();
        let result = issuer.validate_access_token("invalid.token.here");
        assert!(result.is_err());
    }

    #[test]
    fn test_expired_token() {
        let issuer = create_test_issuer();
        let issued = Utc::now() - TimeDelta::minutes(20);
        let claims = Claims {
            sub: test_principal().id.to_string(),
            email: "test@example.com".to_string(),
            username: "testuser".to_string(),
            display_name: "Test User".to_string(),
            roles: Vec::new(),
            iat: issued.timestamp(),
            nbf: issued.timestamp(),
            exp: (issued + TimeDelta::minutes(15)).timestamp(),
            iss: "sessionkit".to_string(),
            aud: "sessionkit-clients".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();

        let result = issuer.validate_access_token(&token);
        assert!(
            matches!(result, Err(TokenError::Expired)),
            "Expected Expired error, got: {:?}",
            result
        );
    }

    #[test]
    fn test_issuer_shared_across_threads() {
        let issuer = create_test_issuer();
        let principal = test_principal();

        let tokens: Vec<AccessToken> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let issuer = issuer.clone();
                    let principal = &principal;
                    scope.spawn(move || {
                        issuer
                            .issue_access_token(principal, &roles(&["Employee"]))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for access in tokens {
            let claims = issuer.validate_access_token(&access.token).unwrap();
            assert_eq!(claims.principal_id().unwrap(), principal.id);
        }
    }

    // ========================================================================
    // Refresh Token Tests
    // ========================================================================

    #[test]
    fn test_refresh_token_is_64_random_bytes() {
        let token = generate_refresh_token();
        let decoded = STANDARD.decode(&token).unwrap();
        assert_eq!(decoded.len(), REFRESH_TOKEN_BYTES);
    }

    #[test]
    fn test_refresh_tokens_differ() {
        let first = generate_refresh_token();
        let second = generate_refresh_token();
        assert_ne!(first, second);
    }

    // ========================================================================
    // Error Tests
    // ========================================================================

    #[test]
    fn test_token_error_display() {
        assert_eq!(TokenError::Expired.to_string(), "Token expired");
        assert_eq!(TokenError::InvalidToken.to_string(), "Invalid token");
    }

    #[test]
    fn test_access_token_serialization() {
        let access = AccessToken {
            token: "header.payload.signature".to_string(),
            issued_at: 1_700_000_000,
            expires_at: 1_700_000_900,
        };

        let json = serde_json::to_string(&access).unwrap();
        assert!(json.contains("header.payload.signature"));
        assert!(json.contains("1700000900"));
    }
}
