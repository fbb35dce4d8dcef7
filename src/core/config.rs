//! Process configuration read once at startup.
//!
//! Call [`Config::load`] (which also reads a `.env` file when present) or
//! [`TokenConfig::from_env`] directly. Everything here is immutable after
//! construction; the signing secret is validated before any token is issued.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "postgres")]
use crate::core::db::pool::DbConfig;

/// Default access token lifetime (15 minutes)
pub const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Default refresh token lifetime (7 days)
pub const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

/// Longest accepted access token lifetime (one day)
pub const MAX_ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 24 * 60;

/// Longest accepted refresh token lifetime (one year)
pub const MAX_REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 365;

/// HS512 needs a key of at least 512 bits
pub const MIN_SECRET_BYTES: usize = 64;

const DEFAULT_ISSUER: &str = "sessionkit";
const DEFAULT_AUDIENCE: &str = "sessionkit-clients";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TOKEN_KEY environment variable not set")]
    MissingSecret,

    #[error("Signing secret is {length} bytes, at least {} are required", MIN_SECRET_BYTES)]
    WeakSecret { length: usize },

    #[error("{name} must be between 1 and {max}, got {value}")]
    InvalidLifetime {
        name: &'static str,
        value: i64,
        max: i64,
    },
}

/// Token signing and lifetime configuration
#[derive(Clone)]
pub struct TokenConfig {
    /// Symmetric secret the signing key is derived from
    pub secret: String,
    /// Access token lifetime in minutes
    pub access_token_expiration_minutes: i64,
    /// Refresh token lifetime in days
    pub refresh_token_expiration_days: i64,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
}

impl TokenConfig {
    /// Create a configuration with default lifetimes, issuer and audience
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expiration_minutes: ACCESS_TOKEN_EXPIRATION_MINUTES,
            refresh_token_expiration_days: REFRESH_TOKEN_EXPIRATION_DAYS,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// | Env Var                            | Required | Default              |
    /// |------------------------------------|----------|----------------------|
    /// | `TOKEN_KEY`                        | **yes**  | --                   |
    /// | `TOKEN_ACCESS_EXPIRATION_MINUTES`  | no       | `15`                 |
    /// | `TOKEN_REFRESH_EXPIRATION_DAYS`    | no       | `7`                  |
    /// | `TOKEN_ISSUER`                     | no       | `sessionkit`         |
    /// | `TOKEN_AUDIENCE`                   | no       | `sessionkit-clients` |
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = std::env::var("TOKEN_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        let config = Self {
            secret,
            access_token_expiration_minutes: env_or(
                "TOKEN_ACCESS_EXPIRATION_MINUTES",
                ACCESS_TOKEN_EXPIRATION_MINUTES,
            ),
            refresh_token_expiration_days: env_or(
                "TOKEN_REFRESH_EXPIRATION_DAYS",
                REFRESH_TOKEN_EXPIRATION_DAYS,
            ),
            issuer: std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string()),
            audience: std::env::var("TOKEN_AUDIENCE")
                .unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string()),
        };
        config.validate()?;

        Ok(config)
    }

    /// Check that the secret is present and strong enough for HS512 and
    /// that both lifetimes are positive and within their upper bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret {
                length: self.secret.len(),
            });
        }
        check_lifetime(
            "TOKEN_ACCESS_EXPIRATION_MINUTES",
            self.access_token_expiration_minutes,
            MAX_ACCESS_TOKEN_EXPIRATION_MINUTES,
        )?;
        check_lifetime(
            "TOKEN_REFRESH_EXPIRATION_DAYS",
            self.refresh_token_expiration_days,
            MAX_REFRESH_TOKEN_EXPIRATION_DAYS,
        )
    }

    /// Set access token lifetime
    pub fn access_token_expiration(mut self, minutes: i64) -> Self {
        self.access_token_expiration_minutes = minutes;
        self
    }

    /// Set refresh token lifetime
    pub fn refresh_token_expiration(mut self, days: i64) -> Self {
        self.refresh_token_expiration_days = days;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Set audience
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field(
                "access_token_expiration_minutes",
                &self.access_token_expiration_minutes,
            )
            .field(
                "refresh_token_expiration_days",
                &self.refresh_token_expiration_days,
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

fn check_lifetime(name: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if (1..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidLifetime { name, value, max })
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{} has invalid value {:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Token signing configuration
    pub token: TokenConfig,
    /// Postgres connection URL for the identity store, if one is used
    pub database_url: Option<String>,
}

impl Config {
    /// Load `.env` (if present) and read the configuration from the environment
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// Read the configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            token: TokenConfig::from_env()?,
            database_url: std::env::var("DATABASE_URL").ok(),
        })
    }

    /// Check if database is configured
    pub fn has_database(&self) -> bool {
        self.database_url.is_some()
    }

    /// Pool settings for the configured database
    #[cfg(feature = "postgres")]
    pub fn db_config(&self) -> Option<DbConfig> {
        self.database_url.as_ref().map(|url| DbConfig {
            database_url: url.clone(),
            ..Default::default()
        })
    }
}
