//! Registered credentials and their token lifecycle.
//!
//! A [`TokenManager`] owns one credential's secret, its cached [`Token`], and
//! its [`RateLimiter`]. The token is reissued lazily whenever it is missing or
//! expired; concurrent callers wait on the same reissue instead of each
//! hitting the token endpoint.

use crate::error::{Result, SeineError};
use crate::rate_limiter::RateLimiter;
use crate::token::{self, Token};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use url::Url;

/// Default per-second quota for a credential.
pub const DEFAULT_LIMIT_PER_SECOND: u32 = 2;

/// Default per-hour quota for a credential.
pub const DEFAULT_LIMIT_PER_HOUR: u32 = 1200;

/// One OAuth2 client-credentials identity and its quotas.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// OAuth client id; unique within a pool.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// Maximum requests per second.
    #[serde(default = "default_limit_per_second")]
    pub limit_per_second: u32,

    /// Maximum requests per clock hour.
    #[serde(default = "default_limit_per_hour")]
    pub limit_per_hour: u32,
}

fn default_limit_per_second() -> u32 {
    DEFAULT_LIMIT_PER_SECOND
}

fn default_limit_per_hour() -> u32 {
    DEFAULT_LIMIT_PER_HOUR
}

impl CredentialConfig {
    /// Create a credential with the default quotas.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            limit_per_second: DEFAULT_LIMIT_PER_SECOND,
            limit_per_hour: DEFAULT_LIMIT_PER_HOUR,
        }
    }

    /// Override both quotas.
    pub fn with_limits(mut self, limit_per_second: u32, limit_per_hour: u32) -> Self {
        self.limit_per_second = limit_per_second;
        self.limit_per_hour = limit_per_hour;
        self
    }

    /// Validate the credential before any network call is made.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| SeineError::InvalidCredential {
            client_id: self.client_id.clone(),
            reason: reason.to_string(),
        };

        if self.client_id.trim().is_empty() {
            return Err(invalid("client id cannot be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(invalid("client secret cannot be empty"));
        }
        if self.limit_per_second == 0 || self.limit_per_hour == 0 {
            return Err(invalid("rate limits must be greater than 0"));
        }

        Ok(())
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("limit_per_second", &self.limit_per_second)
            .field("limit_per_hour", &self.limit_per_hour)
            .finish()
    }
}

/// Owner of one credential's token and quota state.
pub struct TokenManager {
    config: CredentialConfig,
    http: Client,
    token_url: Url,
    token: tokio::sync::Mutex<Option<Token>>,
    limiter: Mutex<RateLimiter>,
}

impl TokenManager {
    /// Create a manager without issuing a token yet.
    pub fn new(config: CredentialConfig, http: Client, token_url: Url) -> Self {
        let limiter = RateLimiter::new(config.limit_per_second, config.limit_per_hour);

        Self {
            config,
            http,
            token_url,
            token: tokio::sync::Mutex::new(None),
            limiter: Mutex::new(limiter),
        }
    }

    /// Create a manager and validate it by issuing its first token.
    pub async fn connect(config: CredentialConfig, http: Client, token_url: Url) -> Result<Self> {
        config.validate()?;

        let manager = Self::new(config, http, token_url);
        manager.get_token().await?;

        info!(
            client_id = %manager.client_id(),
            limit_per_second = manager.config.limit_per_second,
            limit_per_hour = manager.config.limit_per_hour,
            "Credential validated"
        );

        Ok(manager)
    }

    /// The credential's client id.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// The credential configuration.
    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Return the cached token, reissuing it first if it is missing or expired.
    pub async fn get_token(&self) -> Result<Token> {
        let mut slot = self.token.lock().await;

        if let Some(token) = slot.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
            debug!(client_id = %self.client_id(), "Access token expired, reissuing");
        }

        let token = token::issue_token(&self.http, &self.token_url, &self.config).await?;
        *slot = Some(token.clone());

        Ok(token)
    }

    /// Whether the credential's quota is currently saturated.
    pub fn is_busy(&self) -> bool {
        !self.limiter.lock().is_available()
    }

    /// Atomically check availability and, if available, count one request.
    pub fn try_reserve(&self) -> bool {
        let mut limiter = self.limiter.lock();
        if !limiter.is_available() {
            return false;
        }
        limiter.record_request();
        true
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("token_url", &self.token_url.as_str())
            .finish_non_exhaustive()
    }
}
