//! Configuration management for Seine.
//!
//! Supports configuration via CLI arguments, environment variables,
//! and JSON configuration files with sensible defaults.

use crate::credential::{CredentialConfig, DEFAULT_LIMIT_PER_HOUR, DEFAULT_LIMIT_PER_SECOND};
use crate::error::{Result, SeineError};
use crate::pool::{MAX_POLL_ROUNDS, POLL_INTERVAL_MS};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Default vendor API base.
pub const DEFAULT_API_BASE: &str = "https://api.intra.42.fr/v2/";

/// Default number of requests dispatched concurrently per chunk.
pub const CHUNK_SIZE: usize = 10;

/// Default maximum number of attempts per request.
pub const MAX_TRY_COUNT: u32 = 3;

/// Default number of failed attempts after which dispatch stops.
pub const MAX_FAIL_LIMIT: usize = 50;

/// CLI arguments for the Seine dispatcher.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seine",
    version,
    about = "Rate-limited batch requests across rotating OAuth2 client credentials",
    long_about = "Seine sends a batch of REST requests through several OAuth2 client-credentials\n\
                  identities, respecting each credential's per-second and per-hour quota,\n\
                  retrying transient failures and returning results in input order.",
    after_help = "EXAMPLES:\n    \
        seine --input requests.jsonl --client-id ID --client-secret SECRET\n    \
        seine -i pages.jsonl -o responses.jsonl --config credentials.json\n    \
        seine --config credentials.json --input batch.jsonl --dry-run"
)]
pub struct Args {
    /// Path to the JSONL file containing requests
    #[arg(short, long, env = "SEINE_INPUT")]
    pub input: PathBuf,

    /// Path to save successful responses (optional)
    #[arg(short, long, env = "SEINE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Path to save failed requests
    #[arg(short, long, default_value = "errors.jsonl", env = "SEINE_ERRORS")]
    pub errors: PathBuf,

    /// Path to a JSON configuration file with credentials and settings
    #[arg(short, long, env = "SEINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// API base URL that relative request URLs are resolved against
    #[arg(long, env = "SEINE_API_BASE")]
    pub api_base: Option<String>,

    /// OAuth client id to register in addition to configured credentials
    #[arg(long, env = "SEINE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret for --client-id
    #[arg(long, env = "SEINE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Requests per second allowed for --client-id
    #[arg(long, default_value_t = DEFAULT_LIMIT_PER_SECOND, env = "SEINE_LIMIT_PER_SECOND")]
    pub limit_per_second: u32,

    /// Requests per hour allowed for --client-id
    #[arg(long, default_value_t = DEFAULT_LIMIT_PER_HOUR, env = "SEINE_LIMIT_PER_HOUR")]
    pub limit_per_hour: u32,

    /// Maximum attempts per request
    #[arg(short = 'a', long, env = "SEINE_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Number of requests dispatched concurrently per chunk
    #[arg(long, env = "SEINE_CHUNK_SIZE")]
    pub chunk_size: Option<usize>,

    /// Request timeout in seconds
    #[arg(short, long, env = "SEINE_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, env = "SEINE_VERBOSE")]
    pub verbose: bool,

    /// Disable the progress display
    #[arg(long, env = "SEINE_NO_PROGRESS")]
    pub no_progress: bool,

    /// Output logs as JSON
    #[arg(long, env = "SEINE_JSON_LOGS")]
    pub json_logs: bool,

    /// Dry run - validate config without sending requests
    #[arg(long)]
    pub dry_run: bool,
}

impl Args {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The credential given on the command line, if both id and secret are set.
    pub fn credential(&self) -> Option<CredentialConfig> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(
                CredentialConfig::new(id.clone(), secret.clone())
                    .with_limits(self.limit_per_second, self.limit_per_hour),
            ),
            _ => None,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL that relative request URLs are resolved against.
    #[serde(default = "default_api_base")]
    pub api_base: Url,

    /// Token endpoint; defaults to `oauth/token` under the API base.
    #[serde(default)]
    pub token_url: Option<Url>,

    /// Credentials registered at startup.
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,

    /// Transport settings.
    #[serde(default)]
    pub request: RequestConfig,

    /// Dispatch loop settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Token selection settings.
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_api_base() -> Url {
    // The literal is a valid absolute URL.
    Url::parse(DEFAULT_API_BASE).unwrap_or_else(|_| unreachable!())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_url: None,
            credentials: Vec::new(),
            request: RequestConfig::default(),
            dispatch: DispatchConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Request timeout, applied to token issuance and dispatched requests.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Dispatch loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Requests started concurrently per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum attempts per request.
    #[serde(default = "default_max_try_count")]
    pub max_try_count: u32,

    /// Failed attempts after which no new request is started.
    #[serde(default = "default_max_fail_limit")]
    pub max_fail_limit: usize,

    /// Optional cap on dispatch rate across all credentials.
    #[serde(default)]
    pub max_requests_per_second: Option<u32>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_try_count: default_max_try_count(),
            max_fail_limit: default_max_fail_limit(),
            max_requests_per_second: None,
        }
    }
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_max_try_count() -> u32 {
    MAX_TRY_COUNT
}

fn default_max_fail_limit() -> usize {
    MAX_FAIL_LIMIT
}

/// Token selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Full scans over all credentials before giving up.
    #[serde(default = "default_poll_rounds")]
    pub poll_rounds: u32,

    /// Pause between scans.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_rounds: default_poll_rounds(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_poll_rounds() -> u32 {
    MAX_POLL_ROUNDS
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(POLL_INTERVAL_MS)
}

impl Config {
    /// Create a configuration for the given API base with defaults elsewhere.
    pub fn with_api_base(api_base: &str) -> Result<Self> {
        Ok(Self {
            api_base: parse_url(api_base)?,
            ..Default::default()
        })
    }

    /// Load configuration from a file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SeineError::InputFileRead {
            path: path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| SeineError::JsonParse { line: 0, source: e })
    }

    /// Create configuration from CLI arguments, layered over the config file if given.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        // Override with CLI args
        if let Some(api_base) = &args.api_base {
            config.api_base = parse_url(api_base)?;
        }
        if let Some(max_attempts) = args.max_attempts {
            config.dispatch.max_try_count = max_attempts;
        }
        if let Some(chunk_size) = args.chunk_size {
            config.dispatch.chunk_size = chunk_size;
        }
        if let Some(timeout) = args.timeout {
            config.request.timeout = Duration::from_secs(timeout);
        }
        if let Some(credential) = args.credential() {
            config.credentials.push(credential);
        }

        if config.credentials.is_empty() {
            return Err(SeineError::NoCredentials);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.api_base.cannot_be_a_base() {
            return Err(SeineError::InvalidConfig(format!(
                "API base '{}' cannot be used as a base URL",
                self.api_base
            )));
        }

        if self.request.timeout.is_zero() {
            return Err(SeineError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.chunk_size == 0 {
            return Err(SeineError::InvalidConfig(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.max_try_count == 0 {
            return Err(SeineError::InvalidConfig(
                "max try count must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.max_fail_limit == 0 {
            return Err(SeineError::InvalidConfig(
                "max fail limit must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.max_requests_per_second == Some(0) {
            return Err(SeineError::InvalidConfig(
                "max requests per second must be greater than 0".to_string(),
            ));
        }
        if self.pool.poll_rounds == 0 {
            return Err(SeineError::InvalidConfig(
                "poll rounds must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for credential in &self.credentials {
            credential.validate()?;
            if !seen.insert(credential.client_id.as_str()) {
                return Err(SeineError::DuplicateCredential {
                    client_id: credential.client_id.clone(),
                });
            }
        }

        Ok(())
    }

    /// The token endpoint, explicit or derived from the API base.
    pub fn token_endpoint(&self) -> Result<Url> {
        match &self.token_url {
            Some(url) => Ok(url.clone()),
            None => self
                .api_base
                .join("oauth/token")
                .map_err(|e| SeineError::InvalidUrl {
                    url: format!("{}oauth/token", self.api_base),
                    source: e,
                }),
        }
    }

    /// The global dispatch cap as a NonZeroU32, if configured.
    pub fn max_requests_per_second(&self) -> Option<NonZeroU32> {
        self.dispatch
            .max_requests_per_second
            .and_then(NonZeroU32::new)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| SeineError::InvalidUrl {
        url: raw.to_string(),
        source: e,
    })
}

/// Custom serde module for humantime Duration parsing.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // Simple parsing: support "30s", "100ms", or just seconds as number
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
