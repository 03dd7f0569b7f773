//! # Seine
//!
//! Rate-limited batch dispatcher for REST APIs protected by OAuth2
//! client-credentials tokens.
//!
//! Seine keeps a pool of credentials, each with its own per-second and
//! per-hour quota, and spreads a batch of requests across them. Tokens are
//! issued and refreshed lazily, transient failures are retried, and results
//! come back in the order the requests were added.
//!
//! ## Features
//!
//! - **Credential Rotation**: Requests go to the first credential with quota left
//! - **Quota Tracking**: Fixed one-second and clock-hour windows per credential
//! - **Automatic Retries**: Network errors, 429 and 5xx are retried up to a cap
//! - **Ordered Results**: Responses and failures are sorted by enqueue order
//! - **Batch IO**: JSONL request files in, JSONL responses and failures out
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use seine::{Config, CredentialConfig, Dispatcher, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = Dispatcher::new(Config::default())?;
//!     dispatcher
//!         .add_credential(CredentialConfig::new("client-id", "client-secret"))
//!         .await?;
//!
//!     dispatcher.add_request("users/norminet", RequestOptions::get());
//!     dispatcher.add_request("campus", RequestOptions::get());
//!
//!     let result = dispatcher.get_result().await;
//!     for response in &result.responses {
//!         println!("{} -> {}", response.url, response.status);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Seine supports configuration via:
//! - Command-line arguments
//! - Environment variables (prefixed with `SEINE_`)
//! - JSON configuration files
//!
//! See [`Config`] for all available options.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod classify;
pub mod client;
pub mod config;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod rate_limiter;
pub mod request;
pub mod token;
pub mod tracker;

// Re-exports for convenience
pub use batch::{RequestLine, load_requests, write_result_set};
pub use classify::ErrorKind;
pub use client::ApiClient;
pub use config::{Args, Config, DispatchConfig, PoolConfig, RequestConfig};
pub use credential::{CredentialConfig, TokenManager};
pub use dispatcher::Dispatcher;
pub use error::{Result, SeineError};
pub use pool::{CredentialPool, LeasedToken};
pub use rate_limiter::RateLimiter;
pub use request::{
    ApiResponse, FailedRequest, HttpMethod, RequestOptions, ResultSet, ResultStatus,
};
pub use token::Token;
pub use tracker::{StatsSnapshot, StatsTracker};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
