//! Error types for Seine.
//!
//! [`SeineError`] covers everything that can fail a whole call: loading
//! configuration, registering credentials, issuing tokens. Failures of
//! individual dispatched requests are not errors at this level; they are
//! reported as [`ErrorKind`] values inside the result set.

use crate::classify::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while configuring or driving the dispatcher.
#[derive(Error, Debug)]
pub enum SeineError {
    /// Failed to read an input file.
    #[error("failed to read input file '{path}': {source}")]
    InputFileRead {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write to an output file.
    #[error("failed to write to output file '{path}': {source}")]
    OutputFileWrite {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON from an input file.
    #[error("failed to parse JSON at line {line}: {source}")]
    JsonParse {
        /// Line number where the error occurred (0 for whole-file documents).
        line: usize,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize JSON for output.
    #[error("failed to serialize JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// A URL could not be parsed or resolved.
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No credentials configured.
    #[error("no credentials configured - at least one client id and secret is required")]
    NoCredentials,

    /// A credential with the same client id is already registered.
    #[error("credential '{client_id}' is already registered")]
    DuplicateCredential {
        /// The duplicated client id.
        client_id: String,
    },

    /// The credential could not obtain an access token.
    #[error("credential '{client_id}' could not obtain an access token: {reason}")]
    InvalidCredential {
        /// Client id of the rejected credential.
        client_id: String,
        /// What went wrong during issuance.
        reason: String,
    },

    /// No credential became available within the polling budget.
    #[error("rate limit exhausted on every registered credential")]
    RateLimitExhausted,

    /// Invariant violation or a vendor payload that no longer matches the expected schema.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated expectation.
        message: String,
    },
}

impl SeineError {
    /// Build an [`SeineError::Internal`] from any message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The classification of this error, for variants that have one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DuplicateCredential { .. } => Some(ErrorKind::DuplicateCredentialError),
            Self::InvalidCredential { .. } => Some(ErrorKind::InvalidCredentialError),
            Self::RateLimitExhausted => Some(ErrorKind::RateLimitExhaustedError),
            Self::Internal { .. } => Some(ErrorKind::InternalError),
            _ => None,
        }
    }
}

/// Result type alias for Seine operations.
pub type Result<T> = std::result::Result<T, SeineError>;
