//! Failure classification for dispatched requests.
//!
//! Every attempt ends either in a success status or in exactly one
//! [`ErrorKind`]. The dispatcher uses [`ErrorKind::is_retryable`] to decide
//! whether a failed request goes back into the pending pool.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP statuses treated as success.
pub const SUCCESS_STATUSES: [u16; 10] = [200, 201, 202, 203, 204, 205, 206, 207, 208, 226];

/// Closed set of reasons a request (or registration) can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// HTTP 400.
    BadRequest,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    NoPermission,
    /// HTTP 404.
    NotFound,
    /// HTTP 429.
    TooManyRequests,
    /// HTTP 5xx.
    UpstreamUnavailable,
    /// No response was received.
    FetchError,
    /// Any other non-success status.
    Unknown,
    /// Never attempted because dispatch stopped first.
    Aborted,
    /// Invariant violation or malformed vendor payload.
    InternalError,
    /// The client id is already registered.
    DuplicateCredentialError,
    /// The credential could not obtain a token.
    InvalidCredentialError,
    /// Every credential stayed saturated for the whole polling budget.
    RateLimitExhaustedError,
}

impl ErrorKind {
    /// Whether a request failing with this kind may be attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::FetchError | Self::UpstreamUnavailable | Self::TooManyRequests
        )
    }

    /// Stable identifier used in logs and persisted output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "badRequest",
            Self::Unauthorized => "unauthorized",
            Self::NoPermission => "noPermission",
            Self::NotFound => "notFound",
            Self::TooManyRequests => "tooManyRequests",
            Self::UpstreamUnavailable => "upstreamUnavailable",
            Self::FetchError => "fetchError",
            Self::Unknown => "unknown",
            Self::Aborted => "aborted",
            Self::InternalError => "internalError",
            Self::DuplicateCredentialError => "duplicateCredentialError",
            Self::InvalidCredentialError => "invalidCredentialError",
            Self::RateLimitExhaustedError => "rateLimitExhaustedError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether a status code counts as success.
pub fn is_success_status(status: u16) -> bool {
    SUCCESS_STATUSES.contains(&status)
}

/// Classify an HTTP status. Returns `None` for success statuses.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    if is_success_status(status) {
        return None;
    }

    let kind = match status {
        400 => ErrorKind::BadRequest,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::NoPermission,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::TooManyRequests,
        s if s >= 500 => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::Unknown,
    };

    Some(kind)
}

/// Classify a transport error raised before a response was available.
///
/// Builder errors mean the caller's request could not be constructed, so
/// sending it again cannot help.
pub fn classify_transport_error(error: &reqwest::Error) -> ErrorKind {
    if error.is_builder() {
        ErrorKind::BadRequest
    } else {
        ErrorKind::FetchError
    }
}
