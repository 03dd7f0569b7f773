//! Request, response and result types.
//!
//! A request enters the dispatcher as a URL plus [`RequestOptions`], lives as
//! a [`PendingRequest`] while it is being dispatched, and leaves as either an
//! [`ApiResponse`] or a [`FailedRequest`] inside the final [`ResultSet`].

use crate::classify::ErrorKind;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// HTTP method of a dispatched request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

impl HttpMethod {
    /// The equivalent reqwest method.
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
            Self::Head => reqwest::Method::HEAD,
        }
    }
}

/// Caller-supplied options for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// HTTP method, `GET` by default.
    #[serde(default)]
    pub method: HttpMethod,

    /// Extra headers. `Authorization` is always replaced by the leased token.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// JSON body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Form-encoded body, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<BTreeMap<String, String>>,

    /// Raw text body, if any. `Content-Type` defaults to `text/plain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RequestOptions {
    /// Options for a plain `GET`.
    pub fn get() -> Self {
        Self::default()
    }

    /// Options for a `POST` with a JSON body.
    pub fn post(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::default()
        }
    }

    /// Set the method.
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the JSON body.
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a form-encoded body.
    pub fn with_form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.form = Some(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a raw text body.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Number of body kinds set. At most one may be sent.
    pub fn body_count(&self) -> usize {
        usize::from(self.body.is_some())
            + usize::from(self.form.is_some())
            + usize::from(self.text.is_some())
    }
}

/// A request waiting in, or being dispatched from, the pending pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// Position in the pool at enqueue time; stable across retries.
    pub sequence_id: usize,
    /// URL as given by the caller, possibly relative to the API base.
    pub url: String,
    /// Caller-supplied options.
    pub options: RequestOptions,
    /// Number of attempts started so far.
    pub try_count: u32,
}

impl PendingRequest {
    /// Create a request that has not been attempted yet.
    pub fn new(sequence_id: usize, url: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            sequence_id,
            url: url.into(),
            options,
            try_count: 0,
        }
    }
}

/// A successful response with its body fully read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Sequence id of the originating request.
    pub sequence_id: usize,
    /// Resolved URL the request was sent to.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Attempts it took to get this response.
    pub try_count: u32,
    /// Credential whose token was used.
    pub client_id: String,
}

impl ApiResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// A header value, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A request that ended without a successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRequest {
    /// Sequence id of the request.
    pub sequence_id: usize,
    /// URL as given by the caller.
    pub url: String,
    /// Caller-supplied options.
    pub options: RequestOptions,
    /// Why the request failed.
    pub error_kind: ErrorKind,
    /// Attempts started before giving up.
    pub try_count: u32,
    /// Last HTTP status received, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl FailedRequest {
    /// Build from the pending request and its final classification.
    pub fn new(request: PendingRequest, error_kind: ErrorKind, status: Option<u16>) -> Self {
        Self {
            sequence_id: request.sequence_id,
            url: request.url,
            options: request.options,
            error_kind,
            try_count: request.try_count,
            status,
        }
    }
}

/// Result of one attempt, or the terminal state of a request.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A success status was received.
    Success(ApiResponse),
    /// The attempt failed, or the request was never attempted.
    Failure {
        /// The request, with its current try count.
        request: PendingRequest,
        /// Classification of the failure.
        error_kind: ErrorKind,
        /// HTTP status, if a response was received.
        status: Option<u16>,
    },
}

impl Outcome {
    /// Sequence id of the request this outcome belongs to.
    pub fn sequence_id(&self) -> usize {
        match self {
            Self::Success(response) => response.sequence_id,
            Self::Failure { request, .. } => request.sequence_id,
        }
    }

    /// Check if this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Overall status of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Every request succeeded.
    Success,
    /// At least one request failed or was aborted.
    Fail,
}

/// Consolidated result of one `get_result` call.
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// `Success` iff `failed_requests` is empty.
    pub status: ResultStatus,
    /// Successful responses, ascending by sequence id.
    pub responses: Vec<ApiResponse>,
    /// Failed and aborted requests, ascending by sequence id.
    pub failed_requests: Vec<FailedRequest>,
}

impl ResultSet {
    /// Fold terminal outcomes into a result set.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        let mut responses = Vec::new();
        let mut failed_requests = Vec::new();

        for outcome in outcomes {
            match outcome {
                Outcome::Success(response) => responses.push(response),
                Outcome::Failure {
                    request,
                    error_kind,
                    status,
                } => failed_requests.push(FailedRequest::new(request, error_kind, status)),
            }
        }

        responses.sort_by_key(|r| r.sequence_id);
        failed_requests.sort_by_key(|f| f.sequence_id);

        let status = if failed_requests.is_empty() {
            ResultStatus::Success
        } else {
            ResultStatus::Fail
        };

        Self {
            status,
            responses,
            failed_requests,
        }
    }

    /// Check if every request succeeded.
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Requests that were never attempted and can be enqueued again.
    pub fn aborted(&self) -> impl Iterator<Item = &FailedRequest> {
        self.failed_requests
            .iter()
            .filter(|f| f.error_kind == ErrorKind::Aborted)
    }
}
