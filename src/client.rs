//! HTTP transport for dispatched requests.
//!
//! One attempt is one call to [`ApiClient::send`]: the leased token is
//! attached, the response body is read in full and the outcome is classified.
//! Retrying is the dispatcher's business.

use crate::classify::{ErrorKind, classify_status, classify_transport_error};
use crate::config::Config;
use crate::error::{Result, SeineError};
use crate::pool::LeasedToken;
use crate::request::{ApiResponse, PendingRequest};
use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use tracing::trace;
use url::Url;

/// Why a single attempt did not produce a success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
}

impl AttemptFailure {
    fn without_status(kind: ErrorKind) -> Self {
        Self { kind, status: None }
    }
}

/// HTTP client wrapper that resolves URLs and attaches bearer tokens.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    api_base: Url,
}

impl ApiClient {
    /// Create a new API client.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(config.request.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(SeineError::HttpClient)?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
        })
    }

    /// The underlying reqwest client, shared with token issuance.
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// The base relative URLs are resolved against.
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Resolve a caller URL against the API base. Absolute URLs pass through.
    pub fn resolve(&self, raw: &str) -> Result<Url> {
        self.api_base
            .join(raw)
            .map_err(|e| SeineError::InvalidUrl {
                url: raw.to_string(),
                source: e,
            })
    }

    /// Send one attempt of `request` to `url` using the leased token.
    pub async fn send(
        &self,
        request: &PendingRequest,
        url: Url,
        lease: &LeasedToken,
    ) -> std::result::Result<ApiResponse, AttemptFailure> {
        let builder = self.build(request, url.clone(), lease)?;

        trace!(
            sequence_id = request.sequence_id,
            url = %url,
            client_id = %lease.client_id,
            "Sending request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| AttemptFailure::without_status(classify_transport_error(&e)))?;

        let status = response.status().as_u16();
        if let Some(kind) = classify_status(status) {
            return Err(AttemptFailure {
                kind,
                status: Some(status),
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|_| AttemptFailure {
            kind: ErrorKind::FetchError,
            status: Some(status),
        })?;

        Ok(ApiResponse {
            sequence_id: request.sequence_id,
            url: url.to_string(),
            status,
            headers,
            body: body.to_vec(),
            try_count: request.try_count,
            client_id: lease.client_id.clone(),
        })
    }

    fn build(
        &self,
        request: &PendingRequest,
        url: Url,
        lease: &LeasedToken,
    ) -> std::result::Result<RequestBuilder, AttemptFailure> {
        let options = &request.options;
        if options.body_count() > 1 {
            return Err(AttemptFailure::without_status(ErrorKind::BadRequest));
        }

        let mut headers = header::HeaderMap::with_capacity(options.headers.len() + 1);

        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| AttemptFailure::without_status(ErrorKind::BadRequest))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| AttemptFailure::without_status(ErrorKind::BadRequest))?;
            headers.insert(name, value);
        }

        if options.text.is_some() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
        }

        // The leased token always wins over a caller-supplied Authorization.
        let bearer = HeaderValue::from_str(&lease.token.bearer())
            .map_err(|_| AttemptFailure::without_status(ErrorKind::InternalError))?;
        headers.insert(header::AUTHORIZATION, bearer);

        let mut builder = self
            .client
            .request(options.method.as_reqwest(), url)
            .headers(headers);
        if let Some(body) = &options.body {
            builder = builder.json(body);
        } else if let Some(form) = &options.form {
            builder = builder.form(form);
        } else if let Some(text) = &options.text {
            builder = builder.body(text.clone());
        }

        Ok(builder)
    }
}
