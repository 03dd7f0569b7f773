//! Access tokens and the client-credentials grant.
//!
//! Tokens are issued by POSTing a form-encoded client-credentials grant to the
//! vendor's token endpoint. The response body must carry every field of
//! [`TokenPayload`]; a body that does not is reported as an internal error
//! because it means the vendor changed its schema, not that the caller
//! supplied a bad secret.

use crate::credential::CredentialConfig;
use crate::error::{Result, SeineError};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use url::Url;

/// Token endpoint response body.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Bearer token value.
    pub access_token: String,
    /// Token type, `bearer` in practice.
    pub token_type: String,
    /// Lifetime in seconds, relative to issuance.
    pub expires_in: i64,
    /// Granted scope string.
    pub scope: String,
    /// Vendor-side creation time as a unix timestamp.
    pub created_at: i64,
}

impl fmt::Debug for TokenPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPayload")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// An access token owned by one credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    token_type: String,
    scope: String,
    created_at: Option<DateTime<Utc>>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Token {
    /// Build a token from a validated payload received at `issued_at`.
    ///
    /// `expires_at` is `issued_at + expires_in`, floored to whole seconds.
    pub fn from_payload(payload: TokenPayload, issued_at: DateTime<Utc>) -> Result<Self> {
        let lifetime = TimeDelta::try_seconds(payload.expires_in)
            .ok_or_else(|| SeineError::internal("token expires_in is out of range"))?;
        let expires_at = issued_at
            .checked_add_signed(lifetime)
            .ok_or_else(|| SeineError::internal("token expiry is out of range"))?
            .trunc_subsecs(0);

        Ok(Self {
            access_token: payload.access_token,
            token_type: payload.token_type,
            scope: payload.scope,
            created_at: DateTime::from_timestamp(payload.created_at, 0),
            issued_at,
            expires_at,
        })
    }

    /// Raw access token.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Token type reported by the vendor.
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Scope reported by the vendor.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Vendor-side creation time, when representable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Local time at which the token response was received.
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Instant from which the token is no longer used.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parse and validate a token endpoint body.
pub fn parse_token_payload(body: &[u8]) -> Result<TokenPayload> {
    serde_json::from_slice(body).map_err(|e| {
        SeineError::internal(format!(
            "token endpoint response does not match the expected schema: {e}"
        ))
    })
}

/// Run the client-credentials grant for `credential` against `token_url`.
///
/// Network failures and rejected grants surface as
/// [`SeineError::InvalidCredential`]; malformed bodies as [`SeineError::Internal`].
pub async fn issue_token(
    client: &Client,
    token_url: &Url,
    credential: &CredentialConfig,
) -> Result<Token> {
    let invalid = |reason: String| SeineError::InvalidCredential {
        client_id: credential.client_id.clone(),
        reason,
    };

    debug!(client_id = %credential.client_id, "Issuing access token");

    let response = client
        .post(token_url.clone())
        .header(header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|e| invalid(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        warn!(
            client_id = %credential.client_id,
            status = status.as_u16(),
            "Token endpoint rejected the grant"
        );
        return Err(invalid(format!(
            "token endpoint returned status {}",
            status.as_u16()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| invalid(format!("failed to read token response: {e}")))?;
    let payload = parse_token_payload(&body)?;
    let token = Token::from_payload(payload, Utc::now())?;

    debug!(
        client_id = %credential.client_id,
        expires_at = %token.expires_at(),
        "Access token issued"
    );

    Ok(token)
}
