//! Credential pool with bounded-wait token selection.
//!
//! Credentials are scanned in registration order on every round, and the
//! first one with quota left wins. Busy credentials are simply skipped, so
//! load drifts toward whichever credential frees up first. When a full round
//! finds nothing, the pool sleeps for the poll interval and tries again, up to
//! a fixed number of rounds.

use crate::config::PoolConfig;
use crate::credential::{CredentialConfig, TokenManager};
use crate::error::{Result, SeineError};
use crate::token::Token;
use parking_lot::RwLock;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Maximum number of scan rounds before giving up.
pub const MAX_POLL_ROUNDS: u32 = 30;

/// Pause between scan rounds, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 100;

/// A token handed out for exactly one request.
///
/// The issuing credential's quota has already been charged for the request.
#[derive(Debug, Clone)]
pub struct LeasedToken {
    /// Client id of the credential that issued the token.
    pub client_id: String,
    /// The access token.
    pub token: Token,
}

/// All registered credentials of one dispatcher.
#[derive(Debug)]
pub struct CredentialPool {
    managers: RwLock<Vec<Arc<TokenManager>>>,
    http: Client,
    token_url: Url,
    settings: PoolConfig,
}

impl CredentialPool {
    /// Create an empty pool.
    pub fn new(http: Client, token_url: Url, settings: PoolConfig) -> Self {
        Self {
            managers: RwLock::new(Vec::new()),
            http,
            token_url,
            settings,
        }
    }

    /// Register a credential, validating it by issuing a token.
    ///
    /// Fails with [`SeineError::DuplicateCredential`] if the client id is
    /// already registered and with [`SeineError::InvalidCredential`] if no
    /// token could be issued. A failed registration leaves the pool unchanged.
    pub async fn add_credential(&self, config: CredentialConfig) -> Result<()> {
        self.ensure_unique(&config.client_id)?;

        let manager =
            TokenManager::connect(config, self.http.clone(), self.token_url.clone()).await?;

        // Another registration of the same id may have finished while the token was issued.
        let mut managers = self.managers.write();
        if managers.iter().any(|m| m.client_id() == manager.client_id()) {
            return Err(SeineError::DuplicateCredential {
                client_id: manager.client_id().to_string(),
            });
        }

        info!(
            client_id = %manager.client_id(),
            total = managers.len() + 1,
            "Credential registered"
        );
        managers.push(Arc::new(manager));

        Ok(())
    }

    /// Replace the credential with the same client id, or register it if absent.
    ///
    /// The new configuration is validated first; on failure the registered
    /// credential stays untouched. A replaced credential starts with fresh quota counters.
    pub async fn update_credential(&self, config: CredentialConfig) -> Result<()> {
        let manager =
            TokenManager::connect(config, self.http.clone(), self.token_url.clone()).await?;
        let manager = Arc::new(manager);

        let mut managers = self.managers.write();
        match managers
            .iter()
            .position(|m| m.client_id() == manager.client_id())
        {
            Some(index) => {
                info!(client_id = %manager.client_id(), "Credential updated");
                managers[index] = manager;
            }
            None => {
                info!(client_id = %manager.client_id(), "Credential registered");
                managers.push(manager);
            }
        }

        Ok(())
    }

    /// Remove a credential. Returns whether it was registered.
    pub fn remove_credential(&self, client_id: &str) -> bool {
        let mut managers = self.managers.write();
        let before = managers.len();
        managers.retain(|m| m.client_id() != client_id);
        before != managers.len()
    }

    /// Number of registered credentials.
    pub fn len(&self) -> usize {
        self.managers.read().len()
    }

    /// Whether no credential is registered.
    pub fn is_empty(&self) -> bool {
        self.managers.read().is_empty()
    }

    /// Registered client ids in registration order.
    pub fn client_ids(&self) -> Vec<String> {
        self.managers
            .read()
            .iter()
            .map(|m| m.client_id().to_string())
            .collect()
    }

    /// Acquire a token from the first credential with quota left.
    ///
    /// Charges one request against the chosen credential before returning.
    /// Busy credentials are skipped without touching their token, and a
    /// credential whose token refresh fails is not retried within this call.
    /// Returns [`SeineError::RateLimitExhausted`] immediately when the pool is
    /// empty, or after every poll round found all credentials busy.
    pub async fn get_available_token(&self) -> Result<LeasedToken> {
        let managers: Vec<Arc<TokenManager>> = self.managers.read().clone();

        if managers.is_empty() {
            return Err(SeineError::RateLimitExhausted);
        }

        // Credentials whose token refresh failed sit out the rest of this call.
        let mut refresh_failed = vec![false; managers.len()];

        let rounds = self.settings.poll_rounds;
        for round in 0..rounds {
            for (index, manager) in managers.iter().enumerate() {
                if refresh_failed[index] {
                    continue;
                }
                if manager.is_busy() {
                    trace!(client_id = %manager.client_id(), round, "Credential busy");
                    continue;
                }

                let token = match manager.get_token().await {
                    Ok(token) => token,
                    Err(SeineError::InvalidCredential { client_id, reason }) => {
                        warn!(client_id = %client_id, reason = %reason, "Token refresh failed, skipping credential");
                        refresh_failed[index] = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                if !manager.try_reserve() {
                    trace!(client_id = %manager.client_id(), round, "Credential busy");
                    continue;
                }

                debug!(client_id = %manager.client_id(), round, "Token leased");
                return Ok(LeasedToken {
                    client_id: manager.client_id().to_string(),
                    token,
                });
            }

            if refresh_failed.iter().all(|failed| *failed) {
                warn!(
                    credentials = managers.len(),
                    "No credential could refresh its token"
                );
                return Err(SeineError::RateLimitExhausted);
            }

            if round + 1 < rounds {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }

        warn!(
            credentials = managers.len(),
            rounds, "Every credential stayed saturated"
        );
        Err(SeineError::RateLimitExhausted)
    }

    fn ensure_unique(&self, client_id: &str) -> Result<()> {
        if self
            .managers
            .read()
            .iter()
            .any(|m| m.client_id() == client_id)
        {
            return Err(SeineError::DuplicateCredential {
                client_id: client_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(token: &str) -> serde_json::Value {
        serde_json::json!({
            "access_token": token,
            "token_type": "bearer",
            "expires_in": 7200,
            "scope": "public",
            "created_at": 1_714_550_400,
        })
    }

    async fn mount_token(server: &MockServer, client_id: &str, token: &str) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains(format!("client_id={client_id}&")))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(token)))
            .mount(server)
            .await;
    }

    fn pool_for(server: &MockServer, settings: PoolConfig) -> CredentialPool {
        let token_url = Url::parse(&format!("{}/oauth/token", server.uri())).unwrap();
        CredentialPool::new(Client::new(), token_url, settings)
    }

    fn fast_settings(poll_rounds: u32) -> PoolConfig {
        PoolConfig {
            poll_rounds,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_duplicate_credential_rejected() {
        let server = MockServer::start().await;
        mount_token(&server, "a", "token-a").await;
        let pool = pool_for(&server, PoolConfig::default());

        pool.add_credential(CredentialConfig::new("a", "s")).await.unwrap();
        let err = pool
            .add_credential(CredentialConfig::new("a", "other"))
            .await
            .unwrap_err();

        assert!(matches!(err, SeineError::DuplicateCredential { .. }));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_credential_not_registered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let pool = pool_for(&server, PoolConfig::default());

        let err = pool
            .add_credential(CredentialConfig::new("a", "bad"))
            .await
            .unwrap_err();

        assert!(matches!(err, SeineError::InvalidCredential { .. }));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_empty_pool_exhausts_immediately() {
        let server = MockServer::start().await;
        let pool = pool_for(&server, PoolConfig::default());

        let start = Instant::now();
        let err = pool.get_available_token().await.unwrap_err();

        assert!(matches!(err, SeineError::RateLimitExhausted));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_selection_follows_registration_order() {
        let server = MockServer::start().await;
        mount_token(&server, "a", "token-a").await;
        mount_token(&server, "b", "token-b").await;
        let pool = pool_for(&server, fast_settings(1));

        pool.add_credential(CredentialConfig::new("a", "s").with_limits(1, 100))
            .await
            .unwrap();
        pool.add_credential(CredentialConfig::new("b", "s").with_limits(1, 100))
            .await
            .unwrap();

        let first = pool.get_available_token().await.unwrap();
        let second = pool.get_available_token().await.unwrap();
        assert_eq!(first.client_id, "a");
        assert_eq!(first.token.access_token(), "token-a");
        assert_eq!(second.client_id, "b");

        let err = pool.get_available_token().await.unwrap_err();
        assert!(matches!(err, SeineError::RateLimitExhausted));
    }

    #[tokio::test]
    async fn test_waits_for_second_window() {
        let server = MockServer::start().await;
        mount_token(&server, "a", "token-a").await;
        let pool = pool_for(&server, PoolConfig::default());
        pool.add_credential(CredentialConfig::new("a", "s").with_limits(1, 100))
            .await
            .unwrap();

        let start = Instant::now();
        pool.get_available_token().await.unwrap();
        pool.get_available_token().await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_update_replaces_credential() {
        let server = MockServer::start().await;
        mount_token(&server, "a", "token-a").await;
        let pool = pool_for(&server, fast_settings(1));

        pool.add_credential(CredentialConfig::new("a", "s").with_limits(1, 100))
            .await
            .unwrap();
        pool.get_available_token().await.unwrap();
        assert!(pool.get_available_token().await.is_err());

        pool.update_credential(CredentialConfig::new("a", "s").with_limits(5, 100))
            .await
            .unwrap();
        assert_eq!(pool.len(), 1);
        assert!(pool.get_available_token().await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_credential() {
        let server = MockServer::start().await;
        mount_token(&server, "a", "token-a").await;
        let pool = pool_for(&server, PoolConfig::default());
        pool.add_credential(CredentialConfig::new("a", "s")).await.unwrap();

        assert_eq!(pool.client_ids(), vec!["a".to_string()]);
        assert!(pool.remove_credential("a"));
        assert!(!pool.remove_credential("a"));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_not_retried_within_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "short-lived",
                "token_type": "bearer",
                "expires_in": 0,
                "scope": "public",
                "created_at": 1_714_550_400,
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        let pool = pool_for(
            &server,
            PoolConfig {
                poll_rounds: 5,
                poll_interval: Duration::from_millis(200),
            },
        );
        pool.add_credential(CredentialConfig::new("a", "s")).await.unwrap();

        let start = Instant::now();
        let err = pool.get_available_token().await.unwrap_err();

        assert!(matches!(err, SeineError::RateLimitExhausted));
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
