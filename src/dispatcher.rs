//! Batch dispatch across the credential pool.
//!
//! Requests accumulate in a pending pool until [`Dispatcher::get_result`]
//! drains it. The drained batch is worked off in chunks: a token is leased for
//! each request of the chunk before its call is spawned, then the whole chunk
//! is awaited. Retryable failures with attempts left go to the back of the
//! queue. Dispatch stops early when the pool runs out of quota or the failure
//! ceiling is reached. Queued requests that were never attempted then come
//! back `Aborted`; those waiting for a retry keep their last failure.

use crate::classify::ErrorKind;
use crate::client::{ApiClient, AttemptFailure};
use crate::config::Config;
use crate::credential::CredentialConfig;
use crate::error::{Result, SeineError};
use crate::pool::CredentialPool;
use crate::request::{FailedRequest, Outcome, PendingRequest, RequestOptions, ResultSet};
use crate::tracker::{StatsSnapshot, StatsTracker};
use futures::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct PendingPool {
    requests: Vec<PendingRequest>,
    next_id: usize,
}

/// Credential-rotating, rate-limited request dispatcher.
pub struct Dispatcher {
    config: Arc<Config>,
    client: ApiClient,
    pool: Arc<CredentialPool>,
    pending: Mutex<PendingPool>,
    stats: Arc<StatsTracker>,
    throttle: Option<DefaultDirectRateLimiter>,
}

impl Dispatcher {
    /// Create a dispatcher with no credentials registered.
    ///
    /// Credentials listed in `config` are not registered here; see
    /// [`Dispatcher::add_credential`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let client = ApiClient::new(&config)?;
        let pool = Arc::new(CredentialPool::new(
            client.http().clone(),
            config.token_endpoint()?,
            config.pool.clone(),
        ));
        let throttle = config
            .max_requests_per_second()
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            config,
            client,
            pool,
            pending: Mutex::new(PendingPool::default()),
            stats: Arc::new(StatsTracker::new()),
            throttle,
        })
    }

    /// The dispatcher configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The credential pool.
    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Register a credential. See [`CredentialPool::add_credential`].
    pub async fn add_credential(&self, credential: CredentialConfig) -> Result<()> {
        self.pool.add_credential(credential).await
    }

    /// Replace or register a credential. See [`CredentialPool::update_credential`].
    pub async fn update_credential(&self, credential: CredentialConfig) -> Result<()> {
        self.pool.update_credential(credential).await
    }

    /// Enqueue a request. Nothing is sent until [`Dispatcher::get_result`].
    ///
    /// Returns the sequence id assigned within the current pending pool.
    pub fn add_request(&self, url: impl Into<String>, options: RequestOptions) -> usize {
        let mut pending = self.pending.lock();
        let sequence_id = pending.next_id;
        pending.next_id += 1;
        pending
            .requests
            .push(PendingRequest::new(sequence_id, url, options));
        sequence_id
    }

    /// Enqueue failed requests again as fresh requests.
    ///
    /// Meant for [`ResultSet::aborted`], but any failed request is accepted.
    /// Returns the number of requests enqueued.
    pub fn requeue<'a>(&self, failed: impl IntoIterator<Item = &'a FailedRequest>) -> usize {
        failed
            .into_iter()
            .map(|f| self.add_request(f.url.clone(), f.options.clone()))
            .count()
    }

    /// Number of requests waiting for the next [`Dispatcher::get_result`].
    pub fn pending_len(&self) -> usize {
        self.pending.lock().requests.len()
    }

    /// Statistics accumulated over every dispatch of this dispatcher.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Drain the pending pool, dispatch it and return the ordered results.
    ///
    /// Requests added while this runs belong to the next call.
    pub async fn get_result(&self) -> ResultSet {
        let requests = mem::take(&mut *self.pending.lock()).requests;
        let total = requests.len();
        self.stats.add_requests(total);

        info!(
            requests = total,
            credentials = self.pool.len(),
            "Dispatching batch"
        );

        let start = Instant::now();
        let outcomes = self.dispatch(requests).await;
        let result = ResultSet::from_outcomes(outcomes);

        info!(
            status = ?result.status,
            responses = result.responses.len(),
            failed = result.failed_requests.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch finished"
        );

        result
    }

    async fn dispatch(&self, requests: Vec<PendingRequest>) -> Vec<Outcome> {
        let settings = &self.config.dispatch;
        let mut outcomes = Vec::with_capacity(requests.len());
        // Each queued request carries the failure of its latest attempt, if any.
        let mut queue: VecDeque<(PendingRequest, Option<AttemptFailure>)> =
            requests.into_iter().map(|request| (request, None)).collect();
        let mut failed_attempts = 0usize;

        while !queue.is_empty() {
            if failed_attempts >= settings.max_fail_limit {
                warn!(
                    failed_attempts,
                    remaining = queue.len(),
                    "Failure ceiling reached, aborting remaining requests"
                );
                break;
            }

            let mut chunk = Vec::with_capacity(settings.chunk_size);
            let mut handles = Vec::with_capacity(settings.chunk_size);
            let mut stopped: Option<SeineError> = None;

            while chunk.len() < settings.chunk_size {
                let Some((mut request, last_failure)) = queue.pop_front() else {
                    break;
                };

                let url = match self.client.resolve(&request.url) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(
                            sequence_id = request.sequence_id,
                            error = %e,
                            "Request URL cannot be resolved"
                        );
                        outcomes.push(Outcome::Failure {
                            request,
                            error_kind: ErrorKind::FetchError,
                            status: None,
                        });
                        continue;
                    }
                };

                if let Some(throttle) = &self.throttle {
                    throttle.until_ready().await;
                }

                let lease = match self.pool.get_available_token().await {
                    Ok(lease) => lease,
                    Err(e) => {
                        queue.push_front((request, last_failure));
                        stopped = Some(e);
                        break;
                    }
                };

                request.try_count += 1;
                self.stats.record_attempt();
                debug!(
                    sequence_id = request.sequence_id,
                    attempt = request.try_count,
                    client_id = %lease.client_id,
                    "Dispatching request"
                );

                let client = self.client.clone();
                let attempt = request.clone();
                handles.push(tokio::spawn(async move {
                    let started = Instant::now();
                    let result = client.send(&attempt, url, &lease).await;
                    (result, started.elapsed())
                }));
                chunk.push(request);
            }

            // Calls already started always run to completion.
            for (request, joined) in chunk.into_iter().zip(join_all(handles).await) {
                match joined {
                    Ok((Ok(response), latency)) => {
                        self.stats.record_success(latency);
                        outcomes.push(Outcome::Success(response));
                    }
                    Ok((Err(failure), _)) => {
                        failed_attempts += 1;
                        self.stats.record_failure();

                        if failure.kind.is_retryable() && request.try_count < settings.max_try_count
                        {
                            warn!(
                                sequence_id = request.sequence_id,
                                attempt = request.try_count,
                                error_kind = %failure.kind,
                                status = failure.status,
                                "Request failed, scheduling retry"
                            );
                            self.stats.record_retry();
                            queue.push_back((request, Some(failure)));
                        } else {
                            debug!(
                                sequence_id = request.sequence_id,
                                attempt = request.try_count,
                                error_kind = %failure.kind,
                                status = failure.status,
                                "Request failed"
                            );
                            outcomes.push(Outcome::Failure {
                                request,
                                error_kind: failure.kind,
                                status: failure.status,
                            });
                        }
                    }
                    Err(e) => {
                        failed_attempts += 1;
                        self.stats.record_failure();
                        error!(
                            sequence_id = request.sequence_id,
                            error = %e,
                            "Request task did not complete"
                        );
                        outcomes.push(Outcome::Failure {
                            request,
                            error_kind: ErrorKind::InternalError,
                            status: None,
                        });
                    }
                }
            }

            match stopped {
                None => {}
                Some(SeineError::RateLimitExhausted) => {
                    warn!(
                        remaining = queue.len(),
                        "No credential has quota left, aborting remaining requests"
                    );
                    break;
                }
                Some(e) => {
                    error!(error = %e, "Token acquisition failed");
                    if let Some((request, _)) = queue.pop_front() {
                        outcomes.push(Outcome::Failure {
                            request,
                            error_kind: e.kind().unwrap_or(ErrorKind::InternalError),
                            status: None,
                        });
                    }
                    break;
                }
            }
        }

        // Requests that were attempted keep their last failure; only untried ones are aborted.
        let mut aborted = 0;
        for (request, last_failure) in queue {
            let (error_kind, status) = match last_failure {
                Some(failure) => (failure.kind, failure.status),
                None => {
                    aborted += 1;
                    (ErrorKind::Aborted, None)
                }
            };
            outcomes.push(Outcome::Failure {
                request,
                error_kind,
                status,
            });
        }
        if aborted > 0 {
            self.stats.record_aborted(aborted);
        }

        outcomes
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::request::ResultStatus;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
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
            .and(wiremock::matchers::body_string_contains(format!(
                "client_id={client_id}&"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(token)))
            .mount(server)
            .await;
    }

    fn config_for(server: &MockServer) -> Config {
        let mut config = Config::with_api_base(&format!("{}/", server.uri())).unwrap();
        config.pool = PoolConfig {
            poll_rounds: 30,
            poll_interval: Duration::from_millis(50),
        };
        config
    }

    async fn dispatcher_with(server: &MockServer, config: Config, limits: &[(&str, u32)]) -> Dispatcher {
        let dispatcher = Dispatcher::new(config).unwrap();
        for (client_id, per_second) in limits {
            mount_token(server, client_id, &format!("token-{client_id}")).await;
            dispatcher
                .add_credential(CredentialConfig::new(*client_id, "secret").with_limits(*per_second, 1200))
                .await
                .unwrap();
        }
        dispatcher
    }

    #[tokio::test]
    async fn test_respects_per_second_quota_and_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(5)
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 2)]).await;

        for _ in 0..5 {
            dispatcher.add_request("items", RequestOptions::get());
        }

        let start = Instant::now();
        let result = dispatcher.get_result().await;

        assert_eq!(result.status, ResultStatus::Success);
        let ids: Vec<_> = result.responses.iter().map(|r| r.sequence_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_not_found_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        dispatcher.add_request("items", RequestOptions::get());
        dispatcher.add_request("missing", RequestOptions::get());
        dispatcher.add_request("items", RequestOptions::get());

        let result = dispatcher.get_result().await;

        assert_eq!(result.status, ResultStatus::Fail);
        assert_eq!(result.responses.len(), 2);
        assert_eq!(result.failed_requests.len(), 1);
        let failed = &result.failed_requests[0];
        assert_eq!(failed.sequence_id, 1);
        assert_eq!(failed.error_kind, ErrorKind::NotFound);
        assert_eq!(failed.try_count, 1);
        assert_eq!(failed.status, Some(404));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        dispatcher.add_request("flaky", RequestOptions::get());
        let result = dispatcher.get_result().await;

        assert!(result.is_success());
        assert_eq!(result.responses.len(), 1);
        assert_eq!(result.responses[0].try_count, 3);
        assert_eq!(result.responses[0].text(), "done");

        let stats = dispatcher.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.retries, 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_exhausts_tries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        dispatcher.add_request("down", RequestOptions::get());
        let result = dispatcher.get_result().await;

        assert_eq!(result.status, ResultStatus::Fail);
        let failed = &result.failed_requests[0];
        assert_eq!(failed.error_kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(failed.try_count, 3);
    }

    #[tokio::test]
    async fn test_no_credentials_aborts_everything() {
        let server = MockServer::start().await;
        let dispatcher = Dispatcher::new(config_for(&server)).unwrap();

        dispatcher.add_request("a", RequestOptions::get());
        dispatcher.add_request("b", RequestOptions::get());

        let start = Instant::now();
        let result = dispatcher.get_result().await;

        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(result.status, ResultStatus::Fail);
        assert_eq!(result.failed_requests.len(), 2);
        assert!(
            result
                .failed_requests
                .iter()
                .all(|f| f.error_kind == ErrorKind::Aborted && f.try_count == 0)
        );
        assert_eq!(result.aborted().count(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_aborts_untried_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        let mut config = config_for(&server);
        config.pool.poll_rounds = 1;
        let dispatcher = dispatcher_with(&server, config, &[("a", 2)]).await;

        for _ in 0..4 {
            dispatcher.add_request("items", RequestOptions::get());
        }
        let result = dispatcher.get_result().await;

        let ids: Vec<_> = result.responses.iter().map(|r| r.sequence_id).collect();
        assert_eq!(ids, vec![0, 1]);
        let aborted: Vec<_> = result.aborted().map(|f| f.sequence_id).collect();
        assert_eq!(aborted, vec![2, 3]);
        assert_eq!(dispatcher.stats().aborted, 2);

        assert_eq!(dispatcher.requeue(result.aborted()), 2);
        assert_eq!(dispatcher.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_bearer_overrides_and_caller_headers_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("authorization", "Bearer token-a"))
            .and(header("x-campus", "paris"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        dispatcher.add_request(
            "me",
            RequestOptions::get()
                .with_header("Authorization", "Bearer stale")
                .with_header("X-Campus", "paris"),
        );
        let result = dispatcher.get_result().await;

        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_spreads_load_over_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 2), ("b", 2)]).await;

        for _ in 0..4 {
            dispatcher.add_request("items", RequestOptions::get());
        }
        let start = Instant::now();
        let result = dispatcher.get_result().await;

        assert!(result.is_success());
        let used: Vec<_> = result.responses.iter().map(|r| r.client_id.as_str()).collect();
        assert_eq!(used, vec!["a", "a", "b", "b"]);
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_order_restored_after_out_of_order_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        dispatcher.add_request("slow", RequestOptions::get());
        dispatcher.add_request("fast", RequestOptions::get());
        dispatcher.add_request("slow", RequestOptions::get());
        let result = dispatcher.get_result().await;

        let urls: Vec<_> = result.responses.iter().map(|r| r.url.as_str()).collect();
        assert!(urls[0].ends_with("/slow"));
        assert!(urls[1].ends_with("/fast"));
        assert!(urls[2].ends_with("/slow"));
    }

    #[tokio::test]
    async fn test_drain_starts_fresh_pool() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        assert_eq!(dispatcher.add_request("one", RequestOptions::get()), 0);
        assert_eq!(dispatcher.add_request("two", RequestOptions::get()), 1);
        assert_eq!(dispatcher.pending_len(), 2);

        let first = dispatcher.get_result().await;
        assert_eq!(first.responses.len(), 2);
        assert_eq!(dispatcher.pending_len(), 0);

        assert_eq!(dispatcher.add_request("three", RequestOptions::get()), 0);
        let second = dispatcher.get_result().await;
        assert_eq!(second.responses.len(), 1);
        assert_eq!(second.responses[0].sequence_id, 0);
    }

    #[tokio::test]
    async fn test_failure_ceiling_aborts_rest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        let mut config = config_for(&server);
        config.dispatch.chunk_size = 2;
        config.dispatch.max_fail_limit = 2;
        let dispatcher = dispatcher_with(&server, config, &[("a", 50)]).await;

        for _ in 0..5 {
            dispatcher.add_request("gone", RequestOptions::get());
        }
        let result = dispatcher.get_result().await;

        let kinds: Vec<_> = result.failed_requests.iter().map(|f| f.error_kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::BadRequest,
                ErrorKind::BadRequest,
                ErrorKind::Aborted,
                ErrorKind::Aborted,
                ErrorKind::Aborted,
            ]
        );
    }

    #[tokio::test]
    async fn test_unresolvable_url_fails_without_quota() {
        let server = MockServer::start().await;
        let mut config = config_for(&server);
        config.pool.poll_rounds = 1;
        let dispatcher = dispatcher_with(&server, config, &[("a", 1)]).await;

        dispatcher.add_request("http://[broken", RequestOptions::get());
        let result = dispatcher.get_result().await;

        let failed = &result.failed_requests[0];
        assert_eq!(failed.error_kind, ErrorKind::FetchError);
        assert_eq!(failed.try_count, 0);
        assert_eq!(dispatcher.stats().attempts, 0);
        // The single per-second slot is still free.
        assert!(dispatcher.pool().get_available_token().await.is_ok());
    }

    #[tokio::test]
    async fn test_global_cap_spaces_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let mut config = config_for(&server);
        config.dispatch.max_requests_per_second = Some(2);
        let dispatcher = dispatcher_with(&server, config, &[("a", 50)]).await;

        for _ in 0..4 {
            dispatcher.add_request("items", RequestOptions::get());
        }
        let start = Instant::now();
        let result = dispatcher.get_result().await;

        assert!(result.is_success());
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_pending_retry_keeps_last_failure_on_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let mut config = config_for(&server);
        config.pool.poll_rounds = 1;
        let dispatcher = dispatcher_with(&server, config, &[("a", 1)]).await;

        dispatcher.add_request("down", RequestOptions::get());
        dispatcher.add_request("down", RequestOptions::get());
        let result = dispatcher.get_result().await;

        assert_eq!(result.failed_requests.len(), 2);
        let attempted = &result.failed_requests[0];
        assert_eq!(attempted.error_kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(attempted.try_count, 1);
        assert_eq!(attempted.status, Some(503));

        let untried = &result.failed_requests[1];
        assert_eq!(untried.error_kind, ErrorKind::Aborted);
        assert_eq!(untried.try_count, 0);

        let aborted: Vec<_> = result.aborted().map(|f| f.sequence_id).collect();
        assert_eq!(aborted, vec![1]);
        assert_eq!(dispatcher.stats().aborted, 1);
    }

    #[tokio::test]
    async fn test_connection_refused_retried_as_fetch_error() {
        let server = MockServer::start().await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        // Bind then drop a listener so the port is known to refuse connections.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        dispatcher.add_request(format!("http://127.0.0.1:{port}/items"), RequestOptions::get());
        let result = dispatcher.get_result().await;

        assert_eq!(result.status, ResultStatus::Fail);
        let failed = &result.failed_requests[0];
        assert_eq!(failed.error_kind, ErrorKind::FetchError);
        assert_eq!(failed.try_count, 3);
        assert_eq!(failed.status, None);
        assert_eq!(dispatcher.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_too_many_requests_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("free"))
            .mount(&server)
            .await;
        let dispatcher = dispatcher_with(&server, config_for(&server), &[("a", 10)]).await;

        dispatcher.add_request("busy", RequestOptions::get());
        let result = dispatcher.get_result().await;

        assert!(result.is_success());
        assert_eq!(result.responses[0].try_count, 3);
        assert_eq!(result.responses[0].text(), "free");
    }
}
