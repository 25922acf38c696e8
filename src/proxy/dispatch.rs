//! Request dispatch with retry logic
//!
//! Turns one logical request into as many proxied attempts as it takes.
//! Every attempt samples a proxy, classifies the outcome and feeds it back
//! into the pool:
//!
//! - transport failure: the proxy gets a failure, retry elsewhere
//! - 403: the proxy is assumed banned and excluded, retry elsewhere
//! - 429/503: the destination is throttling the pool, back off and retry
//! - anything else: the destination answered, return it

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::{self, CongestionPolicy, PoolWideBackoff};
use super::pool::{ProxyPool, SampledProxy};
use super::transport::Transport;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::models::{
    AttemptOutcome, AttemptRecord, DispatchRequest, DispatchResponse, RequestOptions,
};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Failed attempts tolerated before the request is abandoned
    pub max_proxy_attempts: u32,
    /// Timeout for every proxied attempt
    pub default_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for DispatcherConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_proxy_attempts: config.max_proxy_attempts,
            default_timeout: config.default_timeout,
        }
    }
}

/// How a response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Destination blocked the proxy
    Blocked,
    /// Destination is throttling the pool
    RateLimited,
    /// A real answer, whatever the code
    Answer,
}

pub fn classify_status(status: StatusCode) -> StatusClass {
    if status == StatusCode::FORBIDDEN {
        StatusClass::Blocked
    } else if backoff::is_rate_limit(status) {
        StatusClass::RateLimited
    } else {
        StatusClass::Answer
    }
}

/// Sends requests through the proxy pool
pub struct Dispatcher {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn CongestionPolicy>,
    config: DispatcherConfig,
    attempt_sender: Option<broadcast::Sender<AttemptRecord>>,
}

impl Dispatcher {
    pub fn new(pool: Arc<ProxyPool>, transport: Arc<dyn Transport>, config: &PoolConfig) -> Self {
        Self {
            pool,
            transport,
            policy: Arc::new(PoolWideBackoff::from_config(config)),
            config: DispatcherConfig::from(config),
            attempt_sender: None,
        }
    }

    /// Replace the rate-limit handling
    pub fn with_policy(mut self, policy: Arc<dyn CongestionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Publish every attempt on `sender`
    pub fn with_attempt_sender(mut self, sender: broadcast::Sender<AttemptRecord>) -> Self {
        self.attempt_sender = Some(sender);
        self
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<DispatchResponse> {
        let request = DispatchRequest::new(method, url, options)?;
        self.dispatch(&request).await
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::GET, url, options).await
    }

    pub async fn options(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::OPTIONS, url, options).await
    }

    pub async fn head(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::HEAD, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::POST, url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::PUT, url, options).await
    }

    pub async fn patch(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::PATCH, url, options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<DispatchResponse> {
        self.request(Method::DELETE, url, options).await
    }

    /// Run the retry loop for one logical request
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse> {
        let mut failures: u32 = 0;
        let mut rate_limited: u32 = 0;

        loop {
            let proxy = self.pool.sample().await?;
            debug!("Using {}", proxy.address);

            let attempt_start = Instant::now();
            match self
                .transport
                .send(&proxy.address, request, self.config.default_timeout)
                .await
            {
                Err(e) if !e.is_proxy_failure() => {
                    self.broadcast_attempt(
                        &proxy,
                        request,
                        AttemptOutcome::TransportFailure,
                        None,
                        attempt_start.elapsed(),
                        Some(e.to_string()),
                    );
                    return Err(PoolError::InvalidRequest(e.to_string()));
                }
                Err(e) => {
                    debug!("{}: {}", proxy.address, e);
                    self.pool.record_failure(&proxy).await;
                    failures += 1;
                    self.broadcast_attempt(
                        &proxy,
                        request,
                        AttemptOutcome::TransportFailure,
                        None,
                        attempt_start.elapsed(),
                        Some(e.to_string()),
                    );
                }
                Ok(response) => match classify_status(response.status) {
                    StatusClass::Blocked => {
                        debug!(
                            "{}: Down due to http status {}",
                            proxy.address,
                            response.status.as_u16()
                        );
                        self.pool.mark_excluded(&proxy).await;
                        failures += 1;
                        self.broadcast_attempt(
                            &proxy,
                            request,
                            AttemptOutcome::Blocked,
                            Some(response.status),
                            response.elapsed,
                            None,
                        );
                    }
                    StatusClass::RateLimited => {
                        rate_limited += 1;
                        debug!(
                            "{}: Probable rate limit due to http status {}",
                            proxy.address,
                            response.status.as_u16()
                        );
                        debug!("{:?}", response.headers);
                        self.broadcast_attempt(
                            &proxy,
                            request,
                            AttemptOutcome::RateLimited,
                            Some(response.status),
                            response.elapsed,
                            None,
                        );

                        match self.policy.on_rate_limited(
                            &proxy.address,
                            response.status,
                            &response.headers,
                            rate_limited,
                        ) {
                            Some(delay) => {
                                info!("Backing off for {:?} before retrying", delay);
                                tokio::time::sleep(delay).await;
                            }
                            None => {
                                warn!(
                                    "Giving up on {} {} after {} rate-limited attempts",
                                    request.method, request.url, rate_limited
                                );
                                return Err(PoolError::CongestionTimeout {
                                    method: request.method.to_string(),
                                    url: request.url.to_string(),
                                    backoffs: rate_limited.saturating_sub(1),
                                });
                            }
                        }
                    }
                    StatusClass::Answer => {
                        debug!(
                            "{}: Latency {:.2} sec",
                            proxy.address,
                            response.elapsed.as_secs_f64()
                        );
                        self.pool
                            .record_latency(&proxy, response.elapsed.as_secs_f64())
                            .await;
                        self.pool.record_success(&proxy).await;
                        self.broadcast_attempt(
                            &proxy,
                            request,
                            AttemptOutcome::Success,
                            Some(response.status),
                            response.elapsed,
                            None,
                        );
                        return Ok(response);
                    }
                },
            }

            if failures > self.config.max_proxy_attempts {
                error!(
                    "Too many failures for {} {} ({} attempts)",
                    request.method, request.url, failures
                );
                return Err(PoolError::TooManyFailures {
                    method: request.method.to_string(),
                    url: request.url.to_string(),
                    attempts: failures,
                });
            }
        }
    }

    fn broadcast_attempt(
        &self,
        proxy: &SampledProxy,
        request: &DispatchRequest,
        outcome: AttemptOutcome,
        status: Option<StatusCode>,
        elapsed: Duration,
        error_message: Option<String>,
    ) {
        let Some(sender) = &self.attempt_sender else {
            return;
        };

        let record = AttemptRecord {
            proxy_address: proxy.address.to_string(),
            method: request.method.to_string(),
            requested_url: request.url.to_string(),
            outcome,
            status_code: status.map(|s| s.as_u16()),
            response_time: elapsed.as_millis() as u64,
            error_message,
            timestamp: chrono::Utc::now(),
        };
        // No subscribers is fine
        let _ = sender.send(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::models::ProxyAddress;
    use crate::providers::{ProviderRegistry, StaticProvider};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::HeaderMap;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio_test::assert_err;

    type Reply = std::result::Result<(StatusCode, Duration), TransportError>;

    /// Plays back scripted replies per proxy port, then a fallback reply
    struct ScriptedTransport {
        scripts: Mutex<HashMap<u16, VecDeque<Reply>>>,
        fallback: Reply,
        calls: Mutex<HashMap<u16, usize>>,
    }

    impl ScriptedTransport {
        fn new(fallback: Reply) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                fallback,
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn script(self, port: u16, replies: Vec<Reply>) -> Self {
            self.scripts.lock().unwrap().insert(port, replies.into());
            self
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            proxy: &ProxyAddress,
            _request: &DispatchRequest,
            _timeout: Duration,
        ) -> std::result::Result<DispatchResponse, TransportError> {
            *self.calls.lock().unwrap().entry(proxy.port).or_default() += 1;
            let reply = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&proxy.port)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| self.fallback.clone());
            let (status, elapsed) = reply?;
            Ok(DispatchResponse {
                status,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"Got GET"),
                elapsed,
                proxy: proxy.clone(),
            })
        }
    }

    fn ok(status: StatusCode) -> Reply {
        Ok((status, Duration::from_millis(5)))
    }

    fn pool_of(ports: &[u16]) -> Arc<ProxyPool> {
        let addresses: Vec<String> = ports
            .iter()
            .map(|p| format!("http://localhost:{}", p))
            .collect();
        let registry =
            ProviderRegistry::new(vec![Arc::new(StaticProvider::new("test", addresses))]).unwrap();
        Arc::new(ProxyPool::new(registry, 0.1).unwrap())
    }

    fn fast_config(max_proxy_attempts: u32, max_backoffs: u32) -> PoolConfig {
        PoolConfig {
            max_proxy_attempts,
            backoff_interval: Duration::from_millis(1),
            max_backoffs,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::FORBIDDEN), StatusClass::Blocked);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            StatusClass::RateLimited
        );
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Answer);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::Answer);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Answer
        );
    }

    #[tokio::test]
    async fn test_success_records_latency() {
        let transport = Arc::new(ScriptedTransport::new(Ok((
            StatusCode::OK,
            Duration::from_millis(250),
        ))));
        let pool = pool_of(&[9000]);
        let dispatcher = Dispatcher::new(pool.clone(), transport, &fast_config(30, 10));

        let response = dispatcher
            .get("http://localhost:8000", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "Got GET");
        assert_eq!(response.proxy.port, 9000);

        let records = pool.good_records().await;
        assert_eq!(records[0].success_count, 1);
        assert!((records[0].latency - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_destination_errors_are_answers() {
        let transport = Arc::new(ScriptedTransport::new(ok(StatusCode::NOT_FOUND)));
        let pool = pool_of(&[9000]);
        let dispatcher = Dispatcher::new(pool.clone(), transport.clone(), &fast_config(30, 10));

        let response = dispatcher
            .post("http://localhost:8000/missing", RequestOptions::new().body("x"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(transport.total_calls(), 1);
        assert_eq!(pool.good_records().await[0].success_count, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_retries_on_another_proxy() {
        let transport = Arc::new(
            ScriptedTransport::new(ok(StatusCode::OK))
                .script(9000, vec![Err(TransportError::Connect("refused".into()))]),
        );
        let pool = pool_of(&[9000, 9001]);
        let dispatcher = Dispatcher::new(pool.clone(), transport.clone(), &fast_config(30, 10));

        // Keep going until the broken proxy has been tried once
        for _ in 0..50 {
            dispatcher
                .get("http://localhost:8000", RequestOptions::new())
                .await
                .unwrap();
        }

        let good = pool.good_records().await;
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].address.port, 9001);
        assert_eq!(transport.calls.lock().unwrap().get(&9000).copied(), Some(1));
    }

    #[tokio::test]
    async fn test_forbidden_excludes_proxy() {
        let transport = Arc::new(
            ScriptedTransport::new(ok(StatusCode::OK))
                .script(9000, vec![ok(StatusCode::FORBIDDEN)]),
        );
        let pool = pool_of(&[9000, 9001]);
        let dispatcher = Dispatcher::new(pool.clone(), transport.clone(), &fast_config(30, 10));

        for _ in 0..50 {
            let response = dispatcher
                .get("http://localhost:8000", RequestOptions::new())
                .await
                .unwrap();
            assert_eq!(response.status, StatusCode::OK);
        }

        let snapshot = pool.snapshot().await;
        let blocked = snapshot
            .proxies
            .iter()
            .find(|p| p.address == "http://localhost:9000")
            .unwrap();
        assert!(blocked.excluded);
        assert_eq!(blocked.failure_count, 0);
        assert_eq!(transport.calls.lock().unwrap().get(&9000).copied(), Some(1));
    }

    #[tokio::test]
    async fn test_too_many_failures() {
        let transport = Arc::new(ScriptedTransport::new(Err(TransportError::Timeout)));
        let pool = pool_of(&[9000, 9001, 9002]);
        let dispatcher = Dispatcher::new(pool, transport.clone(), &fast_config(4, 10));

        let err = assert_err!(
            dispatcher
                .get("http://localhost:8000/page", RequestOptions::new())
                .await
        );
        match err {
            PoolError::TooManyFailures {
                method,
                url,
                attempts,
            } => {
                assert_eq!(method, "GET");
                assert_eq!(url, "http://localhost:8000/page");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(transport.total_calls(), 5);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_count_as_failure() {
        let transport = Arc::new(ScriptedTransport::new(ok(StatusCode::OK)).script(
            9000,
            vec![
                ok(StatusCode::TOO_MANY_REQUESTS),
                ok(StatusCode::SERVICE_UNAVAILABLE),
                ok(StatusCode::TOO_MANY_REQUESTS),
            ],
        ));
        let pool = pool_of(&[9000]);
        // A single tolerated failure would not survive three rate limits if they counted
        let dispatcher = Dispatcher::new(pool.clone(), transport.clone(), &fast_config(0, 10));

        let response = dispatcher
            .get("http://localhost:8000", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(transport.total_calls(), 4);

        let record = &pool.good_records().await[0];
        assert_eq!(record.failure_count, 0);
        assert!(!record.excluded);
    }

    #[tokio::test]
    async fn test_congestion_ceiling() {
        let transport = Arc::new(ScriptedTransport::new(ok(StatusCode::TOO_MANY_REQUESTS)));
        let pool = pool_of(&[9000, 9001]);
        let dispatcher = Dispatcher::new(pool, transport.clone(), &fast_config(30, 2));

        let err = assert_err!(
            dispatcher
                .get("http://localhost:8000", RequestOptions::new())
                .await
        );
        assert!(matches!(err, PoolError::CongestionTimeout { backoffs: 2, .. }));
        assert_eq!(transport.total_calls(), 3);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_blamed_on_proxy() {
        let transport = Arc::new(ScriptedTransport::new(Err(TransportError::Request(
            "bad header".into(),
        ))));
        let pool = pool_of(&[9000]);
        let dispatcher = Dispatcher::new(pool.clone(), transport.clone(), &fast_config(30, 10));

        let err = assert_err!(
            dispatcher
                .get("http://localhost:8000", RequestOptions::new())
                .await
        );
        assert!(matches!(err, PoolError::InvalidRequest(_)));
        assert_eq!(transport.total_calls(), 1);
        assert_eq!(pool.good_records().await[0].failure_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_url_never_reaches_transport() {
        let transport = Arc::new(ScriptedTransport::new(ok(StatusCode::OK)));
        let dispatcher = Dispatcher::new(pool_of(&[9000]), transport.clone(), &fast_config(30, 10));

        let err = assert_err!(dispatcher.get("no scheme", RequestOptions::new()).await);
        assert!(matches!(err, PoolError::InvalidRequest(_)));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_proxies_is_fatal() {
        let registry = ProviderRegistry::new(vec![Arc::new(StaticProvider::new(
            "empty",
            Vec::<String>::new(),
        ))])
        .unwrap();
        let pool = Arc::new(ProxyPool::new(registry, 0.1).unwrap());
        let transport = Arc::new(ScriptedTransport::new(ok(StatusCode::OK)));
        let dispatcher = Dispatcher::new(pool, transport.clone(), &fast_config(30, 10));

        let err = assert_err!(
            dispatcher
                .delete("http://localhost:8000", RequestOptions::new())
                .await
        );
        assert!(matches!(err, PoolError::NoProxiesAvailable));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_attempts_are_broadcast() {
        let transport = Arc::new(
            ScriptedTransport::new(ok(StatusCode::OK))
                .script(9000, vec![ok(StatusCode::FORBIDDEN)]),
        );
        let (tx, mut rx) = broadcast::channel(16);
        let dispatcher = Dispatcher::new(pool_of(&[9000]), transport, &fast_config(30, 10))
            .with_attempt_sender(tx);

        let response = dispatcher
            .head("http://localhost:8000", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.outcome, AttemptOutcome::Blocked);
        assert_eq!(first.status_code, Some(403));
        assert_eq!(first.method, "HEAD");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.outcome, AttemptOutcome::Success);
        assert_eq!(second.proxy_address, "http://localhost:9000");
    }

    struct GiveUpImmediately;

    impl CongestionPolicy for GiveUpImmediately {
        fn on_rate_limited(
            &self,
            _proxy: &ProxyAddress,
            _status: StatusCode,
            _headers: &HeaderMap,
            _rate_limited: u32,
        ) -> Option<Duration> {
            None
        }
    }

    #[tokio::test]
    async fn test_custom_congestion_policy() {
        let transport = Arc::new(ScriptedTransport::new(ok(StatusCode::SERVICE_UNAVAILABLE)));
        let dispatcher = Dispatcher::new(pool_of(&[9000]), transport.clone(), &fast_config(30, 10))
            .with_policy(Arc::new(GiveUpImmediately));

        let err = assert_err!(
            dispatcher
                .put("http://localhost:8000", RequestOptions::new())
                .await
        );
        assert!(matches!(err, PoolError::CongestionTimeout { backoffs: 0, .. }));
        assert_eq!(transport.total_calls(), 1);
    }
}
