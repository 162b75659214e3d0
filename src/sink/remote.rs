//! HTTP delivery of snapshots with bounded, fixed-delay retry.
//!
//! Each `consume` runs one delivery through a small state machine:
//!
//! ```text
//! Attempting(0) --ok--> Delivered
//!      |
//!      +--retryable, n < max--> sleep(delay) --> Attempting(n + 1)
//!      +--retryable, n == max--> Abandoned
//!      +--unexpected----------> Abandoned
//! ```
//!
//! Abandoned snapshots are dropped; there is no queue across ticks.

use super::{ConsumeError, InitError, ShutdownError, Sink};
use crate::config::Config;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Attempt `n` is in flight; `n == 0` is the initial attempt
    Attempting(u32),
    Delivered,
    Abandoned,
}

/// Terminal state of one delivery and how many POSTs it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub state: DeliveryState,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("endpoint answered with status {0}")]
    Status(u16),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected delivery fault: {0}")]
    Unexpected(String),
}

impl DeliveryFailure {
    /// Status, network and timeout failures are retried uniformly
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryFailure::Unexpected(_))
    }
}

impl From<reqwest::Error> for DeliveryFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            DeliveryFailure::Unexpected(err.to_string())
        } else if err.is_timeout() {
            DeliveryFailure::Timeout
        } else {
            DeliveryFailure::Network(err.to_string())
        }
    }
}

/// Moves payload bytes to the endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reachability check; never affects enablement
    async fn probe(&self) -> Result<(), DeliveryFailure>;

    /// One delivery attempt of a JSON body
    async fn post(&self, body: &[u8]) -> Result<(), DeliveryFailure>;
}

/// `reqwest` transport; the client is built once and reused for every tick
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sysmonitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn probe(&self) -> Result<(), DeliveryFailure> {
        let response = self.client.get(self.endpoint.clone()).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryFailure::Status(response.status().as_u16()))
        }
    }

    async fn post(&self, body: &[u8]) -> Result<(), DeliveryFailure> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryFailure::Status(response.status().as_u16()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.plugins.api_poster.retry_attempts,
            delay: config.plugins.api_poster.retry_delay(),
        }
    }
}

pub struct RemoteSink {
    // None when disabled by configuration
    transport: Option<Box<dyn Transport>>,
    policy: RetryPolicy,
}

impl RemoteSink {
    /// Build from configuration.
    ///
    /// An unusable endpoint or HTTP client disables the sink; it never
    /// stops the process.
    pub fn from_config(config: &Config) -> Self {
        let policy = RetryPolicy::from_config(config);
        if !config.api_enabled() {
            return Self::disabled(policy);
        }

        let endpoint = match config.api.endpoint_url() {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "ApiPoster sink disabled: bad endpoint");
                return Self::disabled(policy);
            }
        };

        match HttpTransport::new(endpoint, config.api.timeout()) {
            Ok(transport) => Self::with_transport(Box::new(transport), policy),
            Err(e) => {
                error!(error = %e, "ApiPoster sink disabled: cannot build HTTP client");
                Self::disabled(policy)
            }
        }
    }

    pub fn with_transport(transport: Box<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport: Some(transport),
            policy,
        }
    }

    fn disabled(policy: RetryPolicy) -> Self {
        Self {
            transport: None,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one snapshot through the retry state machine.
    pub async fn deliver(&self, snapshot: &Snapshot) -> DeliveryOutcome {
        let Some(transport) = self.transport.as_deref() else {
            return DeliveryOutcome {
                state: DeliveryState::Abandoned,
                attempts: 0,
            };
        };

        let body = match serde_json::to_vec(&snapshot.payload()) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "cannot serialize payload; delivery abandoned");
                return DeliveryOutcome {
                    state: DeliveryState::Abandoned,
                    attempts: 0,
                };
            }
        };

        let max_retries = self.policy.max_retries;
        let mut attempts = 0;
        let mut state = DeliveryState::Attempting(0);

        loop {
            state = match state {
                DeliveryState::Attempting(n) => {
                    attempts += 1;
                    match transport.post(&body).await {
                        Ok(()) => {
                            debug!(attempt = n, "snapshot delivered");
                            DeliveryState::Delivered
                        }
                        Err(failure) if !failure.is_retryable() => {
                            error!(error = %failure, "delivery abandoned");
                            DeliveryState::Abandoned
                        }
                        Err(failure) if n < max_retries => {
                            warn!(
                                error = %failure,
                                retry = n + 1,
                                max_retries,
                                delay_secs = self.policy.delay.as_secs_f64(),
                                "delivery failed; retrying"
                            );
                            tokio::time::sleep(self.policy.delay).await;
                            DeliveryState::Attempting(n + 1)
                        }
                        Err(failure) => {
                            error!(error = %failure, max_retries, "delivery abandoned after retries");
                            DeliveryState::Abandoned
                        }
                    }
                }
                terminal => return DeliveryOutcome { state: terminal, attempts },
            };
        }
    }
}

#[async_trait]
impl Sink for RemoteSink {
    fn name(&self) -> &str {
        "ApiPoster"
    }

    fn enabled(&self) -> bool {
        self.transport.is_some()
    }

    async fn initialize(&self) -> Result<(), InitError> {
        let Some(transport) = self.transport.as_deref() else {
            info!("ApiPoster sink is disabled");
            return Ok(());
        };

        match transport.probe().await {
            Ok(()) => info!("ApiPoster sink initialized; endpoint reachable"),
            Err(e) => warn!(error = %e, "ApiPoster endpoint probe failed; sink stays enabled"),
        }
        Ok(())
    }

    async fn consume(&self, snapshot: &Snapshot) -> Result<(), ConsumeError> {
        if self.enabled() {
            self.deliver(snapshot).await;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ShutdownError> {
        info!("ApiPoster sink shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Usage;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Replays scripted results, then repeats the fallback forever
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(), DeliveryFailure>>>,
        fallback: fn() -> Result<(), DeliveryFailure>,
        posts: Arc<AtomicU32>,
        bodies: Arc<Mutex<Vec<Vec<u8>>>>,
        probe_ok: bool,
    }

    impl ScriptedTransport {
        fn new(fallback: fn() -> Result<(), DeliveryFailure>) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback,
                posts: Arc::new(AtomicU32::new(0)),
                bodies: Arc::new(Mutex::new(Vec::new())),
                probe_ok: true,
            }
        }

        fn then(self, result: Result<(), DeliveryFailure>) -> Self {
            self.script.lock().unwrap().push_back(result);
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn probe(&self) -> Result<(), DeliveryFailure> {
            if self.probe_ok {
                Ok(())
            } else {
                Err(DeliveryFailure::Network("connection refused".into()))
            }
        }

        async fn post(&self, body: &[u8]) -> Result<(), DeliveryFailure> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            self.bodies.lock().unwrap().push(body.to_vec());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }

    fn always_503() -> Result<(), DeliveryFailure> {
        Err(DeliveryFailure::Status(503))
    }

    fn always_ok() -> Result<(), DeliveryFailure> {
        Ok(())
    }

    fn policy(max_retries: u32, delay_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::from_secs(delay_secs),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot::new(42.0, Usage::new(8 << 20, 16 << 20), Usage::new(1 << 30, 4 << 30))
    }

    #[test]
    fn retryable_classification() {
        assert!(DeliveryFailure::Status(500).is_retryable());
        assert!(DeliveryFailure::Status(404).is_retryable());
        assert!(DeliveryFailure::Timeout.is_retryable());
        assert!(DeliveryFailure::Network("reset".into()).is_retryable());
        assert!(!DeliveryFailure::Unexpected("boom".into()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let transport = ScriptedTransport::new(always_ok);
        let posts = Arc::clone(&transport.posts);
        let sink = RemoteSink::with_transport(Box::new(transport), policy(3, 5));

        let outcome = sink.deliver(&snapshot()).await;

        assert_eq!(outcome.state, DeliveryState::Delivered);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(posts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_make_four_attempts() {
        let transport = ScriptedTransport::new(always_503);
        let posts = Arc::clone(&transport.posts);
        let sink = RemoteSink::with_transport(Box::new(transport), policy(3, 5));

        let started = Instant::now();
        let outcome = sink.deliver(&snapshot()).await;

        assert_eq!(outcome.state, DeliveryState::Abandoned);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(posts.load(Ordering::SeqCst), 4);
        // three fixed pauses between four attempts, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_fault_abandons_immediately() {
        let transport = ScriptedTransport::new(always_ok)
            .then(Err(DeliveryFailure::Unexpected("bad request builder".into())));
        let posts = Arc::clone(&transport.posts);
        let sink = RemoteSink::with_transport(Box::new(transport), policy(3, 5));

        let started = Instant::now();
        let outcome = sink.deliver(&snapshot()).await;

        assert_eq!(outcome.state, DeliveryState::Abandoned);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(posts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let transport = ScriptedTransport::new(always_ok)
            .then(Err(DeliveryFailure::Timeout))
            .then(Err(DeliveryFailure::Network("reset by peer".into())));
        let sink = RemoteSink::with_transport(Box::new(transport), policy(3, 2));

        let started = Instant::now();
        let outcome = sink.deliver(&snapshot()).await;

        assert_eq!(outcome.state, DeliveryState::Delivered);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_fault_after_retry_does_not_consume_more_slots() {
        let transport = ScriptedTransport::new(always_ok)
            .then(Err(DeliveryFailure::Status(502)))
            .then(Err(DeliveryFailure::Unexpected("panic in encoder".into())));
        let sink = RemoteSink::with_transport(Box::new(transport), policy(3, 1));

        let outcome = sink.deliver(&snapshot()).await;

        assert_eq!(outcome.state, DeliveryState::Abandoned);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let transport = ScriptedTransport::new(always_503);
        let sink = RemoteSink::with_transport(Box::new(transport), policy(0, 5));

        let outcome = sink.deliver(&snapshot()).await;

        assert_eq!(outcome.state, DeliveryState::Abandoned);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consume_never_fails_even_when_abandoned() {
        let transport = ScriptedTransport::new(always_503);
        let sink = RemoteSink::with_transport(Box::new(transport), policy(1, 1));

        assert!(sink.consume(&snapshot()).await.is_ok());
    }

    #[tokio::test]
    async fn posts_rounded_json_payload() {
        let transport = ScriptedTransport::new(always_ok);
        let bodies = Arc::clone(&transport.bodies);
        let sink = RemoteSink::with_transport(Box::new(transport), policy(0, 0));

        sink.deliver(&snapshot()).await;

        let bodies = bodies.lock().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bodies[0]).unwrap();
        assert_eq!(value["cpu"], serde_json::json!(42.0));
        assert_eq!(value["ram_used"], serde_json::json!(8.0));
        assert_eq!(value["ram_percent"], serde_json::json!(50.0));
        assert_eq!(value["disk_total"], serde_json::json!(4096.0));
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn failed_probe_keeps_sink_enabled() {
        let mut transport = ScriptedTransport::new(always_ok);
        transport.probe_ok = false;
        let sink = RemoteSink::with_transport(Box::new(transport), policy(3, 5));

        assert!(sink.initialize().await.is_ok());
        assert!(sink.enabled());
    }

    #[tokio::test]
    async fn bad_endpoint_disables_sink() {
        let mut config = Config::default();
        config.api.endpoint = "not a url".into();
        let sink = RemoteSink::from_config(&config);

        assert!(!sink.enabled());
        assert!(sink.initialize().await.is_ok());
        assert!(sink.consume(&snapshot()).await.is_ok());
    }

    #[test]
    fn valid_endpoint_enables_sink_with_configured_policy() {
        let mut config = Config::default();
        config.api.endpoint = "http://127.0.0.1:9/metrics".into();
        config.plugins.api_poster.retry_attempts = 2;
        config.plugins.api_poster.retry_delay_seconds = 7;
        let sink = RemoteSink::from_config(&config);

        assert!(sink.enabled());
        assert_eq!(sink.policy(), policy(2, 7));
    }

    mod http {
        use super::super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};
        use tokio::task::JoinHandle;

        const OK: &str = "HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
        const SERVER_ERROR: &str =
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

        /// Accepts one connection and returns the raw request, lowercased.
        /// `None` holds the connection open without answering.
        async fn serve_once(reply: Option<&'static str>) -> (Url, JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = Url::parse(&format!("http://{}/ingest", listener.local_addr().unwrap())).unwrap();
            let handle = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                match reply {
                    Some(reply) => stream.write_all(reply.as_bytes()).await.unwrap(),
                    None => tokio::time::sleep(Duration::from_secs(30)).await,
                }
                request
            });
            (url, handle)
        }

        async fn read_request(stream: &mut TcpStream) -> String {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_ascii_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .map(|v| v.trim().parse::<usize>().unwrap())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            String::from_utf8_lossy(&buf).to_ascii_lowercase()
        }

        fn transport(url: Url, timeout: Duration) -> HttpTransport {
            HttpTransport::new(url, timeout).unwrap()
        }

        #[tokio::test]
        async fn server_error_maps_to_retryable_status() {
            let (url, server) = serve_once(Some(SERVER_ERROR)).await;

            let result = transport(url, Duration::from_secs(5)).post(br#"{"cpu":1.0}"#).await;

            match result {
                Err(failure @ DeliveryFailure::Status(500)) => assert!(failure.is_retryable()),
                other => panic!("expected status 500, got {other:?}"),
            }
            let request = server.await.unwrap();
            assert!(request.starts_with("post /ingest http/1.1\r\n"), "{request}");
            assert!(request.contains("\r\ncontent-type: application/json\r\n"), "{request}");
            assert!(request.contains("user-agent: sysmonitor/"), "{request}");
            assert!(request.ends_with(r#"{"cpu":1.0}"#), "{request}");
        }

        #[tokio::test]
        async fn success_status_is_delivered() {
            let (url, server) = serve_once(Some(OK)).await;

            let result = transport(url, Duration::from_secs(5)).post(b"{}").await;

            assert!(result.is_ok(), "{result:?}");
            server.await.unwrap();
        }

        #[tokio::test]
        async fn reachability_check_sends_get() {
            let (url, server) = serve_once(Some(OK)).await;

            transport(url, Duration::from_secs(5)).probe().await.unwrap();

            assert!(server.await.unwrap().starts_with("get /ingest http/1.1\r\n"));
        }

        #[tokio::test]
        async fn stalled_server_maps_to_timeout() {
            let (url, server) = serve_once(None).await;

            let result = transport(url, Duration::from_millis(200)).post(b"{}").await;

            match result {
                Err(failure @ DeliveryFailure::Timeout) => assert!(failure.is_retryable()),
                other => panic!("expected timeout, got {other:?}"),
            }
            server.abort();
        }

        #[tokio::test]
        async fn refused_connection_maps_to_network() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = Url::parse(&format!("http://{}/ingest", listener.local_addr().unwrap())).unwrap();
            drop(listener);

            let result = transport(url, Duration::from_secs(5)).post(b"{}").await;

            match result {
                Err(failure @ DeliveryFailure::Network(_)) => assert!(failure.is_retryable()),
                other => panic!("expected network failure, got {other:?}"),
            }
        }
    }
}
