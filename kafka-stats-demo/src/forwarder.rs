use std::time;

use common_kafka::context::StatsHandler;
use reqwest::{header, Client, StatusCode, Url};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Level};

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("invalid collector url {url}: {error}")]
    InvalidUrl {
        url: String,
        error: url::ParseError,
    },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("statistics payload is not a JSON object: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How a single snapshot POST ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Accepted(StatusCode),
    Rejected(StatusCode),
    Failed,
}

pub fn build_http_client(request_timeout: time::Duration) -> reqwest::Result<Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("kafka-stats-demo")
        .timeout(request_timeout)
        .build()
}

/// Ships librdkafka statistics snapshots to an HTTP collector.
///
/// Cheap to clone: every clone shares the same connection pool and posts on
/// the runtime that was current when the forwarder was built.
#[derive(Clone)]
pub struct StatsForwarder {
    collector_url: Url,
    http_client: Client,
    runtime: Handle,
}

impl StatsForwarder {
    /// Must be called from within a tokio runtime.
    pub fn new(collector_url: &str, request_timeout: time::Duration) -> Result<Self, StatsError> {
        let collector_url = Url::parse(collector_url).map_err(|error| StatsError::InvalidUrl {
            url: collector_url.to_owned(),
            error,
        })?;
        let http_client = build_http_client(request_timeout)?;

        Ok(Self {
            collector_url,
            http_client,
            runtime: Handle::current(),
        })
    }

    pub fn collector_url(&self) -> &Url {
        &self.collector_url
    }

    /// Parse a raw snapshot and POST it in the background. Nothing is sent if
    /// the snapshot doesn't parse.
    pub fn forward(&self, raw: &[u8]) -> Result<JoinHandle<ForwardOutcome>, StatsError> {
        let snapshot: Map<String, Value> = serde_json::from_slice(raw)?;
        if tracing::enabled!(Level::DEBUG) {
            debug!(
                "statistics snapshot from {}: {}",
                client_name(&snapshot),
                serde_json::to_string_pretty(&snapshot).unwrap_or_default()
            );
        }

        let client = self.http_client.clone();
        let url = self.collector_url.clone();
        Ok(self
            .runtime
            .spawn(async move { post_snapshot(client, url, snapshot).await }))
    }
}

impl StatsHandler for StatsForwarder {
    fn on_stats(&self, raw: &[u8]) {
        // The spawned POST logs its own outcome
        if let Err(e) = self.forward(raw) {
            error!("dropping statistics snapshot: {}", e);
        }
    }
}

async fn post_snapshot(client: Client, url: Url, snapshot: Map<String, Value>) -> ForwardOutcome {
    let name = client_name(&snapshot).to_owned();
    debug!("sending statistics of {} to {}", name, url);

    let response = match client.post(url.clone()).json(&snapshot).send().await {
        Ok(response) => response,
        Err(e) => {
            error!("failed to send statistics of {} to {}: {}", name, url, e);
            return ForwardOutcome::Failed;
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        info!("collector accepted statistics of {}: {}", name, status);
        debug!("collector response: {}", body);
        ForwardOutcome::Accepted(status)
    } else {
        warn!(
            "collector rejected statistics of {}: {} {}",
            name, status, body
        );
        ForwardOutcome::Rejected(status)
    }
}

fn client_name(snapshot: &Map<String, Value>) -> &str {
    snapshot
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const TIMEOUT: time::Duration = time::Duration::from_secs(5);

    #[tokio::test]
    async fn posts_snapshot_as_json() {
        let server = MockServer::start_async().await;
        let collector = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .header("content-type", "application/json")
                    .json_body(json!({"name": "rdkafka#producer-1"}));
                then.status(200).body("OK");
            })
            .await;

        let forwarder = StatsForwarder::new(&server.url("/"), TIMEOUT).unwrap();
        let outcome = forwarder
            .forward(br#"{"name":"rdkafka#producer-1"}"#)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ForwardOutcome::Accepted(StatusCode::OK));
        collector.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn nested_snapshot_survives_the_round_trip() {
        let snapshot = json!({
            "name": "rdkafka#consumer-2",
            "type": "consumer",
            "ts": 5016483227792u64,
            "brokers": {
                "localhost:9092/1": {"nodeid": 1, "rtt": {"avg": 1500, "p99": 4000}}
            },
            "cgrp": {"state": "up", "rebalance_cnt": 1}
        });

        let server = MockServer::start_async().await;
        let collector = server
            .mock_async(|when, then| {
                when.method(POST).json_body(snapshot.clone());
                then.status(200);
            })
            .await;

        let forwarder = StatsForwarder::new(&server.url("/"), TIMEOUT).unwrap();
        let raw = serde_json::to_vec(&snapshot).unwrap();
        let outcome = forwarder.forward(&raw).unwrap().await.unwrap();

        assert_eq!(outcome, ForwardOutcome::Accepted(StatusCode::OK));
        collector.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn malformed_snapshot_sends_nothing() {
        let server = MockServer::start_async().await;
        let collector = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200);
            })
            .await;

        let forwarder = StatsForwarder::new(&server.url("/"), TIMEOUT).unwrap();

        assert!(matches!(
            forwarder.forward(b"{\"name\": "),
            Err(StatsError::Parse(_))
        ));
        assert!(matches!(
            forwarder.forward(b"[1, 2, 3]"),
            Err(StatsError::Parse(_))
        ));
        // The callback path swallows the error
        forwarder.on_stats(b"not json");

        tokio::time::sleep(time::Duration::from_millis(100)).await;
        collector.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn collector_errors_are_reported_not_raised() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500).body("ERROR");
            })
            .await;

        let forwarder = StatsForwarder::new(&server.url("/"), TIMEOUT).unwrap();
        let outcome = forwarder
            .forward(br#"{"name":"rdkafka#producer-1"}"#)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ForwardOutcome::Rejected(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }

    #[tokio::test]
    async fn unreachable_collector_is_reported_not_raised() {
        // Nothing listens on the discard port
        let forwarder =
            StatsForwarder::new("http://127.0.0.1:9/", time::Duration::from_secs(1)).unwrap();
        let outcome = forwarder
            .forward(br#"{"name":"rdkafka#producer-1"}"#)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ForwardOutcome::Failed);
    }

    #[tokio::test]
    async fn slow_collector_is_cut_off_by_the_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200).delay(time::Duration::from_secs(5));
            })
            .await;

        let forwarder =
            StatsForwarder::new(&server.url("/"), time::Duration::from_millis(200)).unwrap();
        let started = time::Instant::now();
        let outcome = forwarder
            .forward(br#"{"name":"rdkafka#producer-1"}"#)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, ForwardOutcome::Failed);
        assert!(started.elapsed() < time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn invalid_collector_url_is_fatal() {
        assert!(matches!(
            StatsForwarder::new("not a url", TIMEOUT),
            Err(StatsError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn forwarding_runs_on_the_captured_runtime() {
        // librdkafka calls the handler from its own threads, outside any runtime
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let forwarder = runtime
            .block_on(async { StatsForwarder::new("http://127.0.0.1:9/", TIMEOUT) })
            .unwrap();

        let handle = std::thread::spawn(move || forwarder.forward(br#"{"name":"x"}"#).is_ok())
            .join()
            .unwrap();
        assert!(handle);
    }
}
