use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, MatchedPath, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::librdkafka::{self, StatsRecorder};

pub fn router(
    recorder_handle: PrometheusHandle,
    stats: Arc<StatsRecorder>,
    max_body_size: usize,
) -> Router {
    Router::new()
        .route(
            "/",
            routing::post(receive_stats)
                .with_state(stats)
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route(
            "/metrics",
            routing::get(move || std::future::ready(recorder_handle.render())),
        )
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index))
        .layer(middleware::from_fn(track_metrics))
}

pub async fn index() -> &'static str {
    "stats-exporter"
}

/// Accept one librdkafka statistics snapshot and fold it into the exported
/// metrics.
pub async fn receive_stats(
    State(stats_recorder): State<Arc<StatsRecorder>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let stats: Map<String, Value> = match serde_json::from_slice(&body) {
        Ok(stats) => stats,
        Err(e) => {
            warn!("rejecting statistics payload: {}", e);
            return (StatusCode::BAD_REQUEST, "ERROR");
        }
    };

    let samples = librdkafka::flatten(&stats);
    let client = stats
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown client");
    debug!("recording {} samples from {}", samples.len(), client);
    stats_recorder.record(&samples);

    (StatusCode::OK, "OK")
}

/// Count and time every request the exporter serves.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
