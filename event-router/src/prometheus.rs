// prometheus exporter setup

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

pub const MESSAGES_RECEIVED_TOTAL: &str = "event_router_messages_received_total";
pub const EVENTS_PUBLISHED_TOTAL: &str = "event_router_events_published_total";
pub const DEAD_LETTERS_TOTAL: &str = "event_router_dead_letters_total";
pub const UNMAPPED_EVENT_TYPES_TOTAL: &str = "event_router_unmapped_event_types_total";
pub const PUBLISH_ERRORS_TOTAL: &str = "event_router_publish_errors_total";
pub const EVENT_BATCH_SIZE: &str = "event_router_event_batch_size";

const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
const HTTP_REQUESTS_DURATION_SECONDS: &str = "http_requests_duration_seconds";

pub fn report_message_received(content_type: &'static str) {
    counter!(MESSAGES_RECEIVED_TOTAL, "content_type" => content_type).increment(1);
}

pub fn report_published(quantity: u64) {
    counter!(EVENTS_PUBLISHED_TOTAL).increment(quantity);
}

/// `scope` is `event` or `message`, `cause` the error kind.
pub fn report_dead_letter(scope: &'static str, cause: &'static str) {
    counter!(DEAD_LETTERS_TOTAL, "scope" => scope, "cause" => cause).increment(1);
}

pub fn report_unmapped_event_type() {
    counter!(UNMAPPED_EVENT_TYPES_TOTAL).increment(1);
}

pub fn report_publish_error(cause: &'static str) {
    counter!(PUBLISH_ERRORS_TOTAL, "cause" => cause).increment(1);
}

pub fn report_batch_size(events: usize) {
    histogram!(EVENT_BATCH_SIZE).record(events as f64);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];
    const BATCH_SIZES: &[f64] = &[1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUESTS_DURATION_SECONDS.to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("_batch_size".to_string()), BATCH_SIZES)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(HTTP_REQUESTS_DURATION_SECONDS, &labels).record(latency);

    response
}
