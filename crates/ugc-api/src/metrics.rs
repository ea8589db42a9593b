//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "ugc_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "ugc_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "ugc_http_requests_in_flight";

    pub const JOBS_ENQUEUED_TOTAL: &str = "ugc_jobs_enqueued_total";
    pub const CREDITS_TOTAL: &str = "ugc_api_credits_total";
    pub const PAYMENT_EVENTS_TOTAL: &str = "ugc_payment_events_total";

    pub const RATE_LIMIT_HITS_TOTAL: &str = "ugc_rate_limit_hits_total";
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// `route` is `queue` or `inline`.
pub fn record_job_enqueued(route: &str) {
    let labels = [("route", route.to_string())];
    counter!(names::JOBS_ENQUEUED_TOTAL, &labels).increment(1);
}

/// Credits moved by request handling, by `kind` (debit, refund, grant, claw_back).
pub fn record_credits(kind: &str, amount: u32) {
    let labels = [("kind", kind.to_string())];
    counter!(names::CREDITS_TOTAL, &labels).increment(u64::from(amount));
}

pub fn record_payment_event(event: &str, outcome: &str) {
    let labels = [
        ("event", event.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::PAYMENT_EVENTS_TOTAL, &labels).increment(1);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Route template for the label, so ids do not explode cardinality.
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = route_label(&request);
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
