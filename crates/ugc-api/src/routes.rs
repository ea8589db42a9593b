//! API routes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::credits::{get_balance, get_credit_history};
use crate::handlers::videos::{
    cancel_video, confirm_video, download_video, edit_script, generate_script, get_video,
    list_videos, retry_video,
};
use crate::handlers::webhooks::payment_webhook;
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let video_routes = Router::new()
        .route("/videos", get(list_videos))
        .route("/videos/generate-script", post(generate_script))
        .route("/videos/:video_id", get(get_video).delete(cancel_video))
        .route("/videos/:video_id/script", put(edit_script))
        .route("/videos/:video_id/confirm", post(confirm_video))
        .route("/videos/:video_id/retry", post(retry_video))
        .route("/videos/:video_id/download", get(download_video));

    let credit_routes = Router::new()
        .route("/credits/balance", get(get_balance))
        .route("/credits/history", get(get_credit_history));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(video_routes)
        .merge(credit_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let webhook_routes = Router::new().route("/webhooks/payments", post(payment_webhook));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = tracing::field::Empty,
            )
        }))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
