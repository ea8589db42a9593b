//! Axum HTTP API for UGC video generation.
//!
//! This crate provides:
//! - Script generation, confirm, retry, cancel and download endpoints
//! - Credit balance/history and the payment webhook
//! - HS256 bearer token authentication
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use config::{ApiConfig, DeploymentMode};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::GenerationService;
pub use state::AppState;
