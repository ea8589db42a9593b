//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use ugc_firestore::{FirestoreError, LedgerError};
use ugc_models::VideoStatus;
use ugc_queue::QueueError;

use crate::config::DeploymentMode;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Video not found")]
    VideoNotFound,

    #[error("You do not have access to this video")]
    AccessDenied,

    #[error("Cannot {operation} a video in status {status}")]
    InvalidVideoStatus {
        status: VideoStatus,
        operation: &'static str,
    },

    #[error("No script available for this video")]
    NoScriptAvailable,

    #[error("Insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("Service temporarily unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Script generation failed: {0}")]
    ScriptGeneration(String),

    #[error("Download link has expired")]
    DownloadExpired,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),
}

impl ApiError {
    pub fn invalid_status(status: VideoStatus, operation: &'static str) -> Self {
        Self::InvalidVideoStatus { status, operation }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::VideoNotFound => "VIDEO_NOT_FOUND",
            ApiError::AccessDenied => "ACCESS_DENIED",
            ApiError::InvalidVideoStatus { .. } => "INVALID_VIDEO_STATUS",
            ApiError::NoScriptAvailable => "NO_SCRIPT_AVAILABLE",
            ApiError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::ScriptGeneration(_) => "SCRIPT_GENERATION_FAILED",
            ApiError::DownloadExpired => "DOWNLOAD_EXPIRED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InvalidSignature => "INVALID_SIGNATURE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Internal(_) | ApiError::Firestore(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::VideoNotFound => StatusCode::NOT_FOUND,
            ApiError::AccessDenied => StatusCode::FORBIDDEN,
            ApiError::InvalidVideoStatus { .. } => StatusCode::CONFLICT,
            ApiError::NoScriptAvailable | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ScriptGeneration(_) => StatusCode::BAD_GATEWAY,
            ApiError::DownloadExpired => StatusCode::GONE,
            ApiError::Unauthorized(_) | ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Firestore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::Firestore(_))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredits { balance, requested } => ApiError::InsufficientCredits {
                balance,
                required: requested,
            },
            e @ (LedgerError::InvalidAmount(_) | LedgerError::InvalidTransactionType(_)) => {
                ApiError::Validation(e.to_string())
            }
            e @ LedgerError::Contention(_) => ApiError::ServiceUnavailable(e.to_string()),
            LedgerError::Store(e) => ApiError::Firestore(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        if err.is_unavailable() {
            ApiError::ServiceUnavailable("render queue unavailable".to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let detail = if self.is_internal() {
            error!(error = %self, "Request failed with internal error");
            if DeploymentMode::from_env().is_production() {
                "An internal error occurred".to_string()
            } else {
                self.to_string()
            }
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            detail,
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
