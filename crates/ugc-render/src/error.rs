//! Render provider error types.

use thiserror::Error;

use crate::parse::JobIdParseError;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render provider unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Render provider rejected request ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Render provider rate limited")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No job id in provider response: {0}")]
    MissingJobId(#[from] JobIdParseError),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => RenderError::RateLimited,
            500..=599 => RenderError::ServiceUnavailable(format!("HTTP {}: {}", status, body)),
            _ => RenderError::RequestFailed {
                status,
                message: body,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::ServiceUnavailable(_) | RenderError::RateLimited | RenderError::Timeout(_) => {
                true
            }
            RenderError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Provider-side outage or timeout, as opposed to a rejected request.
    pub fn is_upstream_unavailable(&self) -> bool {
        match self {
            RenderError::ServiceUnavailable(_) | RenderError::Timeout(_) => true,
            RenderError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RenderError::from_status(503, "down".into()).is_retryable());
        assert!(RenderError::from_status(429, String::new()).is_retryable());
        assert!(!RenderError::from_status(400, "bad prompt".into()).is_retryable());
        assert!(RenderError::from_status(502, String::new()).is_upstream_unavailable());
    }
}
