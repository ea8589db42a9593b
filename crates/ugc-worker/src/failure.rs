//! User-facing failure categories.

use ugc_render::RenderError;

use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Timeout,
    UpstreamUnavailable,
    GenerationIncomplete,
    Generic,
}

impl FailureCategory {
    pub fn classify(error: &WorkerError) -> Self {
        match error {
            WorkerError::RenderTimeout { .. } => FailureCategory::Timeout,
            WorkerError::Render(RenderError::Timeout(_)) => FailureCategory::Timeout,
            WorkerError::Render(e) if e.is_upstream_unavailable() => {
                FailureCategory::UpstreamUnavailable
            }
            WorkerError::Render(RenderError::RateLimited) => FailureCategory::UpstreamUnavailable,
            WorkerError::Storage(e) if e.is_transient() => FailureCategory::UpstreamUnavailable,
            WorkerError::Incomplete(_)
            | WorkerError::Render(RenderError::MissingJobId(_))
            | WorkerError::Render(RenderError::InvalidResponse(_)) => {
                FailureCategory::GenerationIncomplete
            }
            _ => FailureCategory::Generic,
        }
    }

    /// Stored as the video's `errorCode`.
    pub fn code(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "RENDER_TIMEOUT",
            FailureCategory::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            FailureCategory::GenerationIncomplete => "GENERATION_INCOMPLETE",
            FailureCategory::Generic => "GENERATION_FAILED",
        }
    }

    /// Inverse of [`FailureCategory::code`].
    pub fn from_code(code: &str) -> Option<Self> {
        [
            FailureCategory::Timeout,
            FailureCategory::UpstreamUnavailable,
            FailureCategory::GenerationIncomplete,
            FailureCategory::Generic,
        ]
        .into_iter()
        .find(|category| category.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "timeout",
            FailureCategory::UpstreamUnavailable => "upstream_unavailable",
            FailureCategory::GenerationIncomplete => "generation_incomplete",
            FailureCategory::Generic => "generic",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            FailureCategory::Timeout => "Video generation timed out.",
            FailureCategory::UpstreamUnavailable => {
                "The video generation service is temporarily unavailable."
            }
            FailureCategory::GenerationIncomplete => "Video generation did not complete.",
            FailureCategory::Generic => "Video generation failed.",
        }
    }

    /// Message stored on the failed video. Always states the refund outcome.
    pub fn user_message(&self, detail: Option<&str>) -> String {
        let detail = detail
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(|d| format!(" ({})", truncate(d, 200)))
            .unwrap_or_default();
        format!(
            "{}{} Your credit has been refunded; you can retry.",
            self.summary(),
            detail
        )
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Provider detail worth showing to the user, if any.
pub fn user_detail(error: &WorkerError) -> Option<&str> {
    match error {
        WorkerError::RenderFailed(msg) => Some(msg.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            FailureCategory::classify(&WorkerError::RenderTimeout { attempts: 90 }),
            FailureCategory::Timeout
        );
        assert_eq!(
            FailureCategory::classify(&WorkerError::Render(RenderError::ServiceUnavailable(
                "503".into()
            ))),
            FailureCategory::UpstreamUnavailable
        );
        assert_eq!(
            FailureCategory::classify(&WorkerError::incomplete("no result url")),
            FailureCategory::GenerationIncomplete
        );
        assert_eq!(
            FailureCategory::classify(&WorkerError::RenderFailed("upstream error".into())),
            FailureCategory::Generic
        );
    }

    #[test]
    fn test_message_mentions_refund() {
        let msg = FailureCategory::Generic.user_message(Some("upstream error"));
        assert!(msg.contains("upstream error"));
        assert!(msg.contains("refunded"));
        assert!(FailureCategory::Timeout.user_message(None).contains("refunded"));
    }

    #[test]
    fn test_stored_code_maps_back() {
        assert_eq!(
            FailureCategory::from_code("RENDER_TIMEOUT"),
            Some(FailureCategory::Timeout)
        );
        assert_eq!(
            FailureCategory::from_code("GENERATION_FAILED"),
            Some(FailureCategory::Generic)
        );
        assert_eq!(FailureCategory::from_code("SOMETHING_ELSE"), None);
    }
}
