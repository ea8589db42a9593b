//! Render provider abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RenderResult;

/// Vertical video for social feeds.
pub const DEFAULT_ASPECT_RATIO: &str = "9:16";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToVideo,
    ImageToVideo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub prompt: String,
    pub mode: GenerationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Seconds
    pub duration: u32,
    pub aspect_ratio: String,
}

/// Provider job state, normalized from whatever vocabulary the provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RenderState::Completed | RenderState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatus {
    pub state: RenderState,
    /// 0..=100
    pub progress: u8,
    pub result_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
}

impl ProviderStatus {
    pub fn pending() -> Self {
        Self {
            state: RenderState::Pending,
            progress: 0,
            result_url: None,
            thumbnail_url: None,
            error_message: None,
        }
    }
}

/// External text/image-to-video service.
#[async_trait]
pub trait RenderProvider: Send + Sync {
    /// Submit a render; returns the provider's job id.
    async fn create_job(&self, request: &RenderRequest) -> RenderResult<String>;

    async fn get_status(&self, job_id: &str) -> RenderResult<ProviderStatus>;

    /// Download the finished media.
    async fn fetch_result(&self, url: &str) -> RenderResult<Vec<u8>>;
}
