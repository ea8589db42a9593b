//! Render job payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ugc_models::{JobId, Video, VideoId, VideoStyle};

/// One render attempt for one video, as persisted in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderVideoJob {
    pub job_id: JobId,
    pub user_id: String,
    pub video_id: VideoId,
    /// Attempt number this job renders (the video's retry count when enqueued)
    pub attempt: u32,
    pub script: String,
    pub style: VideoStyle,
    /// Requested duration in seconds
    pub duration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Deliveries that ended in an infrastructure error
    #[serde(default)]
    pub delivery_attempt: u32,
}

impl RenderVideoJob {
    /// Build the job for the video's current attempt. `None` if the video
    /// has no script to render.
    pub fn for_video(video: &Video) -> Option<Self> {
        Some(Self::for_attempt(video, video.retry_count, video.script_for_render()?))
    }

    /// Build the job for a specific attempt number.
    pub fn for_attempt(video: &Video, attempt: u32, script: &str) -> Self {
        Self {
            job_id: JobId::for_attempt(&video.id, attempt),
            user_id: video.user_id.clone(),
            video_id: video.id.clone(),
            attempt,
            script: script.to_string(),
            style: video.video_style,
            duration: video.video_duration,
            product_image_url: video.primary_image().map(str::to_string),
            created_at: Utc::now(),
            delivery_attempt: 0,
        }
    }

    /// Deduplication key; identical for every enqueue of the same attempt.
    pub fn idempotency_key(&self) -> &str {
        self.job_id.as_str()
    }

    pub fn next_delivery(&self) -> Self {
        Self {
            delivery_attempt: self.delivery_attempt + 1,
            ..self.clone()
        }
    }
}
