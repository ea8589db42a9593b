//! Video record and generation state machine.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{GeneratedScript, JobId, ProductData, ScriptScene, VideoStyle, GENERATION_CREDIT_COST};

/// Unique identifier for a video record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a video record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    #[default]
    PendingScript,
    ScriptReady,
    Queued,
    Generating,
    /// Render finished, asset being fetched and uploaded
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl VideoStatus {
    pub const ALL: &'static [VideoStatus] = &[
        VideoStatus::PendingScript,
        VideoStatus::ScriptReady,
        VideoStatus::Queued,
        VideoStatus::Generating,
        VideoStatus::Processing,
        VideoStatus::Completed,
        VideoStatus::Failed,
        VideoStatus::Cancelled,
        VideoStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::PendingScript => "PENDING_SCRIPT",
            VideoStatus::ScriptReady => "SCRIPT_READY",
            VideoStatus::Queued => "QUEUED",
            VideoStatus::Generating => "GENERATING",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Completed => "COMPLETED",
            VideoStatus::Failed => "FAILED",
            VideoStatus::Cancelled => "CANCELLED",
            VideoStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VideoStatus::Completed | VideoStatus::Cancelled | VideoStatus::Expired
        )
    }

    /// A render attempt is queued or running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            VideoStatus::Queued | VideoStatus::Generating | VideoStatus::Processing
        )
    }

    /// Whether the current attempt holds a debited credit that has been
    /// neither consumed by a completed render nor refunded.
    pub fn holds_unresolved_debit(&self) -> bool {
        matches!(
            self,
            VideoStatus::ScriptReady
                | VideoStatus::Queued
                | VideoStatus::Generating
                | VideoStatus::Processing
        )
    }

    /// Apply an event, returning the next status if the transition is legal.
    pub fn apply(self, event: VideoEvent) -> Option<VideoStatus> {
        event.sources().contains(&self).then(|| event.target())
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that move a video through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoEvent {
    EditScript,
    Confirm,
    /// Worker picked up the render job
    PickUp,
    /// External render finished, upload starting
    RenderComplete,
    /// Asset uploaded and download URL issued
    AssetUploaded,
    /// Render failed or timed out
    Fail,
    Retry,
    Cancel,
    /// Download URL lapsed
    Expire,
}

impl VideoEvent {
    /// Statuses from which this event is legal.
    pub fn sources(&self) -> &'static [VideoStatus] {
        use VideoStatus::*;
        match self {
            VideoEvent::EditScript => &[ScriptReady],
            VideoEvent::Confirm => &[ScriptReady],
            VideoEvent::PickUp => &[Queued, Generating],
            VideoEvent::RenderComplete => &[Generating],
            VideoEvent::AssetUploaded => &[Processing],
            VideoEvent::Fail => &[Generating, Processing],
            VideoEvent::Retry => &[Failed],
            VideoEvent::Cancel => &[PendingScript, ScriptReady, Queued],
            VideoEvent::Expire => &[Completed],
        }
    }

    pub fn target(&self) -> VideoStatus {
        match self {
            VideoEvent::EditScript => VideoStatus::ScriptReady,
            VideoEvent::Confirm => VideoStatus::Queued,
            VideoEvent::PickUp => VideoStatus::Generating,
            VideoEvent::RenderComplete => VideoStatus::Processing,
            VideoEvent::AssetUploaded => VideoStatus::Completed,
            VideoEvent::Fail => VideoStatus::Failed,
            VideoEvent::Retry => VideoStatus::Generating,
            VideoEvent::Cancel => VideoStatus::Cancelled,
            VideoEvent::Expire => VideoStatus::Expired,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoEvent::EditScript => "edit_script",
            VideoEvent::Confirm => "confirm",
            VideoEvent::PickUp => "pick_up",
            VideoEvent::RenderComplete => "render_complete",
            VideoEvent::AssetUploaded => "asset_uploaded",
            VideoEvent::Fail => "fail",
            VideoEvent::Retry => "retry",
            VideoEvent::Cancel => "cancel",
            VideoEvent::Expire => "expire",
        }
    }
}

/// A video generation record. One per attempt chain; retries reuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: VideoId,
    pub user_id: String,
    pub status: VideoStatus,

    /// Opaque snapshot of the scraped product
    pub product_data: serde_json::Value,
    pub product_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(default)]
    pub product_images: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_script: Option<String>,
    #[serde(default)]
    pub scenes: Vec<ScriptScene>,
    pub video_style: VideoStyle,

    /// External render provider job id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sora_job_id: Option<String>,
    /// Requested duration in seconds
    pub video_duration: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_public_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Net credits debited for this record
    pub credits_used: u32,
    /// Number of user-triggered retries; also the current attempt number
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Video {
    /// Create a record for a freshly generated script. The caller debits the
    /// generation credit before persisting it.
    pub fn with_script(
        id: VideoId,
        user_id: impl Into<String>,
        product: &ProductData,
        style: VideoStyle,
        script: &GeneratedScript,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            status: VideoStatus::ScriptReady,
            product_data: product.to_snapshot(),
            product_title: product.title.clone(),
            product_url: product.url.clone(),
            product_images: product.images.clone(),
            generated_script: Some(script.script.clone()),
            edited_script: None,
            final_script: Some(script.script.clone()),
            scenes: script.scenes.clone(),
            video_style: style,
            sora_job_id: None,
            video_duration: script.render_duration(),
            asset_public_id: None,
            asset_url: None,
            download_url: None,
            download_expires_at: None,
            thumbnail_url: None,
            error_message: None,
            error_code: None,
            credits_used: GENERATION_CREDIT_COST,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            generation_started_at: None,
            completed_at: None,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Current attempt number (0 for the initial generation).
    pub fn attempt(&self) -> u32 {
        self.retry_count
    }

    /// Job id of the current attempt.
    pub fn job_id(&self) -> JobId {
        JobId::for_attempt(&self.id, self.retry_count)
    }

    /// Script the renderer should use, if any.
    pub fn script_for_render(&self) -> Option<&str> {
        self.final_script
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Image handed to image-to-video generation.
    pub fn primary_image(&self) -> Option<&str> {
        self.product_images
            .iter()
            .map(|s| s.trim())
            .find(|s| s.starts_with("https://") || s.starts_with("http://"))
    }

    pub fn download_expired(&self, now: DateTime<Utc>) -> bool {
        self.download_expires_at.is_some_and(|at| at <= now)
    }

    /// Whether a GENERATING/PROCESSING attempt has run past `ceiling`.
    pub fn is_stale(&self, now: DateTime<Utc>, ceiling: Duration) -> bool {
        matches!(self.status, VideoStatus::Generating | VideoStatus::Processing)
            && self
                .generation_started_at
                .unwrap_or(self.updated_at)
                .checked_add_signed(ceiling)
                .is_some_and(|deadline| deadline <= now)
    }

    /// Move to `next`, stamping `updated_at`.
    pub fn set_status(&mut self, next: VideoStatus) {
        self.status = next;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_video() -> Video {
        let product = ProductData::new("Travel Mug").with_image("https://cdn.shop/mug.png");
        let script = GeneratedScript {
            script: "Meet the mug that keeps coffee hot for 12 hours.".to_string(),
            estimated_duration: 3,
            scenes: vec![],
        };
        Video::with_script(VideoId::from("v1"), "user-1", &product, VideoStyle::Lifestyle, &script)
    }

    #[test]
    fn test_transition_table() {
        use VideoEvent::*;
        use VideoStatus::*;

        let legal = [
            (ScriptReady, EditScript, ScriptReady),
            (ScriptReady, Confirm, Queued),
            (Queued, PickUp, Generating),
            (Generating, PickUp, Generating),
            (Generating, RenderComplete, Processing),
            (Processing, AssetUploaded, Completed),
            (Generating, Fail, Failed),
            (Processing, Fail, Failed),
            (Failed, Retry, Generating),
            (PendingScript, Cancel, Cancelled),
            (ScriptReady, Cancel, Cancelled),
            (Queued, Cancel, Cancelled),
            (Completed, Expire, Expired),
        ];
        for (from, event, to) in legal {
            assert_eq!(from.apply(event), Some(to), "{from} --{}-->", event.name());
        }

        for status in VideoStatus::ALL {
            if *status != ScriptReady {
                assert_eq!(status.apply(Confirm), None, "confirm from {status}");
            }
        }
        assert_eq!(Generating.apply(Cancel), None);
        assert_eq!(Completed.apply(Retry), None);
        assert_eq!(Cancelled.apply(Retry), None);
        assert_eq!(Generating.apply(EditScript), None);
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in VideoStatus::ALL {
            assert_eq!(VideoStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(
            serde_json::to_string(&VideoStatus::PendingScript).unwrap(),
            "\"PENDING_SCRIPT\""
        );
    }

    #[test]
    fn test_new_video_is_script_ready_with_one_credit() {
        let video = sample_video();
        assert_eq!(video.status, VideoStatus::ScriptReady);
        assert_eq!(video.credits_used, 1);
        assert_eq!(video.video_duration, 5);
        assert_eq!(video.job_id().as_str(), "render-v1-0");
        assert_eq!(video.primary_image(), Some("https://cdn.shop/mug.png"));
        assert!(video.is_owned_by("user-1"));
        assert!(!video.is_owned_by("user-2"));
    }

    #[test]
    fn test_script_for_render_ignores_blank() {
        let mut video = sample_video();
        video.final_script = Some("   ".to_string());
        assert_eq!(video.script_for_render(), None);
        video.final_script = None;
        assert_eq!(video.script_for_render(), None);
    }

    #[test]
    fn test_staleness_and_expiry() {
        let mut video = sample_video();
        let now = Utc::now();
        assert!(!video.is_stale(now, Duration::minutes(30)));

        video.status = VideoStatus::Generating;
        video.generation_started_at = Some(now - Duration::minutes(45));
        assert!(video.is_stale(now, Duration::minutes(30)));
        assert!(!video.is_stale(now, Duration::minutes(60)));

        video.download_expires_at = Some(now - Duration::seconds(1));
        assert!(video.download_expired(now));
    }
}
