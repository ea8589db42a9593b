//! Render progress tracking.
//!
//! The latest snapshot per job lives under `ugc:progress:{jobId}` with a TTL
//! and every update is also published on the `ugc:progress` channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ugc_models::{JobId, VideoId};

use crate::error::QueueResult;

/// Snapshot TTL in Redis (24 hours).
pub const PROGRESS_TTL_SECS: u64 = 86_400;

pub const PROGRESS_CHANNEL: &str = "ugc:progress";

/// Coarse stage of an in-flight render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStage {
    Starting,
    Submitted,
    Rendering,
    Downloading,
    Uploading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: JobId,
    pub video_id: VideoId,
    /// 0..=100
    pub percent: u8,
    pub stage: RenderStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    pub fn new(job_id: &JobId, video_id: &VideoId, percent: u8, stage: RenderStage) -> Self {
        Self {
            job_id: job_id.clone(),
            video_id: video_id.clone(),
            percent: percent.min(100),
            stage,
            message: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Where workers report progress and the API reads it back.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    async fn report(&self, progress: &JobProgress) -> QueueResult<()>;

    async fn latest(&self, job_id: &JobId) -> QueueResult<Option<JobProgress>>;
}

/// Redis-backed progress store.
pub struct ProgressStore {
    client: redis::Client,
}

impl ProgressStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn key(job_id: &JobId) -> String {
        format!("ugc:progress:{}", job_id)
    }

    /// Subscribe to live updates for one job.
    pub async fn subscribe(
        &self,
        job_id: &JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = JobProgress> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(PROGRESS_CHANNEL).await?;

        let job_id = job_id.clone();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let job_id = job_id.clone();
            async move {
                let payload: String = msg.get_payload().ok()?;
                let progress: JobProgress = serde_json::from_str(&payload).ok()?;
                (progress.job_id == job_id).then_some(progress)
            }
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ProgressTracker for ProgressStore {
    async fn report(&self, progress: &JobProgress) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::key(&progress.job_id);
        let payload = serde_json::to_string(progress)?;

        debug!(job_id = %progress.job_id, percent = progress.percent, "Recording progress");
        let _: () = redis::pipe()
            .set_ex(&key, &payload, PROGRESS_TTL_SECS)
            .ignore()
            .publish(PROGRESS_CHANNEL, &payload)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn latest(&self, job_id: &JobId) -> QueueResult<Option<JobProgress>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(job_id)).await?;
        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_clamped() {
        let p = JobProgress::new(
            &JobId::from_string("render-v-0"),
            &VideoId::from("v"),
            140,
            RenderStage::Rendering,
        );
        assert_eq!(p.percent, 100);
    }

    #[test]
    fn test_wire_format() {
        let p = JobProgress::new(
            &JobId::from_string("render-v-0"),
            &VideoId::from("v"),
            20,
            RenderStage::Submitted,
        )
        .with_message("Render submitted");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["jobId"], "render-v-0");
        assert_eq!(json["stage"], "submitted");
        assert_eq!(json["percent"], 20);
    }
}
