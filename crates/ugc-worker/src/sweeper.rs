//! Fails attempts that have sat in GENERATING/PROCESSING past the poll ceiling.
//!
//! Covers jobs that were dead-lettered or lost with their worker. Failing goes
//! through [`RenderPipeline::fail_attempt`], so a sweep racing a live worker
//! still refunds at most once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use ugc_firestore::VideoStore;
use ugc_models::VideoStatus;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{JobOutcome, RenderPipeline};

const SWEEP_BATCH: u32 = 50;

pub struct StaleAttemptSweeper {
    videos: Arc<dyn VideoStore>,
    pipeline: Arc<RenderPipeline>,
    config: WorkerConfig,
}

impl StaleAttemptSweeper {
    pub fn new(videos: Arc<dyn VideoStore>, pipeline: Arc<RenderPipeline>, config: WorkerConfig) -> Self {
        Self {
            videos,
            pipeline,
            config,
        }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        if !self.config.enable_stale_sweeper {
            info!("Stale attempt sweeper disabled");
            return;
        }
        info!(
            interval_secs = self.config.stale_sweep_interval.as_secs(),
            threshold_secs = self.config.stale_threshold().as_secs(),
            "Starting stale attempt sweeper"
        );

        let mut interval = tokio::time::interval(self.config.stale_sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(0) => {}
                        Ok(failed) => info!(failed, "Failed stale render attempts"),
                        Err(e) => warn!(error = %e, "Stale sweep failed"),
                    }
                }
            }
        }
    }

    /// One pass. Returns how many attempts were failed and refunded.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> WorkerResult<usize> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold())
            .map_err(|e| WorkerError::config_error(format!("stale threshold out of range: {}", e)))?;
        let cutoff = now - threshold;
        let mut failed = 0;

        for status in [VideoStatus::Generating, VideoStatus::Processing] {
            let stale = self
                .videos
                .list_started_before(status, cutoff, SWEEP_BATCH)
                .await?;

            for video in stale {
                if !video.is_stale(now, threshold) {
                    continue;
                }
                warn!(video_id = %video.id, status = %video.status, attempt = video.retry_count, "Render attempt is stale");
                let error = WorkerError::RenderTimeout {
                    attempts: self.config.max_poll_attempts,
                };
                match self
                    .pipeline
                    .fail_attempt(&video.id, video.retry_count, &error)
                    .await
                {
                    Ok(JobOutcome::Failed { .. }) => {
                        metrics::record_stale_attempt();
                        failed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(video_id = %video.id, error = %e, "Failed to fail stale attempt"),
                }
            }
        }

        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{harness, queued_video, Harness, ScriptedProvider};
    use std::time::Duration;
    use ugc_models::TransactionType;

    fn sweeper_for(h: &Harness) -> StaleAttemptSweeper {
        let config = WorkerConfig {
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 90,
            stale_grace: Duration::from_secs(300),
            ..WorkerConfig::default()
        };
        StaleAttemptSweeper::new(h.videos.clone(), Arc::clone(&h.pipeline), config)
    }

    #[tokio::test]
    async fn test_sweeps_stale_attempt_once() {
        let h = harness(ScriptedProvider::default());
        let (mut video, _) = queued_video(&h, 0).await;
        video.set_status(VideoStatus::Generating);
        video.sora_job_id = Some("sora-lost".into());
        video.generation_started_at = Some(Utc::now() - chrono::Duration::minutes(30));
        h.videos.put(video.clone()).await;

        let sweeper = sweeper_for(&h);

        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 0);

        let stored = h.videos.get(&video.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VideoStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some("RENDER_TIMEOUT"));
        assert_eq!(h.ledger.balance("user-1").await.unwrap(), 1);

        let refunds = h
            .ledger_store
            .all_transactions("user-1")
            .await
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::Refund)
            .count();
        assert_eq!(refunds, 1);
    }

    #[tokio::test]
    async fn test_leaves_fresh_attempts_alone() {
        let h = harness(ScriptedProvider::default());
        let (mut video, _) = queued_video(&h, 0).await;
        video.set_status(VideoStatus::Generating);
        video.generation_started_at = Some(Utc::now() - chrono::Duration::minutes(5));
        h.videos.put(video.clone()).await;

        let sweeper = sweeper_for(&h);

        assert_eq!(sweeper.sweep_once(Utc::now()).await.unwrap(), 0);
        let stored = h.videos.get(&video.id).await.unwrap().unwrap();
        assert_eq!(stored.status, VideoStatus::Generating);
    }
}
