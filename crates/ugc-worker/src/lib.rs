//! Render worker for UGC videos.
//!
//! This crate provides:
//! - The render pipeline (submit, poll, upload, fail with refund)
//! - Job executor consuming the Redis stream
//! - Stale attempt sweeper
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod failure;
pub mod metrics;
pub mod pipeline;
pub mod sleeper;
pub mod sweeper;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use failure::FailureCategory;
pub use pipeline::{JobOutcome, PipelineConfig, RenderPipeline};
pub use sleeper::{render_start_limiter, RenderStartLimiter, Sleeper, TokioSleeper};
pub use sweeper::StaleAttemptSweeper;

use std::sync::Arc;

use ugc_firestore::{CreditLedger, VideoStore};
use ugc_queue::ProgressTracker;
use ugc_render::HttpRenderClient;
use ugc_storage::R2AssetStore;

impl RenderPipeline {
    /// Pipeline talking to the configured render provider and R2 bucket.
    pub fn from_env(
        config: &WorkerConfig,
        videos: Arc<dyn VideoStore>,
        ledger: CreditLedger,
        progress: Arc<dyn ProgressTracker>,
    ) -> WorkerResult<Self> {
        let provider = HttpRenderClient::from_env()?;
        let assets = R2AssetStore::from_env()?;
        Ok(Self::new(
            videos,
            ledger,
            Arc::new(provider),
            Arc::new(assets),
            progress,
            Arc::new(TokioSleeper),
            render_start_limiter(config.render_starts_per_minute),
            PipelineConfig::from(config),
        ))
    }
}
