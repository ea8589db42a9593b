//! In-process render fallback for non-production deployments.

use std::sync::Arc;

use tracing::{error, info, warn};

use ugc_firestore::{CreditLedger, VideoStore};
use ugc_queue::{ProgressTracker, RenderVideoJob};
use ugc_worker::{RenderPipeline, WorkerConfig};

use crate::config::DeploymentMode;
use crate::services::generation::InlineRender;

/// Runs jobs on this process's runtime through the worker pipeline.
pub struct InlineRenderer {
    pipeline: Arc<RenderPipeline>,
}

impl InlineRenderer {
    pub fn new(pipeline: Arc<RenderPipeline>) -> Self {
        Self { pipeline }
    }

    /// Build the fallback, or `None` when `mode` forbids it or the render
    /// stack is not configured.
    pub fn for_deployment(
        mode: DeploymentMode,
        videos: Arc<dyn VideoStore>,
        ledger: CreditLedger,
        progress: Arc<dyn ProgressTracker>,
    ) -> Option<Self> {
        if mode.is_production() {
            info!("Inline render fallback disabled in production");
            return None;
        }
        let config = WorkerConfig::from_env();
        match RenderPipeline::from_env(&config, videos, ledger, progress) {
            Ok(pipeline) => {
                warn!(mode = %mode, "Inline render fallback enabled");
                Some(Self::new(Arc::new(pipeline)))
            }
            Err(e) => {
                warn!(error = %e, "Inline render fallback unavailable");
                None
            }
        }
    }
}

impl InlineRender for InlineRenderer {
    fn spawn(&self, job: RenderVideoJob) {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            match pipeline.process(&job).await {
                Ok(outcome) => info!(job_id = %job.job_id, outcome = ?outcome.kind(), "Inline render finished"),
                Err(e) => error!(job_id = %job.job_id, error = %e, "Inline render failed"),
            }
        });
    }
}
