//! Render orchestration for one queued job.
//!
//! A delivery moves the video QUEUED → GENERATING → PROCESSING → COMPLETED.
//! Every state write is conditional on the status the pipeline last read, so
//! a concurrent cancel, retry or sweep makes the write fail instead of
//! clobbering the other actor.
//!
//! Business failures (provider errors, timeouts, upload errors) end in a
//! FAILED video plus a refund and an `Ok` outcome. The FAILED write comes
//! first; the refund only follows a write that won. Only infrastructure faults
//! surface as `Err`, which the executor hands back to the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use ugc_firestore::{CreditContext, CreditLedger, VideoStore};
use ugc_models::{
    attempt_refund_key, JobId, Video, VideoEvent, VideoId, VideoStatus, GENERATION_CREDIT_COST,
};
use ugc_queue::{JobOutcomeKind, JobProgress, ProgressTracker, RenderStage, RenderVideoJob};
use ugc_render::{build_request, ProviderStatus, RenderProvider, RenderState};
use ugc_storage::{AssetStore, UploadTarget};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::failure::{user_detail, FailureCategory};
use crate::metrics;
use crate::sleeper::{RenderStartLimiter, Sleeper};

const PROGRESS_STARTED: u8 = 10;
const PROGRESS_SUBMITTED: u8 = 20;
/// Width of the band provider progress is mapped onto, above `PROGRESS_SUBMITTED`.
const PROGRESS_RENDER_BAND: u32 = 50;
const PROGRESS_DOWNLOADING: u8 = 70;
const PROGRESS_UPLOADING: u8 = 80;
const PROGRESS_UPLOADED: u8 = 95;
const PROGRESS_DONE: u8 = 100;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_status_errors: u32,
    pub download_url_ttl: Duration,
}

impl From<&WorkerConfig> for PipelineConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_poll_attempts: config.max_poll_attempts,
            max_status_errors: config.max_status_errors,
            download_url_ttl: config.download_url_ttl,
        }
    }
}

/// How a delivery ended, when it did not need redelivery.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { download_url: String },
    Failed { category: FailureCategory, refunded: bool },
    Skipped { reason: String },
}

impl JobOutcome {
    pub fn kind(&self) -> JobOutcomeKind {
        match self {
            JobOutcome::Completed { .. } => JobOutcomeKind::Completed,
            JobOutcome::Failed { .. } => JobOutcomeKind::Failed,
            JobOutcome::Skipped { .. } => JobOutcomeKind::Skipped,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            JobOutcome::Completed { .. } => None,
            JobOutcome::Failed { category, .. } => Some(category.code().to_string()),
            JobOutcome::Skipped { reason } => Some(reason.clone()),
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        JobOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

/// Where a delivery picks the attempt up.
#[derive(Debug)]
enum Entry {
    Start,
    /// Provider job already submitted; keep polling it.
    ResumePolling(String),
    /// Provider finished; the upload did not.
    ResumeUpload(String),
}

#[derive(Debug)]
enum Admission {
    Run(Video, Entry),
    /// Attempt already FAILED; its refund may still be owed.
    Settle(Video),
    NotReady(String),
    Skip(String),
}

fn admit(video: Video, job: &RenderVideoJob) -> Admission {
    if video.retry_count > job.attempt {
        return Admission::Skip(format!(
            "attempt {} superseded by attempt {}",
            job.attempt, video.retry_count
        ));
    }
    if video.retry_count < job.attempt {
        return match video.status {
            VideoStatus::Failed => Admission::NotReady(format!(
                "retry to attempt {} not committed yet",
                job.attempt
            )),
            status => Admission::Skip(format!("video is {} at attempt {}", status, video.retry_count)),
        };
    }

    let entry = match (video.status, video.sora_job_id.clone()) {
        (VideoStatus::ScriptReady, _) => {
            return Admission::NotReady("confirm not committed yet".into())
        }
        (VideoStatus::Queued, _) | (VideoStatus::Generating, None) => Entry::Start,
        (VideoStatus::Generating, Some(id)) => Entry::ResumePolling(id),
        (VideoStatus::Processing, Some(id)) => Entry::ResumeUpload(id),
        (VideoStatus::Failed, _) => return Admission::Settle(video),
        (status, _) => return Admission::Skip(format!("video is {}", status)),
    };
    Admission::Run(video, entry)
}

/// Drives one render attempt end to end.
pub struct RenderPipeline {
    videos: Arc<dyn VideoStore>,
    ledger: CreditLedger,
    provider: Arc<dyn RenderProvider>,
    assets: Arc<dyn AssetStore>,
    progress: Arc<dyn ProgressTracker>,
    sleeper: Arc<dyn Sleeper>,
    limiter: Arc<RenderStartLimiter>,
    config: PipelineConfig,
}

impl RenderPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        videos: Arc<dyn VideoStore>,
        ledger: CreditLedger,
        provider: Arc<dyn RenderProvider>,
        assets: Arc<dyn AssetStore>,
        progress: Arc<dyn ProgressTracker>,
        sleeper: Arc<dyn Sleeper>,
        limiter: Arc<RenderStartLimiter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            videos,
            ledger,
            provider,
            assets,
            progress,
            sleeper,
            limiter,
            config,
        }
    }

    /// Process one delivery of `job`.
    pub async fn process(&self, job: &RenderVideoJob) -> WorkerResult<JobOutcome> {
        let span = info_span!(
            "render_job",
            job_id = %job.job_id,
            video_id = %job.video_id,
            user_id = %job.user_id,
            attempt = job.attempt
        );
        self.process_inner(job).instrument(span).await
    }

    async fn process_inner(&self, job: &RenderVideoJob) -> WorkerResult<JobOutcome> {
        let Some(video) = self.videos.get(&job.video_id).await? else {
            warn!("Video record missing, dropping job");
            metrics::record_job_skipped();
            return Ok(JobOutcome::skipped("video not found"));
        };

        let (video, entry) = match admit(video, job) {
            Admission::Run(video, entry) => (video, entry),
            Admission::Settle(video) => return self.settle_failed(&video).await,
            Admission::NotReady(reason) => return Err(WorkerError::not_ready(reason)),
            Admission::Skip(reason) => {
                info!(reason = %reason, "Skipping render job");
                metrics::record_job_skipped();
                return Ok(JobOutcome::skipped(reason));
            }
        };

        // A previous delivery refunded this attempt but could not mark it failed.
        let refund_key = attempt_refund_key(&job.video_id, job.attempt);
        if self.ledger.is_recorded(&job.user_id, &refund_key).await? {
            warn!("Attempt already refunded, finishing failure");
            let error = WorkerError::incomplete("attempt was refunded before completing");
            return self.fail_attempt(&job.video_id, job.attempt, &error).await;
        }

        metrics::record_job_started();
        let started = Instant::now();

        match self.run(video, entry, job).await {
            Ok(download_url) => {
                metrics::record_job_completed(started.elapsed());
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Render job completed");
                Ok(JobOutcome::Completed { download_url })
            }
            Err(WorkerError::Superseded(reason)) => {
                info!(reason = %reason, "Video moved on during render");
                metrics::record_job_skipped();
                Ok(JobOutcome::skipped(reason))
            }
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => {
                warn!(error = %e, "Render attempt failed");
                self.fail_attempt(&job.video_id, job.attempt, &e).await
            }
        }
    }

    async fn run(&self, video: Video, entry: Entry, job: &RenderVideoJob) -> WorkerResult<String> {
        let (video, provider_job_id) = match entry {
            Entry::Start => {
                let video = self.pick_up(video, job).await?;
                self.submit(video, job).await?
            }
            Entry::ResumePolling(id) => {
                info!(provider_job_id = %id, "Resuming render polling");
                self.report(job, PROGRESS_SUBMITTED, RenderStage::Submitted).await;
                (video, id)
            }
            Entry::ResumeUpload(id) => {
                info!(provider_job_id = %id, "Resuming upload of finished render");
                let status = self.provider.get_status(&id).await?;
                if status.state != RenderState::Completed {
                    return Err(WorkerError::incomplete(format!(
                        "provider job {} is {:?} after render completed",
                        id, status.state
                    )));
                }
                return self.store_result(video, job, status).await;
            }
        };

        let status = self.poll(job, &provider_job_id).await?;
        let video = self.transition(video, VideoEvent::RenderComplete, |_| {}).await?;
        self.store_result(video, job, status).await
    }

    async fn pick_up(&self, video: Video, job: &RenderVideoJob) -> WorkerResult<Video> {
        let video = self
            .transition(video, VideoEvent::PickUp, |v| {
                v.generation_started_at = Some(Utc::now());
                v.error_message = None;
                v.error_code = None;
            })
            .await?;
        self.report(job, PROGRESS_STARTED, RenderStage::Starting).await;
        Ok(video)
    }

    async fn submit(&self, video: Video, job: &RenderVideoJob) -> WorkerResult<(Video, String)> {
        let request = build_request(
            &job.script,
            job.style,
            job.product_image_url.as_deref(),
            job.duration,
        );

        self.limiter.until_ready().await;
        let provider_job_id = self.provider.create_job(&request).await?;
        info!(provider_job_id = %provider_job_id, mode = ?request.mode, "Render submitted");

        let id = provider_job_id.clone();
        let video = self
            .transition(video, VideoEvent::PickUp, move |v| v.sora_job_id = Some(id))
            .await?;
        self.report(job, PROGRESS_SUBMITTED, RenderStage::Submitted).await;
        Ok((video, provider_job_id))
    }

    async fn poll(&self, job: &RenderVideoJob, provider_job_id: &str) -> WorkerResult<ProviderStatus> {
        let mut consecutive_errors = 0;

        for attempt in 1..=self.config.max_poll_attempts {
            self.sleeper.sleep(self.config.poll_interval).await;
            metrics::record_status_poll();

            match self.provider.get_status(provider_job_id).await {
                Ok(status) => {
                    consecutive_errors = 0;
                    match status.state {
                        RenderState::Completed => return Ok(status),
                        RenderState::Failed => {
                            return Err(WorkerError::RenderFailed(
                                status
                                    .error_message
                                    .unwrap_or_else(|| "render provider reported failure".into()),
                            ))
                        }
                        RenderState::Pending | RenderState::Processing => {
                            let band = u32::from(status.progress.min(100)) * PROGRESS_RENDER_BAND / 100;
                            let percent = PROGRESS_SUBMITTED + band as u8;
                            debug!(attempt, state = ?status.state, progress = status.progress, "Render in progress");
                            self.report(job, percent, RenderStage::Rendering).await;
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(attempt, consecutive_errors, error = %e, "Render status check failed");
                    if consecutive_errors >= self.config.max_status_errors {
                        return Err(e.into());
                    }
                }
            }
        }

        Err(WorkerError::RenderTimeout {
            attempts: self.config.max_poll_attempts,
        })
    }

    async fn store_result(
        &self,
        video: Video,
        job: &RenderVideoJob,
        status: ProviderStatus,
    ) -> WorkerResult<String> {
        let result_url = status
            .result_url
            .ok_or_else(|| WorkerError::incomplete("render completed without a result URL"))?;

        self.report(job, PROGRESS_DOWNLOADING, RenderStage::Downloading).await;
        let bytes = self.provider.fetch_result(&result_url).await?;

        self.report(job, PROGRESS_UPLOADING, RenderStage::Uploading).await;
        let target = UploadTarget::new(format!("videos/{}", video.user_id), video.id.to_string());
        let asset = self.assets.upload(bytes, &target).await?;
        self.report(job, PROGRESS_UPLOADED, RenderStage::Uploading).await;

        let signed = self
            .assets
            .signed_url(&asset.public_id, self.config.download_url_ttl)
            .await?;
        let thumbnail_url = asset.thumbnail_url.or(status.thumbnail_url);
        let download_url = signed.url.clone();

        self.transition(video, VideoEvent::AssetUploaded, move |v| {
            v.asset_public_id = Some(asset.public_id);
            v.asset_url = Some(asset.secure_url);
            v.download_url = Some(signed.url);
            v.download_expires_at = Some(signed.expires_at);
            v.thumbnail_url = thumbnail_url;
            v.completed_at = Some(Utc::now());
        })
        .await?;

        self.report(job, PROGRESS_DONE, RenderStage::Completed).await;
        Ok(download_url)
    }

    /// Mark the video FAILED, then refund the attempt.
    ///
    /// The FAILED write is conditional on the status read here, so an attempt
    /// that completed or moved on in the meantime keeps its debit. The refund
    /// is keyed by attempt. If it cannot be written the error propagates, and
    /// the redelivery settles it through the FAILED video.
    pub async fn fail_attempt(
        &self,
        video_id: &VideoId,
        attempt: u32,
        error: &WorkerError,
    ) -> WorkerResult<JobOutcome> {
        let category = FailureCategory::classify(error);

        let Some(video) = self.videos.get(video_id).await? else {
            return Ok(JobOutcome::skipped("video not found"));
        };
        if video.retry_count != attempt || video.status.apply(VideoEvent::Fail).is_none() {
            info!(status = %video.status, "Attempt already resolved, not failing");
            return Ok(JobOutcome::skipped(format!("video is {}", video.status)));
        }

        let user_id = video.user_id.clone();
        let message = category.user_message(user_detail(error));
        match self
            .transition(video, VideoEvent::Fail, |v| {
                v.error_message = Some(message);
                v.error_code = Some(category.code().to_string());
                v.credits_used = v.credits_used.saturating_sub(GENERATION_CREDIT_COST);
            })
            .await
        {
            Ok(_) => {}
            Err(WorkerError::Superseded(reason)) => {
                info!(reason = %reason, "Attempt resolved elsewhere, not refunding");
                return Ok(JobOutcome::skipped(reason));
            }
            Err(e) => return Err(e),
        }
        metrics::record_job_failed(category.as_str());

        self.refund_attempt(&user_id, video_id, attempt, category).await?;

        let progress = JobProgress::new(&JobId::for_attempt(video_id, attempt), video_id, 0, RenderStage::Failed)
            .with_message(category.code());
        if let Err(e) = self.progress.report(&progress).await {
            debug!(error = %e, "Failed to record failure progress");
        }

        warn!(category = category.as_str(), error = %error, "Video marked failed and refunded");
        Ok(JobOutcome::Failed {
            category,
            refunded: true,
        })
    }

    /// Finish a FAILED attempt whose refund was not written.
    async fn settle_failed(&self, video: &Video) -> WorkerResult<JobOutcome> {
        let category = video
            .error_code
            .as_deref()
            .and_then(FailureCategory::from_code)
            .unwrap_or(FailureCategory::Generic);
        let refund_key = attempt_refund_key(&video.id, video.retry_count);
        if self.ledger.is_recorded(&video.user_id, &refund_key).await? {
            info!("Attempt already failed and refunded");
            metrics::record_job_skipped();
            return Ok(JobOutcome::skipped("attempt already failed"));
        }

        warn!("Failed attempt is missing its refund, settling");
        self.refund_attempt(&video.user_id, &video.id, video.retry_count, category)
            .await?;
        Ok(JobOutcome::Failed {
            category,
            refunded: true,
        })
    }

    async fn refund_attempt(
        &self,
        user_id: &str,
        video_id: &VideoId,
        attempt: u32,
        category: FailureCategory,
    ) -> WorkerResult<()> {
        let ctx = CreditContext::new(format!(
            "Refund: video generation {}",
            category.as_str().replace('_', " ")
        ))
        .with_key(attempt_refund_key(video_id, attempt))
        .with_video(video_id);

        match self.ledger.refund(user_id, GENERATION_CREDIT_COST, ctx).await {
            Ok(entry) => info!(new_balance = entry.new_balance(), "Refunded attempt credit"),
            Err(e) if e.is_duplicate() => debug!("Attempt credit already refunded"),
            Err(e) => {
                warn!(error = %e, attempt, "Refund for failed attempt not written");
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Apply `event`, writing only if the stored status is still the one read.
    async fn transition(
        &self,
        mut video: Video,
        event: VideoEvent,
        edit: impl FnOnce(&mut Video),
    ) -> WorkerResult<Video> {
        let from = video.status;
        let next = from.apply(event).ok_or_else(|| {
            WorkerError::superseded(format!("{} not allowed from {}", event.name(), from))
        })?;

        edit(&mut video);
        video.set_status(next);

        if !self.videos.update_if_status(&video, &[from]).await? {
            return Err(WorkerError::superseded(format!(
                "video left {} before {}",
                from,
                event.name()
            )));
        }
        debug!(from = %from, to = %next, event = event.name(), "Video transitioned");
        Ok(video)
    }

    async fn report(&self, job: &RenderVideoJob, percent: u8, stage: RenderStage) {
        let progress = JobProgress::new(&job.job_id, &job.video_id, percent, stage);
        if let Err(e) = self.progress.report(&progress).await {
            debug!(error = %e, percent, "Failed to record progress");
        }
    }
}
