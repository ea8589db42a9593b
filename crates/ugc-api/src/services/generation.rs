//! Request-time generation flow: script, confirm, cancel, retry, download.
//!
//! Every state change is a conditional write against the status the request
//! read. Work is enqueued before credits move, so a queue failure never needs
//! a ledger compensation; the remaining partial failures are undone with
//! keyed refunds or job removal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use ugc_firestore::{CreditContext, CreditLedger, LedgerError, VideoStore};
use ugc_models::{
    attempt_debit_key, attempt_refund_key, GeneratedScript, ProductData, Video, VideoEvent,
    VideoId, VideoStatus, VideoStyle, GENERATION_CREDIT_COST,
};
use ugc_queue::{EnqueueOutcome, JobProgress, ProgressTracker, RenderQueue, RenderVideoJob};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::services::script::{ScriptGenerator, ScriptOptions};

pub const MAX_SCRIPT_LENGTH: usize = 5000;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Runs a render in-process when the queue cannot take it.
pub trait InlineRender: Send + Sync {
    /// Start `job` in the background. The video state for the attempt is
    /// already committed when this is called.
    fn spawn(&self, job: RenderVideoJob);
}

/// Video returned to clients, with live progress for in-flight renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    #[serde(flatten)]
    pub video: Video,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCreated {
    pub video_id: VideoId,
    pub script: String,
    pub estimated_duration: u32,
    pub scenes: Vec<ugc_models::ScriptScene>,
    pub credits_remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    pub download_url: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPage {
    pub videos: Vec<Video>,
    pub page: u32,
    pub limit: u32,
}

/// How a job reached a worker.
enum Dispatch {
    Queued { newly_enqueued: bool },
    Inline,
}

pub struct GenerationService {
    videos: Arc<dyn VideoStore>,
    ledger: CreditLedger,
    queue: Arc<dyn RenderQueue>,
    progress: Arc<dyn ProgressTracker>,
    scripts: Arc<dyn ScriptGenerator>,
    inline: Option<Arc<dyn InlineRender>>,
}

impl GenerationService {
    pub fn new(
        videos: Arc<dyn VideoStore>,
        ledger: CreditLedger,
        queue: Arc<dyn RenderQueue>,
        progress: Arc<dyn ProgressTracker>,
        scripts: Arc<dyn ScriptGenerator>,
    ) -> Self {
        Self {
            videos,
            ledger,
            queue,
            progress,
            scripts,
            inline: None,
        }
    }

    pub fn with_inline_fallback(mut self, inline: Arc<dyn InlineRender>) -> Self {
        self.inline = Some(inline);
        self
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<dyn RenderQueue> {
        &self.queue
    }

    /// Generate a script and create the video in SCRIPT_READY, debiting one credit.
    pub async fn generate_script(
        &self,
        user_id: &str,
        product: ProductData,
        style: VideoStyle,
        options: ScriptOptions,
    ) -> ApiResult<ScriptCreated> {
        let balance = self.ledger.balance(user_id).await?;
        if balance < i64::from(GENERATION_CREDIT_COST) {
            return Err(ApiError::InsufficientCredits {
                balance,
                required: i64::from(GENERATION_CREDIT_COST),
            });
        }

        let script: GeneratedScript = self.scripts.generate(&product, style, &options).await?;

        let video_id = VideoId::new();
        let video = Video::with_script(video_id.clone(), user_id, &product, style, &script);

        let debit = CreditContext::new(format!("Video generation: {}", product.title))
            .with_key(attempt_debit_key(&video_id, 0))
            .with_video(&video_id);
        let entry = self.ledger.deduct(user_id, GENERATION_CREDIT_COST, debit).await?;
        metrics::record_credits("debit", GENERATION_CREDIT_COST);

        if let Err(e) = self.videos.create(&video).await {
            error!(video_id = %video_id, error = %e, "Failed to store video, refunding debit");
            self.refund_attempt(user_id, &video_id, 0, "Refund: video could not be created")
                .await?;
            return Err(e.into());
        }

        info!(video_id = %video_id, user_id, style = %style, "Script generated");
        Ok(ScriptCreated {
            video_id,
            script: script.script,
            estimated_duration: script.estimated_duration,
            scenes: script.scenes,
            credits_remaining: entry.new_balance(),
        })
    }

    /// Replace the script of a SCRIPT_READY video.
    pub async fn edit_script(&self, user_id: &str, video_id: &VideoId, script: &str) -> ApiResult<Video> {
        let script = script.trim();
        if script.is_empty() {
            return Err(ApiError::validation("script must not be empty"));
        }
        if script.chars().count() > MAX_SCRIPT_LENGTH {
            return Err(ApiError::validation(format!(
                "script exceeds {} characters",
                MAX_SCRIPT_LENGTH
            )));
        }

        let video = self.load_owned(user_id, video_id).await?;
        let script = script.to_string();
        self.transition(video, VideoEvent::EditScript, "edit", |v| {
            v.edited_script = Some(script.clone());
            v.final_script = Some(script);
        })
        .await
    }

    /// Queue the first render of a SCRIPT_READY video.
    pub async fn confirm(&self, user_id: &str, video_id: &VideoId) -> ApiResult<Video> {
        let video = self.load_owned(user_id, video_id).await?;
        let from = video.status;
        if from.apply(VideoEvent::Confirm).is_none() {
            return Err(ApiError::invalid_status(from, "confirm"));
        }
        let job = RenderVideoJob::for_video(&video).ok_or(ApiError::NoScriptAvailable)?;

        let dispatch = self.dispatch(&job).await?;

        let confirmed = match self.transition(video, VideoEvent::Confirm, "confirm", |_| {}).await {
            Ok(video) => video,
            Err(e) => {
                if let Dispatch::Queued { newly_enqueued: true } = dispatch {
                    self.withdraw_job(&job, |v| v.status == VideoStatus::Queued).await;
                }
                return Err(e);
            }
        };

        self.start_inline(dispatch, job);
        info!(video_id = %video_id, "Video confirmed for rendering");
        Ok(confirmed)
    }

    /// Cancel a video that has not started rendering, refunding its debit.
    pub async fn cancel(&self, user_id: &str, video_id: &VideoId) -> ApiResult<Video> {
        let video = self.load_owned(user_id, video_id).await?;
        let attempt = video.attempt();

        if video.status == VideoStatus::Cancelled {
            return self.finish_cancel_refund(video).await;
        }
        if video.status.apply(VideoEvent::Cancel).is_none() {
            return Err(ApiError::invalid_status(video.status, "cancel"));
        }

        if video.status == VideoStatus::Queued {
            match self.queue.remove(&video.job_id()).await {
                Ok(removed) => debug!(video_id = %video_id, removed, "Removed queued render job"),
                // Workers skip cancelled videos, so a job left behind does no work.
                Err(e) => warn!(video_id = %video_id, error = %e, "Could not remove queued job"),
            }
        }

        let debited = video.status.holds_unresolved_debit();
        let cancelled = self
            .transition(video, VideoEvent::Cancel, "cancel", |v| {
                if debited {
                    v.credits_used = v.credits_used.saturating_sub(GENERATION_CREDIT_COST);
                }
            })
            .await?;

        if debited {
            self.refund_attempt(user_id, video_id, attempt, "Refund: video cancelled")
                .await?;
        }
        info!(video_id = %video_id, refunded = debited, "Video cancelled");
        Ok(cancelled)
    }

    /// Start a new attempt for a FAILED video.
    pub async fn retry(&self, user_id: &str, video_id: &VideoId) -> ApiResult<Video> {
        let video = self.load_owned(user_id, video_id).await?;
        if video.status.apply(VideoEvent::Retry).is_none() {
            return Err(ApiError::invalid_status(video.status, "retry"));
        }
        let script = video
            .script_for_render()
            .ok_or(ApiError::NoScriptAvailable)?
            .to_string();
        self.settle_failed_refund(&video).await?;

        let balance = self.ledger.balance(user_id).await?;
        if balance < i64::from(GENERATION_CREDIT_COST) {
            return Err(ApiError::InsufficientCredits {
                balance,
                required: i64::from(GENERATION_CREDIT_COST),
            });
        }

        let attempt = video.retry_count + 1;
        let job = RenderVideoJob::for_attempt(&video, attempt, &script);
        let dispatch = self.dispatch(&job).await?;
        let newly_enqueued = matches!(dispatch, Dispatch::Queued { newly_enqueued: true });

        let debit = CreditContext::new(format!("Video generation retry #{}", attempt))
            .with_key(attempt_debit_key(video_id, attempt))
            .with_video(video_id);
        let debited_now = match self.ledger.deduct(user_id, GENERATION_CREDIT_COST, debit).await {
            Ok(_) => {
                metrics::record_credits("debit", GENERATION_CREDIT_COST);
                true
            }
            Err(LedgerError::Duplicate(_)) => false,
            Err(e) => {
                if newly_enqueued {
                    self.withdraw_job(&job, |_| false).await;
                }
                return Err(e.into());
            }
        };

        let result = self
            .transition(video, VideoEvent::Retry, "retry", |v| {
                v.retry_count = attempt;
                v.credits_used += GENERATION_CREDIT_COST;
                v.sora_job_id = None;
                v.asset_public_id = None;
                v.asset_url = None;
                v.download_url = None;
                v.download_expires_at = None;
                v.thumbnail_url = None;
                v.error_message = None;
                v.error_code = None;
                v.completed_at = None;
                v.generation_started_at = Some(Utc::now());
            })
            .await;

        match result {
            Ok(video) => {
                self.start_inline(dispatch, job);
                info!(video_id = %video_id, attempt, "Video retry started");
                Ok(video)
            }
            Err(e) => {
                let current = self.videos.get(video_id).await?;
                let other_request_won = current.as_ref().is_some_and(|v| v.retry_count >= attempt);
                if !other_request_won {
                    if debited_now {
                        self.refund_attempt(user_id, video_id, attempt, "Refund: retry did not start")
                            .await?;
                    }
                    if newly_enqueued {
                        self.withdraw_job(&job, |_| false).await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Signed download link of a COMPLETED video. Expires the video once the
    /// link is past its expiry.
    pub async fn download(&self, user_id: &str, video_id: &VideoId) -> ApiResult<DownloadLink> {
        let video = self.load_owned(user_id, video_id).await?;
        match video.status {
            VideoStatus::Completed => {}
            VideoStatus::Expired => return Err(ApiError::DownloadExpired),
            status => return Err(ApiError::invalid_status(status, "download")),
        }

        if video.download_expired(Utc::now()) {
            match self.transition(video, VideoEvent::Expire, "expire", |_| {}).await {
                Ok(_) => info!(video_id = %video_id, "Video download expired"),
                Err(e) => debug!(video_id = %video_id, error = %e, "Expiry already recorded"),
            }
            return Err(ApiError::DownloadExpired);
        }

        let download_url = video
            .download_url
            .clone()
            .ok_or_else(|| ApiError::internal("completed video has no download URL"))?;
        Ok(DownloadLink {
            download_url,
            expires_at: video.download_expires_at,
            thumbnail_url: video.thumbnail_url,
        })
    }

    pub async fn get(&self, user_id: &str, video_id: &VideoId) -> ApiResult<VideoView> {
        let video = self.load_owned(user_id, video_id).await?;
        let progress = if video.status.is_in_flight() {
            match self.progress.latest(&video.job_id()).await {
                Ok(progress) => progress,
                Err(e) => {
                    debug!(video_id = %video_id, error = %e, "Progress unavailable");
                    None
                }
            }
        } else {
            None
        };
        Ok(VideoView { video, progress })
    }

    /// Newest-first page of the caller's videos. `page` is 1-based.
    pub async fn list(&self, user_id: &str, page: u32, limit: u32) -> ApiResult<VideoPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit);
        let videos = self.videos.list_for_user(user_id, offset, limit).await?;
        Ok(VideoPage { videos, page, limit })
    }

    async fn load_owned(&self, user_id: &str, video_id: &VideoId) -> ApiResult<Video> {
        let video = self
            .videos
            .get(video_id)
            .await?
            .ok_or(ApiError::VideoNotFound)?;
        if !video.is_owned_by(user_id) {
            warn!(video_id = %video_id, user_id, "Access to another user's video denied");
            return Err(ApiError::AccessDenied);
        }
        Ok(video)
    }

    /// Hand `job` to the queue, or to the inline fallback if the queue is
    /// down and a fallback exists.
    async fn dispatch(&self, job: &RenderVideoJob) -> ApiResult<Dispatch> {
        match self.queue.enqueue(job).await {
            Ok(EnqueueOutcome::Enqueued { .. }) => {
                metrics::record_job_enqueued("queue");
                Ok(Dispatch::Queued { newly_enqueued: true })
            }
            Ok(EnqueueOutcome::Duplicate) => Ok(Dispatch::Queued { newly_enqueued: false }),
            Err(e) if e.is_unavailable() => match &self.inline {
                Some(_) => {
                    warn!(job_id = %job.job_id, error = %e, "Queue unavailable, rendering inline");
                    metrics::record_job_enqueued("inline");
                    Ok(Dispatch::Inline)
                }
                None => {
                    error!(job_id = %job.job_id, error = %e, "Queue unavailable");
                    Err(e.into())
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    fn start_inline(&self, dispatch: Dispatch, job: RenderVideoJob) {
        if let (Dispatch::Inline, Some(inline)) = (dispatch, &self.inline) {
            inline.spawn(job);
        }
    }

    /// Remove a job this request enqueued, unless the re-read video shows the
    /// job is in use.
    async fn withdraw_job(&self, job: &RenderVideoJob, in_use: impl Fn(&Video) -> bool) {
        let keep = match self.videos.get(&job.video_id).await {
            Ok(Some(video)) => video.retry_count == job.attempt && in_use(&video),
            Ok(None) => false,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Could not re-read video, leaving job queued");
                true
            }
        };
        if keep {
            return;
        }
        if let Err(e) = self.queue.remove(&job.job_id).await {
            warn!(job_id = %job.job_id, error = %e, "Failed to withdraw job");
        }
    }

    /// Refund one attempt. A refund already recorded for the attempt counts as done.
    async fn refund_attempt(
        &self,
        user_id: &str,
        video_id: &VideoId,
        attempt: u32,
        description: &str,
    ) -> ApiResult<()> {
        let ctx = CreditContext::new(description)
            .with_key(attempt_refund_key(video_id, attempt))
            .with_video(video_id);
        match self.ledger.refund(user_id, GENERATION_CREDIT_COST, ctx).await {
            Ok(_) => {
                metrics::record_credits("refund", GENERATION_CREDIT_COST);
                Ok(())
            }
            Err(LedgerError::Duplicate(_)) => Ok(()),
            Err(e) => {
                error!(video_id = %video_id, attempt, error = %e, "Refund failed");
                Err(e.into())
            }
        }
    }

    /// Refund a failed attempt whose worker marked it FAILED but could not
    /// write the refund.
    async fn settle_failed_refund(&self, video: &Video) -> ApiResult<()> {
        let attempt = video.attempt();
        let debited = self
            .ledger
            .is_recorded(&video.user_id, &attempt_debit_key(&video.id, attempt))
            .await?;
        let refunded = self
            .ledger
            .is_recorded(&video.user_id, &attempt_refund_key(&video.id, attempt))
            .await?;
        if debited && !refunded {
            warn!(video_id = %video.id, attempt, "Failed attempt was never refunded, settling");
            self.refund_attempt(&video.user_id, &video.id, attempt, "Refund: video generation failed")
                .await?;
        }
        Ok(())
    }

    /// A repeated cancel completes a refund an earlier cancel could not write.
    async fn finish_cancel_refund(&self, video: Video) -> ApiResult<Video> {
        let attempt = video.attempt();
        let debited = self
            .ledger
            .is_recorded(&video.user_id, &attempt_debit_key(&video.id, attempt))
            .await?;
        let refunded = self
            .ledger
            .is_recorded(&video.user_id, &attempt_refund_key(&video.id, attempt))
            .await?;
        if !debited || refunded {
            return Err(ApiError::invalid_status(video.status, "cancel"));
        }
        self.refund_attempt(&video.user_id, &video.id, attempt, "Refund: video cancelled")
            .await?;
        Ok(video)
    }

    async fn transition(
        &self,
        mut video: Video,
        event: VideoEvent,
        operation: &'static str,
        edit: impl FnOnce(&mut Video),
    ) -> ApiResult<Video> {
        let from = video.status;
        let next = from
            .apply(event)
            .ok_or(ApiError::invalid_status(from, operation))?;

        edit(&mut video);
        video.set_status(next);

        if self.videos.update_if_status(&video, &[from]).await? {
            return Ok(video);
        }

        let current = self
            .videos
            .get(&video.id)
            .await?
            .map(|v| v.status)
            .unwrap_or(from);
        Err(ApiError::invalid_status(current, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use ugc_firestore::{MemoryLedgerStore, MemoryVideoStore};
    use ugc_models::{ScriptScene, TransactionType};
    use ugc_queue::{MemoryProgress, MemoryQueue, RenderStage};

    struct FixedScript {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ScriptGenerator for FixedScript {
        async fn generate(
            &self,
            product: &ProductData,
            _style: VideoStyle,
            _options: &ScriptOptions,
        ) -> ApiResult<GeneratedScript> {
            if self.fail {
                return Err(ApiError::ScriptGeneration("model unavailable".into()));
            }
            Ok(GeneratedScript {
                script: format!("Say hello to {}.", product.title),
                estimated_duration: 12,
                scenes: vec![ScriptScene {
                    order: 1,
                    description: "Hero shot".into(),
                    duration: 12,
                    voiceover: None,
                }],
            })
        }
    }

    #[derive(Default)]
    struct RecordingInline {
        jobs: Mutex<Vec<RenderVideoJob>>,
    }

    impl InlineRender for RecordingInline {
        fn spawn(&self, job: RenderVideoJob) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    struct Fixture {
        videos: Arc<MemoryVideoStore>,
        ledger_store: Arc<MemoryLedgerStore>,
        ledger: CreditLedger,
        queue: Arc<MemoryQueue>,
        progress: Arc<MemoryProgress>,
        service: GenerationService,
    }

    fn fixture() -> Fixture {
        fixture_with(false)
    }

    fn fixture_with(script_fails: bool) -> Fixture {
        let videos = Arc::new(MemoryVideoStore::new());
        let ledger_store = Arc::new(MemoryLedgerStore::new());
        let ledger = CreditLedger::new(ledger_store.clone());
        let queue = Arc::new(MemoryQueue::new());
        let progress = Arc::new(MemoryProgress::new());
        let service = GenerationService::new(
            videos.clone(),
            ledger.clone(),
            queue.clone(),
            progress.clone(),
            Arc::new(FixedScript { fail: script_fails }),
        );
        Fixture {
            videos,
            ledger_store,
            ledger,
            queue,
            progress,
            service,
        }
    }

    const USER: &str = "user-1";

    async fn fund(f: &Fixture, credits: u32) {
        if credits > 0 {
            f.ledger
                .grant(USER, credits, TransactionType::Purchase, CreditContext::new("test funds"))
                .await
                .unwrap();
        }
    }

    async fn scripted_video(f: &Fixture) -> VideoId {
        f.service
            .generate_script(
                USER,
                ProductData::new("Travel Mug").with_image("https://cdn.shop/mug.png"),
                VideoStyle::ProductShowcase,
                ScriptOptions::default(),
            )
            .await
            .unwrap()
            .video_id
    }

    async fn count(f: &Fixture, tx_type: TransactionType) -> usize {
        f.ledger_store
            .all_transactions(USER)
            .await
            .into_iter()
            .filter(|t| t.tx_type == tx_type)
            .count()
    }

    async fn stored(f: &Fixture, id: &VideoId) -> Video {
        f.videos.get(id).await.unwrap().unwrap()
    }

    /// Stand-in for a worker failing the current attempt.
    async fn fail_current_attempt(f: &Fixture, id: &VideoId) {
        let mut video = stored(f, id).await;
        f.ledger
            .refund(
                USER,
                GENERATION_CREDIT_COST,
                CreditContext::new("Refund: render failed")
                    .with_key(attempt_refund_key(id, video.retry_count))
                    .with_video(id),
            )
            .await
            .unwrap();
        video.set_status(VideoStatus::Failed);
        video.error_message = Some("Render failed. Your credit has been refunded.".into());
        f.videos.put(video).await;
    }

    #[tokio::test]
    async fn test_generate_script_debits_one_credit() {
        let f = fixture();
        fund(&f, 5).await;

        let created = f
            .service
            .generate_script(
                USER,
                ProductData::new("Travel Mug"),
                VideoStyle::ProductShowcase,
                ScriptOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(created.credits_remaining, 4);
        assert_eq!(created.script, "Say hello to Travel Mug.");
        let video = stored(&f, &created.video_id).await;
        assert_eq!(video.status, VideoStatus::ScriptReady);
        assert_eq!(video.credits_used, 1);
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);

        let debits: Vec<_> = f
            .ledger_store
            .all_transactions(USER)
            .await
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::Consumption)
            .collect();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].amount, -1);
        assert_eq!(debits[0].video_id.as_deref(), Some(created.video_id.as_str()));
    }

    #[tokio::test]
    async fn test_generate_script_without_credits_writes_nothing() {
        let f = fixture();

        let err = f
            .service
            .generate_script(USER, ProductData::new("Mug"), VideoStyle::Lifestyle, ScriptOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InsufficientCredits { balance: 0, required: 1 }));
        assert!(f.videos.list_for_user(USER, 0, 10).await.unwrap().is_empty());
        assert!(f.ledger_store.all_transactions(USER).await.is_empty());
    }

    #[tokio::test]
    async fn test_script_failure_does_not_debit() {
        let f = fixture_with(true);
        fund(&f, 2).await;

        let err = f
            .service
            .generate_script(USER, ProductData::new("Mug"), VideoStyle::TalkingHead, ScriptOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "SCRIPT_GENERATION_FAILED");
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_edit_script_only_while_script_ready() {
        let f = fixture();
        fund(&f, 1).await;
        let id = scripted_video(&f).await;

        let edited = f.service.edit_script(USER, &id, "  New take on the mug.  ").await.unwrap();
        assert_eq!(edited.final_script.as_deref(), Some("New take on the mug."));
        assert_eq!(edited.status, VideoStatus::ScriptReady);

        let err = f.service.edit_script(USER, &id, "   ").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        f.service.confirm(USER, &id).await.unwrap();
        let err = f.service.edit_script(USER, &id, "Too late").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_VIDEO_STATUS");
    }

    #[tokio::test]
    async fn test_confirm_enqueues_current_attempt() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        f.service.edit_script(USER, &id, "Edited script").await.unwrap();

        let video = f.service.confirm(USER, &id).await.unwrap();

        assert_eq!(video.status, VideoStatus::Queued);
        let jobs = f.queue.pending();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id.as_str(), format!("render-{}-0", id));
        assert_eq!(jobs[0].script, "Edited script");
        assert_eq!(jobs[0].product_image_url.as_deref(), Some("https://cdn.shop/mug.png"));
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_confirm_is_rejected_without_second_job() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;

        f.service.confirm(USER, &id).await.unwrap();
        let err = f.service.confirm(USER, &id).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::InvalidVideoStatus { status: VideoStatus::Queued, .. }
        ));
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_confirm_is_illegal_outside_script_ready() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        let template = stored(&f, &id).await;

        for status in VideoStatus::ALL.iter().copied().filter(|s| *s != VideoStatus::ScriptReady) {
            let mut video = template.clone();
            video.set_status(status);
            f.videos.put(video).await;

            let err = f.service.confirm(USER, &id).await.unwrap_err();
            assert_eq!(err.code(), "INVALID_VIDEO_STATUS", "status {}", status);
            assert_eq!(stored(&f, &id).await.status, status);
        }

        assert!(f.queue.is_empty());
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_confirm_with_queue_down_is_unavailable() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        f.queue.set_unavailable(true);

        let err = f.service.confirm(USER, &id).await.unwrap_err();

        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        assert_eq!(stored(&f, &id).await.status, VideoStatus::ScriptReady);
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_confirm_with_queue_down_uses_inline_fallback() {
        let mut f = fixture();
        let inline = Arc::new(RecordingInline::default());
        f.service = GenerationService::new(
            f.videos.clone(),
            f.ledger.clone(),
            f.queue.clone(),
            f.progress.clone(),
            Arc::new(FixedScript { fail: false }),
        )
        .with_inline_fallback(inline.clone());
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        f.queue.set_unavailable(true);

        let video = f.service.confirm(USER, &id).await.unwrap();

        assert_eq!(video.status, VideoStatus::Queued);
        let jobs = inline.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].video_id, id);
    }

    #[tokio::test]
    async fn test_cancel_queued_video_removes_job_and_refunds() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        f.service.confirm(USER, &id).await.unwrap();
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);

        let video = f.service.cancel(USER, &id).await.unwrap();

        assert_eq!(video.status, VideoStatus::Cancelled);
        assert_eq!(video.credits_used, 0);
        assert!(f.queue.is_empty());
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 5);
        assert_eq!(count(&f, TransactionType::Refund).await, 1);

        let err = f.service.cancel(USER, &id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_VIDEO_STATUS");
        assert_eq!(count(&f, TransactionType::Refund).await, 1);
    }

    #[tokio::test]
    async fn test_repeated_cancel_completes_missing_refund() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        let mut video = stored(&f, &id).await;
        video.set_status(VideoStatus::Cancelled);
        f.videos.put(video).await;

        f.service.cancel(USER, &id).await.unwrap();

        assert_eq!(f.ledger.balance(USER).await.unwrap(), 5);
        assert_eq!(count(&f, TransactionType::Refund).await, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_generating_is_rejected() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        let mut video = stored(&f, &id).await;
        video.set_status(VideoStatus::Generating);
        f.videos.put(video).await;

        let err = f.service.cancel(USER, &id).await.unwrap_err();

        assert_eq!(err.code(), "INVALID_VIDEO_STATUS");
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_retry_failed_video_debits_next_attempt() {
        let f = fixture();
        fund(&f, 5).await;
        let id = scripted_video(&f).await;
        f.service.confirm(USER, &id).await.unwrap();
        f.queue.pop();
        fail_current_attempt(&f, &id).await;
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 5);

        let video = f.service.retry(USER, &id).await.unwrap();

        assert_eq!(video.status, VideoStatus::Generating);
        assert_eq!(video.retry_count, 1);
        assert!(video.error_message.is_none());
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
        let jobs = f.queue.pending();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].attempt, 1);
        assert!(f
            .ledger
            .is_recorded(USER, &attempt_debit_key(&id, 1))
            .await
            .unwrap());

        let err = f.service.retry(USER, &id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_VIDEO_STATUS");
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_retry_settles_missing_refund_first() {
        let f = fixture();
        fund(&f, 1).await;
        let id = scripted_video(&f).await;
        f.service.confirm(USER, &id).await.unwrap();
        f.queue.pop();
        let mut video = stored(&f, &id).await;
        video.set_status(VideoStatus::Failed);
        f.videos.put(video).await;
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 0);

        let video = f.service.retry(USER, &id).await.unwrap();

        assert_eq!(video.retry_count, 1);
        assert_eq!(f.ledger.balance(USER).await.unwrap(), 0);
        assert!(f
            .ledger
            .is_recorded(USER, &attempt_refund_key(&id, 0))
            .await
            .unwrap());
        assert_eq!(count(&f, TransactionType::Refund).await, 1);
    }

    #[tokio::test]
    async fn test_retry_without_credits_leaves_video_failed() {
        let f = fixture();
        fund(&f, 1).await;
        let id = scripted_video(&f).await;
        f.service.confirm(USER, &id).await.unwrap();
        f.queue.pop();
        fail_current_attempt(&f, &id).await;
        f.ledger
            .deduct(USER, 1, CreditContext::new("spent elsewhere"))
            .await
            .unwrap();

        let err = f.service.retry(USER, &id).await.unwrap_err();

        assert_eq!(err.code(), "INSUFFICIENT_CREDITS");
        assert_eq!(stored(&f, &id).await.status, VideoStatus::Failed);
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_other_users_video_is_forbidden() {
        let f = fixture();
        fund(&f, 1).await;
        let id = scripted_video(&f).await;

        let err = f.service.confirm("intruder", &id).await.unwrap_err();
        assert_eq!(err.code(), "ACCESS_DENIED");

        let err = f
            .service
            .get(USER, &VideoId::from_string("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VIDEO_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_download_expires_video_after_deadline() {
        let f = fixture();
        fund(&f, 1).await;
        let id = scripted_video(&f).await;
        let mut video = stored(&f, &id).await;
        video.set_status(VideoStatus::Completed);
        video.download_url = Some("https://assets.example/signed".into());
        video.download_expires_at = Some(Utc::now() + chrono::Duration::days(7));
        f.videos.put(video.clone()).await;

        let link = f.service.download(USER, &id).await.unwrap();
        assert_eq!(link.download_url, "https://assets.example/signed");

        video.download_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        f.videos.put(video).await;
        let err = f.service.download(USER, &id).await.unwrap_err();
        assert!(matches!(err, ApiError::DownloadExpired));
        assert_eq!(stored(&f, &id).await.status, VideoStatus::Expired);

        let err = f.service.download(USER, &id).await.unwrap_err();
        assert!(matches!(err, ApiError::DownloadExpired));
    }

    #[tokio::test]
    async fn test_get_includes_progress_for_in_flight_video() {
        let f = fixture();
        fund(&f, 1).await;
        let id = scripted_video(&f).await;
        let video = f.service.confirm(USER, &id).await.unwrap();
        f.progress
            .report(&JobProgress::new(&video.job_id(), &id, 10, RenderStage::Starting))
            .await
            .unwrap();

        let view = f.service.get(USER, &id).await.unwrap();

        assert_eq!(view.progress.map(|p| p.percent), Some(10));
    }

    #[tokio::test]
    async fn test_list_clamps_page_size() {
        let f = fixture();
        fund(&f, 3).await;
        for _ in 0..3 {
            scripted_video(&f).await;
        }

        let page = f.service.list(USER, 0, 500).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        assert_eq!(page.videos.len(), 3);

        let page = f.service.list(USER, 2, 2).await.unwrap();
        assert_eq!(page.videos.len(), 1);
    }
}
