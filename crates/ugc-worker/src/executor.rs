//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ugc_queue::{Delivery, JobQueue, RenderVideoJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::RenderPipeline;

/// How a delivery that ended in an infrastructure error goes back on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redelivery {
    /// Re-offer later without spending a delivery attempt.
    Defer(Duration),
    /// Spend a delivery attempt; dead-letter once they run out.
    Retry,
}

/// Not-ready jobs are usually a confirm or retry whose video write lands just
/// after the enqueue. They wait instead of burning delivery attempts, up to
/// a job age of `window`.
#[derive(Debug, Clone, Copy)]
struct NotReadyPolicy {
    delay: Duration,
    window: Duration,
}

impl NotReadyPolicy {
    fn from_config(config: &WorkerConfig) -> Self {
        Self {
            delay: config.not_ready_delay,
            window: config.not_ready_window,
        }
    }

    fn redelivery(&self, error: &WorkerError, job: &RenderVideoJob, now: DateTime<Utc>) -> Redelivery {
        if !matches!(error, WorkerError::NotReady(_)) {
            return Redelivery::Retry;
        }
        let age = (now - job.created_at).to_std().unwrap_or_default();
        if age < self.window {
            Redelivery::Defer(self.delay)
        } else {
            Redelivery::Retry
        }
    }
}

/// Pulls render jobs from the stream and runs them through the pipeline,
/// at most `max_concurrent_jobs` at a time.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: Arc<RenderPipeline>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<JobQueue>, pipeline: Arc<RenderPipeline>) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue,
            pipeline,
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run until [`shutdown`](Self::shutdown) is signalled, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            consumer = %self.consumer_name,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Starting job executor"
        );

        self.queue.init().await?;

        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.job_semaphore),
            NotReadyPolicy::from_config(&self.config),
            self.consumer_name.clone(),
            self.config.claim_interval,
            self.shutdown.subscribe(),
        ));
        let promote_task = tokio::spawn(Self::promote_loop(
            Arc::clone(&self.queue),
            self.config.promote_interval,
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error consuming jobs");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        promote_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "In-flight jobs still running at shutdown; they will be redelivered"
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if deliveries.is_empty() {
            return Ok(());
        }
        debug!(count = deliveries.len(), "Consumed jobs from queue");

        for delivery in deliveries {
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;
            let pipeline = Arc::clone(&self.pipeline);
            let queue = Arc::clone(&self.queue);
            let not_ready = NotReadyPolicy::from_config(&self.config);

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(pipeline, queue, not_ready, delivery).await;
            });
        }

        Ok(())
    }

    /// Take over deliveries whose consumer died mid-job.
    async fn claim_loop(
        queue: Arc<JobQueue>,
        pipeline: Arc<RenderPipeline>,
        semaphore: Arc<Semaphore>,
        not_ready: NotReadyPolicy,
        consumer_name: String,
        every: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let available = semaphore.available_permits();
                    if available == 0 {
                        continue;
                    }
                    let deliveries = match queue.claim_pending(&consumer_name, available.min(5)).await {
                        Ok(deliveries) => deliveries,
                        Err(e) => {
                            warn!(error = %e, "Failed to claim pending jobs");
                            continue;
                        }
                    };
                    if !deliveries.is_empty() {
                        info!(count = deliveries.len(), "Claimed pending jobs");
                    }
                    for delivery in deliveries {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            return;
                        };
                        let pipeline = Arc::clone(&pipeline);
                        let queue = Arc::clone(&queue);
                        tokio::spawn(async move {
                            let _permit = permit;
                            Self::execute_job(pipeline, queue, not_ready, delivery).await;
                        });
                    }
                }
            }
        }
    }

    /// Move delayed retries whose backoff has elapsed back onto the stream.
    async fn promote_loop(queue: Arc<JobQueue>, every: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match queue.promote_due(100).await {
                        Ok(0) => {}
                        Ok(moved) => debug!(moved, "Promoted delayed jobs"),
                        Err(e) => warn!(error = %e, "Failed to promote delayed jobs"),
                    }
                }
            }
        }
    }

    async fn execute_job(
        pipeline: Arc<RenderPipeline>,
        queue: Arc<JobQueue>,
        not_ready: NotReadyPolicy,
        delivery: Delivery,
    ) {
        let job_id = delivery.job.job_id.clone();
        info!(
            job_id = %job_id,
            delivery_attempt = delivery.job.delivery_attempt,
            "Executing job"
        );

        match pipeline.process(&delivery.job).await {
            Ok(outcome) => {
                info!(job_id = %job_id, outcome = ?outcome.kind(), "Job finished");
                if let Err(e) = queue.ack(&delivery, outcome.kind(), outcome.detail()).await {
                    error!(job_id = %job_id, error = %e, "Failed to ack job");
                }
            }
            Err(e) => {
                if let Redelivery::Defer(delay) = not_ready.redelivery(&e, &delivery.job, Utc::now()) {
                    info!(job_id = %job_id, reason = %e, "Video not ready for job, deferring");
                    match queue.defer(&delivery, delay).await {
                        Ok(()) => metrics::record_deferred(),
                        Err(qe) => error!(job_id = %job_id, error = %qe, "Failed to defer job"),
                    }
                    return;
                }

                warn!(job_id = %job_id, error = %e, "Job hit an infrastructure error");
                match queue.retry_or_dead_letter(&delivery, &e.to_string()).await {
                    Ok(dead_lettered) => {
                        metrics::record_redelivery(dead_lettered);
                        if dead_lettered {
                            error!(job_id = %job_id, "Job exceeded delivery attempts, moved to DLQ");
                        }
                    }
                    Err(qe) => {
                        error!(job_id = %job_id, error = %qe, "Failed to schedule redelivery");
                    }
                }
            }
        }
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ugc_models::{GeneratedScript, ProductData, Video, VideoId, VideoStyle};

    fn job() -> RenderVideoJob {
        let script = GeneratedScript {
            script: "Folds flat, opens in one second.".into(),
            estimated_duration: 15,
            scenes: vec![],
        };
        let video = Video::with_script(
            VideoId::new(),
            "user-1",
            &ProductData::new("Pop-up Tent"),
            VideoStyle::ProductShowcase,
            &script,
        );
        RenderVideoJob::for_video(&video).unwrap()
    }

    fn policy() -> NotReadyPolicy {
        NotReadyPolicy::from_config(&WorkerConfig::default())
    }

    #[test]
    fn test_not_ready_job_is_deferred_without_spending_attempts() {
        let mut job = job();
        job.delivery_attempt = 7;
        let error = WorkerError::not_ready("confirm not committed yet");

        assert_eq!(
            policy().redelivery(&error, &job, Utc::now()),
            Redelivery::Defer(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_not_ready_past_window_counts_toward_dead_letter() {
        let job = job();
        let error = WorkerError::not_ready("retry to attempt 2 not committed yet");
        let later = job.created_at + chrono::Duration::hours(2);

        assert_eq!(policy().redelivery(&error, &job, later), Redelivery::Retry);
    }

    #[test]
    fn test_other_infrastructure_errors_spend_attempts() {
        let job = job();
        let error = WorkerError::config_error("job semaphore closed");

        assert_eq!(policy().redelivery(&error, &job, Utc::now()), Redelivery::Retry);
    }
}
