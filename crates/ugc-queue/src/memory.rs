//! In-memory queue and progress tracker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use ugc_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::job::RenderVideoJob;
use crate::progress::{JobProgress, ProgressTracker};
use crate::queue::{EnqueueOutcome, RenderQueue};

#[derive(Default)]
struct QueueState {
    pending: Vec<RenderVideoJob>,
    live: HashSet<JobId>,
    next_id: u64,
}

/// FIFO render queue with the same dedup rules as the Redis queue.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the broker were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn pending(&self) -> Vec<RenderVideoJob> {
        self.lock().pending.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the oldest job, as a worker would.
    pub fn pop(&self) -> Option<RenderVideoJob> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            None
        } else {
            Some(state.pending.remove(0))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::unavailable("memory queue offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl RenderQueue for MemoryQueue {
    async fn enqueue(&self, job: &RenderVideoJob) -> QueueResult<EnqueueOutcome> {
        self.check_available()?;
        let mut state = self.lock();
        if !state.live.insert(job.job_id.clone()) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        state.next_id += 1;
        let message_id = format!("{}-0", state.next_id);
        state.pending.push(job.clone());
        Ok(EnqueueOutcome::Enqueued { message_id })
    }

    async fn remove(&self, job_id: &JobId) -> QueueResult<bool> {
        self.check_available()?;
        let mut state = self.lock();
        state.live.remove(job_id);
        let before = state.pending.len();
        state.pending.retain(|j| &j.job_id != job_id);
        Ok(state.pending.len() != before)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check_available()
    }
}

/// Progress tracker keeping the latest snapshot and the full history.
#[derive(Default)]
pub struct MemoryProgress {
    latest: Mutex<HashMap<JobId, JobProgress>>,
    history: Mutex<Vec<JobProgress>>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<JobProgress> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProgressTracker for MemoryProgress {
    async fn report(&self, progress: &JobProgress) -> QueueResult<()> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(progress.job_id.clone(), progress.clone());
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(progress.clone());
        Ok(())
    }

    async fn latest(&self, job_id: &JobId) -> QueueResult<Option<JobProgress>> {
        Ok(self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ugc_models::{VideoId, VideoStyle};

    fn job(attempt: u32) -> RenderVideoJob {
        let video_id = VideoId::from("v1");
        RenderVideoJob {
            job_id: JobId::for_attempt(&video_id, attempt),
            user_id: "u1".into(),
            video_id,
            attempt,
            script: "script".into(),
            style: VideoStyle::Lifestyle,
            duration: 15,
            product_image_url: None,
            created_at: Utc::now(),
            delivery_attempt: 0,
        }
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_detected() {
        let queue = MemoryQueue::new();
        assert!(!queue.enqueue(&job(0)).await.unwrap().is_duplicate());
        assert!(queue.enqueue(&job(0)).await.unwrap().is_duplicate());
        assert!(!queue.enqueue(&job(1)).await.unwrap().is_duplicate());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_allows_reenqueue() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job(0)).await.unwrap();
        assert!(queue.remove(&job(0).job_id).await.unwrap());
        assert!(queue.is_empty());
        assert!(!queue.remove(&job(0).job_id).await.unwrap());
        assert!(!queue.enqueue(&job(0)).await.unwrap().is_duplicate());
    }

    #[tokio::test]
    async fn test_processed_job_id_stays_deduplicated() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job(0)).await.unwrap();
        assert!(queue.pop().is_some());

        assert!(queue.enqueue(&job(0)).await.unwrap().is_duplicate());
        assert!(queue.is_empty());
        assert!(!queue.enqueue(&job(1)).await.unwrap().is_duplicate());
    }

    #[tokio::test]
    async fn test_unavailable_queue_errors() {
        let queue = MemoryQueue::new();
        queue.set_unavailable(true);
        let err = queue.enqueue(&job(0)).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
