//! Render job queue on Redis Streams.
//!
//! This crate provides:
//! - Idempotent job enqueueing keyed by job id
//! - Worker consumption with delayed retry and DLQ
//! - Bounded retention of finished job outcomes
//! - Progress snapshots and Pub/Sub updates

pub mod error;
pub mod job;
pub mod progress;
pub mod queue;

#[cfg(any(test, feature = "memory"))]
pub mod memory;

pub use error::{QueueError, QueueResult};
pub use job::RenderVideoJob;
pub use progress::{
    JobProgress, ProgressStore, ProgressTracker, RenderStage, PROGRESS_CHANNEL,
    PROGRESS_TTL_SECS,
};
pub use queue::{
    Delivery, EnqueueOutcome, JobOutcomeKind, JobQueue, JobRecord, QueueConfig, RenderQueue,
};

#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryProgress, MemoryQueue};
