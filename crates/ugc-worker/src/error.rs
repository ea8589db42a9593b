//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The request that enqueued this job has not committed its state change yet.
    #[error("Video not ready for render: {0}")]
    NotReady(String),

    /// Another actor moved the video on; this delivery has nothing left to do.
    #[error("Video state changed underneath job: {0}")]
    Superseded(String),

    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("Render did not finish after {attempts} status checks")]
    RenderTimeout { attempts: u32 },

    #[error("Render incomplete: {0}")]
    Incomplete(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Render provider error: {0}")]
    Render(#[from] ugc_render::RenderError),

    #[error("Storage error: {0}")]
    Storage(#[from] ugc_storage::StorageError),

    #[error("Firestore error: {0}")]
    Firestore(#[from] ugc_firestore::FirestoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ugc_firestore::LedgerError),

    #[error("Queue error: {0}")]
    Queue(#[from] ugc_queue::QueueError),
}

impl WorkerError {
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn superseded(msg: impl Into<String>) -> Self {
        Self::Superseded(msg.into())
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Self::Incomplete(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Faults in our own infrastructure. These propagate to the queue for
    /// redelivery instead of failing the video.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            WorkerError::NotReady(_)
                | WorkerError::Firestore(_)
                | WorkerError::Ledger(_)
                | WorkerError::Queue(_)
                | WorkerError::ConfigError(_)
        )
    }
}
