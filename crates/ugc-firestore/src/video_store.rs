//! Video record persistence.
//!
//! Records are single-writer-at-a-time (the request path or the worker that
//! owns the current job), so every write is conditional on the status the
//! writer expects rather than taking a lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use ugc_models::{Video, VideoId, VideoStatus};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{
    from_document, to_fields, Direction, FieldOp, Fields, Filter, Precondition, StructuredQuery,
    ToFirestoreValue,
};

const VIDEOS_COLLECTION: &str = "videos";

const TIMESTAMP_FIELDS: &[&str] = &[
    "createdAt",
    "updatedAt",
    "generationStartedAt",
    "completedAt",
    "downloadExpiresAt",
];

/// Attempts at a conditional write before reporting contention.
const MAX_CONDITIONAL_ATTEMPTS: u32 = 5;

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert a new record; fails with `AlreadyExists` on id collision.
    async fn create(&self, video: &Video) -> FirestoreResult<()>;

    async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<Video>>;

    /// Replace the stored record with `video` if its stored status is one of
    /// `expected`. Returns `false` (writing nothing) if the status moved on.
    async fn update_if_status(&self, video: &Video, expected: &[VideoStatus]) -> FirestoreResult<bool>;

    /// A user's videos, newest first.
    async fn list_for_user(&self, user_id: &str, offset: u32, limit: u32) -> FirestoreResult<Vec<Video>>;

    /// Videos in `status` whose generation started before `before`, oldest first.
    async fn list_started_before(
        &self,
        status: VideoStatus,
        before: DateTime<Utc>,
        limit: u32,
    ) -> FirestoreResult<Vec<Video>>;
}

pub struct FirestoreVideoStore {
    client: FirestoreClient,
}

impl FirestoreVideoStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    fn fields(video: &Video) -> FirestoreResult<Fields> {
        to_fields(video, TIMESTAMP_FIELDS)
    }
}

#[async_trait]
impl VideoStore for FirestoreVideoStore {
    async fn create(&self, video: &Video) -> FirestoreResult<()> {
        self.client
            .create_document(VIDEOS_COLLECTION, video.id.as_str(), Self::fields(video)?)
            .await?;
        Ok(())
    }

    async fn get(&self, video_id: &VideoId) -> FirestoreResult<Option<Video>> {
        self.client
            .get_document(VIDEOS_COLLECTION, video_id.as_str())
            .await?
            .map(|doc| from_document(&doc))
            .transpose()
    }

    async fn update_if_status(&self, video: &Video, expected: &[VideoStatus]) -> FirestoreResult<bool> {
        let fields = Self::fields(video)?;

        for attempt in 0..MAX_CONDITIONAL_ATTEMPTS {
            let doc = self
                .client
                .get_document(VIDEOS_COLLECTION, video.id.as_str())
                .await?
                .ok_or_else(|| FirestoreError::not_found(format!("videos/{}", video.id)))?;

            let stored = doc
                .get::<String>("status")
                .and_then(|s| VideoStatus::parse(&s));
            if !stored.is_some_and(|s| expected.contains(&s)) {
                debug!(
                    video_id = %video.id,
                    stored = ?stored,
                    expected = ?expected,
                    "Conditional video update skipped, status moved on"
                );
                return Ok(false);
            }

            let update_time = doc.update_time.clone().ok_or_else(|| {
                FirestoreError::invalid_document(format!("videos/{} has no updateTime", video.id))
            })?;

            match self
                .client
                .patch_document(
                    VIDEOS_COLLECTION,
                    video.id.as_str(),
                    fields.clone(),
                    None,
                    Some(Precondition::updated_at(update_time)),
                )
                .await
            {
                Ok(_) => return Ok(true),
                Err(e) if e.is_precondition_failed() => {
                    debug!(video_id = %video.id, attempt = attempt + 1, "Video changed underneath, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        Err(FirestoreError::PreconditionFailed(format!(
            "videos/{} kept changing during update",
            video.id
        )))
    }

    async fn list_for_user(&self, user_id: &str, offset: u32, limit: u32) -> FirestoreResult<Vec<Video>> {
        let query = StructuredQuery::collection(VIDEOS_COLLECTION)
            .filter(Filter::eq("userId", user_id.to_firestore_value()))
            .order_by("createdAt", Direction::Descending)
            .offset(offset)
            .limit(limit);

        let docs = self.client.run_query("", query).await?;
        docs.iter().map(from_document::<Video>).collect()
    }

    async fn list_started_before(
        &self,
        status: VideoStatus,
        before: DateTime<Utc>,
        limit: u32,
    ) -> FirestoreResult<Vec<Video>> {
        let query = StructuredQuery::collection(VIDEOS_COLLECTION)
            .filter(Filter::eq("status", status.as_str().to_firestore_value()))
            .filter(Filter::field(
                "generationStartedAt",
                FieldOp::LessThan,
                before.to_firestore_value(),
            ))
            .order_by("generationStartedAt", Direction::Ascending)
            .limit(limit);

        let docs = self.client.run_query("", query).await?;
        docs.iter().map(from_document::<Video>).collect()
    }
}
