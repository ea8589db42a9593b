//! Render job queue on Redis Streams.
//!
//! Layout:
//! - `stream_name`: pending jobs, one entry per job (`job` = JSON payload)
//! - `{stream_name}:delayed` + `:payloads`: jobs waiting out a retry backoff
//! - `{stream_name}:dedup:{jobId}`: message id of the live entry for a job
//! - `dlq_stream_name`: jobs that exhausted their delivery attempts
//! - `{stream_name}:completed` / `:failed`: bounded outcome history

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::streams::{StreamClaimReply, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ugc_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::job::RenderVideoJob;

/// Dedup marker for a job sitting in the delayed set.
const DELAYED_MARKER: &str = "delayed";

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
  return false
end
local id = redis.call('XADD', KEYS[1], '*', 'job', ARGV[1], 'key', ARGV[2])
redis.call('SET', KEYS[2], id, 'EX', ARGV[3])
return id
"#;

const REMOVE_SCRIPT: &str = r#"
local removed = 0
local id = redis.call('GET', KEYS[1])
if id and id ~= ARGV[2] then
  removed = removed + redis.call('XDEL', KEYS[2], id)
end
removed = removed + redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('DEL', KEYS[1])
return removed
"#;

const PROMOTE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local moved = 0
for _, job_id in ipairs(ids) do
  local payload = redis.call('HGET', KEYS[2], job_id)
  redis.call('ZREM', KEYS[1], job_id)
  redis.call('HDEL', KEYS[2], job_id)
  if payload then
    local id = redis.call('XADD', KEYS[3], '*', 'job', payload, 'key', job_id)
    redis.call('SET', ARGV[3] .. job_id, id, 'EX', ARGV[4])
    moved = moved + 1
  end
end
return moved
"#;

/// Producer side of the render queue, as seen by the API.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Enqueue a job. A second enqueue of the same job id returns
    /// [`EnqueueOutcome::Duplicate`] until `dedup_ttl` expires, even after the
    /// first has been acked; only [`RenderQueue::remove`] clears the key
    /// early. Attempt numbers only grow, so an acked job id is never needed
    /// again.
    async fn enqueue(&self, job: &RenderVideoJob) -> QueueResult<EnqueueOutcome>;

    /// Remove a not-yet-processed job. Returns whether anything was removed.
    async fn remove(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Broker connectivity check.
    async fn ping(&self) -> QueueResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued { message_id: String },
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate)
    }
}

/// A job read from the stream, still pending until acked.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub job: RenderVideoJob,
}

/// Terminal outcome recorded in the retention lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcomeKind {
    Completed,
    Failed,
    Skipped,
    DeadLettered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub video_id: String,
    pub outcome: JobOutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub delivery_attempt: u32,
    pub finished_at: chrono::DateTime<Utc>,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub dlq_stream_name: String,
    /// Deliveries allowed before a job goes to the DLQ
    pub max_delivery_attempts: u32,
    /// First redelivery delay; doubles per attempt
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Idle time after which a pending entry may be claimed by another worker.
    /// Must exceed the longest render poll window.
    pub visibility_timeout: Duration,
    pub dedup_ttl: Duration,
    pub completed_retention: usize,
    pub completed_retention_ttl: Duration,
    pub failed_retention: usize,
    pub failed_retention_ttl: Duration,
    pub dlq_max_len: usize,
    /// Attempts for a single enqueue against a flaky broker
    pub enqueue_attempts: u32,
    pub enqueue_base_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "ugc:render_jobs".to_string(),
            consumer_group: "ugc:render_workers".to_string(),
            dlq_stream_name: "ugc:render_jobs:dlq".to_string(),
            max_delivery_attempts: 3,
            retry_base_delay: Duration::from_millis(2000),
            retry_max_delay: Duration::from_secs(300),
            visibility_timeout: Duration::from_secs(1800),
            dedup_ttl: Duration::from_secs(86_400),
            completed_retention: 1000,
            completed_retention_ttl: Duration::from_secs(86_400),
            failed_retention: 5000,
            failed_retention_ttl: Duration::from_secs(7 * 86_400),
            dlq_max_len: 10_000,
            enqueue_attempts: 3,
            enqueue_base_delay: Duration::from_millis(200),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_delivery_attempts: std::env::var("QUEUE_MAX_DELIVERY_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_delivery_attempts),
            retry_base_delay: std::env::var("QUEUE_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
            ..defaults
        }
    }

    /// Backoff before redelivering a job that has failed `delivery_attempt` times.
    pub fn retry_delay(&self, delivery_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(delivery_attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.stream_name)
    }

    fn delayed_payloads_key(&self) -> String {
        format!("{}:delayed:payloads", self.stream_name)
    }

    fn dedup_prefix(&self) -> String {
        format!("{}:dedup:", self.stream_name)
    }

    fn dedup_key(&self, job_id: &JobId) -> String {
        format!("{}{}", self.dedup_prefix(), job_id.as_str())
    }

    fn completed_key(&self) -> String {
        format!("{}:completed", self.stream_name)
    }

    fn failed_key(&self) -> String {
        format!("{}:failed", self.stream_name)
    }
}

/// Redis-backed render job queue.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create the consumer group if it does not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn try_enqueue(&self, job: &RenderVideoJob) -> QueueResult<EnqueueOutcome> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        let message_id: Option<String> = redis::Script::new(ENQUEUE_SCRIPT)
            .key(&self.config.stream_name)
            .key(self.config.dedup_key(&job.job_id))
            .arg(payload)
            .arg(job.idempotency_key())
            .arg(self.config.dedup_ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;

        Ok(match message_id {
            Some(message_id) => EnqueueOutcome::Enqueued { message_id },
            None => EnqueueOutcome::Duplicate,
        })
    }

    /// Read up to `count` new jobs for `consumer`, blocking for `block_ms`.
    ///
    /// Entries whose payload cannot be decoded are acked and dropped.
    pub async fn consume(
        &self,
        consumer: &str,
        block_ms: usize,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, consumer)
            .block(block_ms)
            .count(count);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await?;

        let mut deliveries = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                match self.decode_entry(&entry.id, entry.get::<String>("job")) {
                    Some(job) => deliveries.push(Delivery {
                        message_id: entry.id,
                        job,
                    }),
                    None => self.drop_malformed(&mut conn, &entry.id).await?,
                }
            }
        }

        Ok(deliveries)
    }

    /// Claim entries another consumer left idle past the visibility timeout.
    pub async fn claim_pending(&self, consumer: &str, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle = self.config.visibility_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.config.stream_name,
                &self.config.consumer_group,
                consumer,
                min_idle,
                &ids,
            )
            .await?;

        let mut deliveries = Vec::new();
        for entry in claimed.ids {
            match self.decode_entry(&entry.id, entry.get::<String>("job")) {
                Some(job) => deliveries.push(Delivery {
                    message_id: entry.id,
                    job,
                }),
                None => self.drop_malformed(&mut conn, &entry.id).await?,
            }
        }

        if !deliveries.is_empty() {
            info!(count = deliveries.len(), consumer, "Claimed idle render jobs");
        }

        Ok(deliveries)
    }

    fn decode_entry(&self, message_id: &str, payload: Option<String>) -> Option<RenderVideoJob> {
        let payload = payload?;
        match serde_json::from_str(&payload) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(message_id, error = %e, "Dropping malformed job payload");
                None
            }
        }
    }

    async fn drop_malformed(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message_id: &str,
    ) -> QueueResult<()> {
        let _: () = redis::pipe()
            .atomic()
            .xack(&self.config.stream_name, &self.config.consumer_group, &[message_id])
            .ignore()
            .xdel(&self.config.stream_name, &[message_id])
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }

    /// Acknowledge a finished delivery and record its outcome.
    pub async fn ack(
        &self,
        delivery: &Delivery,
        outcome: JobOutcomeKind,
        detail: Option<String>,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let record = self.record(&delivery.job, outcome, detail)?;
        let (list, limit, ttl) = match outcome {
            JobOutcomeKind::Failed | JobOutcomeKind::DeadLettered => (
                self.config.failed_key(),
                self.config.failed_retention,
                self.config.failed_retention_ttl,
            ),
            _ => (
                self.config.completed_key(),
                self.config.completed_retention,
                self.config.completed_retention_ttl,
            ),
        };

        let _: () = redis::pipe()
            .atomic()
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[&delivery.message_id],
            )
            .ignore()
            .xdel(&self.config.stream_name, &[&delivery.message_id])
            .ignore()
            .lpush(&list, record)
            .ignore()
            .ltrim(&list, 0, limit.saturating_sub(1) as isize)
            .ignore()
            .expire(&list, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %delivery.job.job_id, ?outcome, "Acknowledged render job");
        Ok(())
    }

    /// Handle an infrastructure failure: redeliver after backoff, or move to
    /// the DLQ once `max_delivery_attempts` is reached. Returns true if the
    /// job was dead-lettered.
    pub async fn retry_or_dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<bool> {
        let next = delivery.job.next_delivery();
        if next.delivery_attempt >= self.config.max_delivery_attempts {
            self.dead_letter(delivery, error).await?;
            return Ok(true);
        }
        self.schedule_retry(delivery, &next, self.config.retry_delay(next.delivery_attempt))
            .await?;
        Ok(false)
    }

    /// Re-offer a delivery after `delay` without spending a delivery attempt.
    /// For jobs that arrived before their video was ready for them.
    pub async fn defer(&self, delivery: &Delivery, delay: Duration) -> QueueResult<()> {
        self.schedule_retry(delivery, &delivery.job, delay).await
    }

    async fn schedule_retry(
        &self,
        delivery: &Delivery,
        next: &RenderVideoJob,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let job_id = next.job_id.as_str();
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let payload = serde_json::to_string(next)?;

        let _: () = redis::pipe()
            .atomic()
            .zadd(self.config.delayed_key(), job_id, ready_at)
            .ignore()
            .hset(self.config.delayed_payloads_key(), job_id, payload)
            .ignore()
            .set_ex(
                self.config.dedup_key(&next.job_id),
                DELAYED_MARKER,
                self.config.dedup_ttl.as_secs(),
            )
            .ignore()
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[&delivery.message_id],
            )
            .ignore()
            .xdel(&self.config.stream_name, &[&delivery.message_id])
            .ignore()
            .query_async(&mut conn)
            .await?;

        info!(
            job_id,
            delivery_attempt = next.delivery_attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled render job retry"
        );
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&delivery.job)?;
        let record = self.record(
            &delivery.job,
            JobOutcomeKind::DeadLettered,
            Some(error.to_string()),
        )?;
        let failed = self.config.failed_key();

        let _: () = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.dlq_max_len)
            .arg("*")
            .arg("job")
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .ignore()
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[&delivery.message_id],
            )
            .ignore()
            .xdel(&self.config.stream_name, &[&delivery.message_id])
            .ignore()
            .lpush(&failed, record)
            .ignore()
            .ltrim(&failed, 0, self.config.failed_retention.saturating_sub(1) as isize)
            .ignore()
            .expire(&failed, self.config.failed_retention_ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        warn!(
            job_id = %delivery.job.job_id,
            video_id = %delivery.job.video_id,
            error,
            "Moved render job to DLQ"
        );
        Ok(())
    }

    /// Move delayed jobs whose backoff has elapsed back onto the stream.
    pub async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        let moved: usize = redis::Script::new(PROMOTE_SCRIPT)
            .key(self.config.delayed_key())
            .key(self.config.delayed_payloads_key())
            .key(&self.config.stream_name)
            .arg(Utc::now().timestamp_millis())
            .arg(limit)
            .arg(self.config.dedup_prefix())
            .arg(self.config.dedup_ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;

        if moved > 0 {
            debug!(moved, "Promoted delayed render jobs");
        }
        Ok(moved)
    }

    fn record(
        &self,
        job: &RenderVideoJob,
        outcome: JobOutcomeKind,
        detail: Option<String>,
    ) -> QueueResult<String> {
        Ok(serde_json::to_string(&JobRecord {
            job_id: job.job_id.clone(),
            video_id: job.video_id.to_string(),
            outcome,
            detail,
            delivery_attempt: job.delivery_attempt,
            finished_at: Utc::now(),
        })?)
    }

    /// Most recent outcome records, newest first.
    pub async fn recent_outcomes(&self, failed: bool, count: usize) -> QueueResult<Vec<JobRecord>> {
        let mut conn = self.connection().await?;
        let key = if failed {
            self.config.failed_key()
        } else {
            self.config.completed_key()
        };
        let raw: Vec<String> = conn.lrange(key, 0, count.saturating_sub(1) as isize).await?;
        Ok(raw
            .iter()
            .filter_map(|r| serde_json::from_str(r).ok())
            .collect())
    }

    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.zcard(self.config.delayed_key()).await?)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }
}

#[async_trait]
impl RenderQueue for JobQueue {
    async fn enqueue(&self, job: &RenderVideoJob) -> QueueResult<EnqueueOutcome> {
        let mut attempt = 0;
        loop {
            match self.try_enqueue(job).await {
                Ok(outcome) => {
                    match &outcome {
                        EnqueueOutcome::Enqueued { message_id } => info!(
                            job_id = %job.job_id,
                            video_id = %job.video_id,
                            message_id,
                            "Enqueued render job"
                        ),
                        EnqueueOutcome::Duplicate => {
                            debug!(job_id = %job.job_id, "Render job already queued")
                        }
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_unavailable() && attempt + 1 < self.config.enqueue_attempts => {
                    let delay = self.config.enqueue_base_delay * 2u32.pow(attempt);
                    warn!(
                        job_id = %job.job_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Enqueue failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn remove(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let removed: u32 = redis::Script::new(REMOVE_SCRIPT)
            .key(self.config.dedup_key(job_id))
            .key(&self.config.stream_name)
            .key(self.config.delayed_key())
            .key(self.config.delayed_payloads_key())
            .arg(job_id.as_str())
            .arg(DELAYED_MARKER)
            .invoke_async(&mut conn)
            .await?;

        debug!(job_id = %job_id, removed, "Removed render job");
        Ok(removed > 0)
    }

    async fn ping(&self) -> QueueResult<()> {
        JobQueue::ping(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = QueueConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(2000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(4000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(8000));
        assert_eq!(config.retry_delay(30), config.retry_max_delay);
    }

    #[test]
    fn test_key_layout() {
        let config = QueueConfig::default();
        let job_id = JobId::from_string("render-v1-0");
        assert_eq!(config.dedup_key(&job_id), "ugc:render_jobs:dedup:render-v1-0");
        assert_eq!(config.delayed_key(), "ugc:render_jobs:delayed");
    }

    #[test]
    fn test_visibility_outlasts_default_poll_window() {
        // 90 polls at 10s
        assert!(QueueConfig::default().visibility_timeout > Duration::from_secs(900));
    }
}
