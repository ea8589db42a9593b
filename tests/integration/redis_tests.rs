//! Redis queue and progress integration tests.

use std::time::Duration;

use ugc_models::{GeneratedScript, ProductData, Video, VideoId, VideoStyle};
use ugc_queue::{JobOutcomeKind, RenderQueue, RenderVideoJob};

fn sample_video(user_id: &str) -> Video {
    let script = GeneratedScript {
        script: "Meet the mug that keeps coffee hot for twelve hours.".to_string(),
        estimated_duration: 12,
        scenes: Vec::new(),
    };
    Video::with_script(
        VideoId::new(),
        user_id,
        &ProductData::new("Integration Mug"),
        VideoStyle::ProductShowcase,
        &script,
    )
}

async fn queue() -> ugc_queue::JobQueue {
    dotenvy::dotenv().ok();
    let queue = ugc_queue::JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = queue().await;
    queue.ping().await.expect("Failed to ping Redis");

    let len = queue.len().await.expect("Failed to get queue length");
    println!("Queue length: {}", len);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_is_idempotent_per_attempt() {
    let queue = queue().await;
    let video = sample_video("test_redis_user");
    let job = RenderVideoJob::for_video(&video).expect("video has a script");

    let first = queue.enqueue(&job).await.expect("Failed to enqueue");
    assert!(!first.is_duplicate());

    let second = queue.enqueue(&job).await.expect("Failed to enqueue");
    assert!(second.is_duplicate());

    assert!(queue.remove(&job.job_id).await.expect("Failed to remove"));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_consume_and_ack() {
    let queue = queue().await;
    let video = sample_video("test_redis_user");
    let job = RenderVideoJob::for_video(&video).expect("video has a script");
    queue.enqueue(&job).await.expect("Failed to enqueue");

    let deliveries = queue
        .consume("test-consumer", 1000, 10)
        .await
        .expect("Failed to consume");
    let delivery = deliveries
        .iter()
        .find(|d| d.job.job_id == job.job_id)
        .expect("enqueued job delivered");

    queue
        .ack(delivery, JobOutcomeKind::Completed, None)
        .await
        .expect("Failed to ack");

    let recent = queue
        .recent_outcomes(false, 10)
        .await
        .expect("Failed to read outcomes");
    assert!(recent.iter().any(|r| r.job_id == job.job_id));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_infrastructure_failure_is_redelivered() {
    let queue = queue().await;
    let video = sample_video("test_redis_retry_user");
    let job = RenderVideoJob::for_video(&video).expect("video has a script");
    queue.enqueue(&job).await.expect("Failed to enqueue");

    let deliveries = queue
        .consume("test-retry-consumer", 1000, 10)
        .await
        .expect("Failed to consume");
    let delivery = deliveries
        .iter()
        .find(|d| d.job.job_id == job.job_id)
        .expect("enqueued job delivered");

    let dead = queue
        .retry_or_dead_letter(delivery, "store unavailable")
        .await
        .expect("Failed to schedule retry");
    assert!(!dead);
    assert!(queue.delayed_len().await.expect("Failed to read delayed") > 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_roundtrip() {
    use futures_util::StreamExt;
    use ugc_models::JobId;
    use ugc_queue::{JobProgress, ProgressStore, ProgressTracker, RenderStage};

    dotenvy::dotenv().ok();
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let progress = ProgressStore::new(&redis_url).expect("Failed to create progress store");

    let video_id = VideoId::new();
    let job_id = JobId::for_attempt(&video_id, 0);
    let mut stream = progress.subscribe(&job_id).await.expect("Failed to subscribe");

    let update = JobProgress::new(&job_id, &video_id, 40, RenderStage::Rendering);
    progress.report(&update).await.expect("Failed to report");

    let latest = progress.latest(&job_id).await.expect("Failed to read progress");
    assert_eq!(latest.map(|p| p.percent), Some(40));

    let received = tokio::time::timeout(Duration::from_secs(2), stream.next()).await;
    println!("Received live update: {:?}", received.ok().flatten());
}
