//! Worker metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    pub const JOBS_STARTED: &str = "ugc_render_jobs_started_total";
    pub const JOBS_COMPLETED: &str = "ugc_render_jobs_completed_total";
    pub const JOBS_FAILED: &str = "ugc_render_jobs_failed_total";
    pub const JOBS_SKIPPED: &str = "ugc_render_jobs_skipped_total";
    pub const JOBS_REDELIVERED: &str = "ugc_render_jobs_redelivered_total";
    pub const JOBS_DEAD_LETTERED: &str = "ugc_render_jobs_dead_lettered_total";
    pub const JOBS_DEFERRED: &str = "ugc_render_jobs_deferred_total";
    pub const JOB_DURATION: &str = "ugc_render_job_duration_seconds";
    pub const STATUS_POLLS: &str = "ugc_render_status_polls_total";
    pub const STALE_ATTEMPTS: &str = "ugc_stale_attempts_failed_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED).increment(1);
}

pub fn record_job_completed(duration: Duration) {
    counter!(names::JOBS_COMPLETED).increment(1);
    histogram!(names::JOB_DURATION, "outcome" => "completed").record(duration.as_secs_f64());
}

pub fn record_job_failed(category: &'static str) {
    counter!(names::JOBS_FAILED, "category" => category).increment(1);
}

pub fn record_job_skipped() {
    counter!(names::JOBS_SKIPPED).increment(1);
}

pub fn record_redelivery(dead_lettered: bool) {
    if dead_lettered {
        counter!(names::JOBS_DEAD_LETTERED).increment(1);
    } else {
        counter!(names::JOBS_REDELIVERED).increment(1);
    }
}

pub fn record_deferred() {
    counter!(names::JOBS_DEFERRED).increment(1);
}

pub fn record_status_poll() {
    counter!(names::STATUS_POLLS).increment(1);
}

pub fn record_stale_attempt() {
    counter!(names::STALE_ATTEMPTS).increment(1);
}
