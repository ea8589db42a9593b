//! Worker configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed in parallel by this process
    pub max_concurrent_jobs: usize,
    /// Render job starts allowed per minute, across all slots
    pub render_starts_per_minute: u32,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Consecutive status-check errors tolerated while polling
    pub max_status_errors: u32,
    pub download_url_ttl: Duration,
    pub enable_stale_sweeper: bool,
    pub stale_sweep_interval: Duration,
    /// Added to the poll ceiling before an attempt counts as stale
    pub stale_grace: Duration,
    pub claim_interval: Duration,
    pub promote_interval: Duration,
    /// Wait before re-offering a job whose video is not ready for it yet
    pub not_ready_delay: Duration,
    /// Job age after which not-ready deliveries count toward dead-lettering
    pub not_ready_window: Duration,
    pub shutdown_timeout: Duration,
    /// Prometheus exporter port; 0 disables it
    pub metrics_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            render_starts_per_minute: 10,
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 90,
            max_status_errors: 3,
            download_url_ttl: Duration::from_secs(604_800),
            enable_stale_sweeper: true,
            stale_sweep_interval: Duration::from_secs(60),
            stale_grace: Duration::from_secs(300),
            claim_interval: Duration::from_secs(30),
            promote_interval: Duration::from_secs(1),
            not_ready_delay: Duration::from_secs(5),
            not_ready_window: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(60),
            metrics_port: 9100,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            render_starts_per_minute: std::env::var("RENDER_STARTS_PER_MINUTE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.render_starts_per_minute),
            poll_interval: Duration::from_secs(
                std::env::var("RENDER_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            max_poll_attempts: std::env::var("RENDER_MAX_POLL_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_poll_attempts),
            download_url_ttl: Duration::from_secs(
                std::env::var("DOWNLOAD_URL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(604_800),
            ),
            enable_stale_sweeper: std::env::var("ENABLE_STALE_SWEEPER")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            stale_sweep_interval: Duration::from_secs(
                std::env::var("STALE_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            not_ready_window: std::env::var("NOT_READY_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.not_ready_window),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_port),
            ..defaults
        }
    }

    /// Longest a render may poll before timing out.
    pub fn poll_ceiling(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_poll_attempts)
    }

    /// Age past which a GENERATING/PROCESSING attempt is failed by the sweeper.
    pub fn stale_threshold(&self) -> Duration {
        self.poll_ceiling() + self.stale_grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 5);
        assert_eq!(config.poll_ceiling(), Duration::from_secs(900));
        assert_eq!(config.stale_threshold(), Duration::from_secs(1200));
    }
}
