//! Injectable waiting, so polling can be driven without wall-clock delays in tests.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Limits render job starts against the provider, shared by all job slots.
pub type RenderStartLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// At most `per_minute` starts in any sixty-second window, evenly spaced.
pub fn render_start_limiter(per_minute: u32) -> Arc<RenderStartLimiter> {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(Duration::from_secs(60) / per_minute.get())
        .unwrap_or_else(|| Quota::per_minute(per_minute));
    Arc::new(RateLimiter::direct(quota))
}
