//! Time source for every loop and cache in the login subsystem.
//!
//! Production code uses [`TokioClock`]. Tests either run on tokio's paused
//! clock or inject their own [`Clock`] to move time forward explicitly.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic instant used for deadlines and TTLs.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since the Unix epoch, for reporting only.
    fn wall_millis(&self) -> i64;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Elapsed time since `start` as measured by `clock`.
pub fn elapsed_since(clock: &dyn Clock, start: Instant) -> Duration {
    clock.now().saturating_duration_since(start)
}
