// ============================================
// TIMING UTILITY - Cycle Measurement
// ============================================
// Usage:
//   1. Manual tracking: let timer = Timer::start("name"); ... timer.stop();
//   2. Threshold: Timer::start_with_threshold("name", 500) only logs when slow
//   3. Async wrapper: timed_async("name", || async { ... }).await
// ============================================

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Timer for measuring execution time, logged through `tracing`
pub struct Timer {
    name: String,
    start: Instant,
    threshold_ms: u128,
    stopped: bool,
}

impl Timer {
    pub fn start(name: impl Into<String>) -> Self {
        Self::start_with_threshold(name, 0)
    }

    /// Durations above `threshold_ms` are logged as warnings
    pub fn start_with_threshold(name: impl Into<String>, threshold_ms: u128) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
            threshold_ms,
            stopped: false,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop the timer and log the result
    pub fn stop(mut self) -> Duration {
        let duration = self.start.elapsed();
        self.log_duration(duration);
        self.stopped = true;
        duration
    }

    fn log_duration(&self, duration: Duration) {
        let ms = duration.as_millis();
        if self.threshold_ms > 0 && ms >= self.threshold_ms {
            warn!(
                target: "performance",
                timer = %self.name,
                elapsed_ms = ms as u64,
                threshold_ms = self.threshold_ms as u64,
                "slow operation"
            );
        } else {
            debug!(target: "performance", timer = %self.name, elapsed_ms = ms as u64);
        }
    }
}

// Log on drop when stop() was never called (early return, `?`)
impl Drop for Timer {
    fn drop(&mut self) {
        if !self.stopped {
            self.log_duration(self.start.elapsed());
        }
    }
}

/// Time an async function (shorthand)
pub async fn timed_async<F, Fut, R>(
    name: impl Into<String>,
    threshold_ms: u128,
    f: F,
) -> (R, Duration)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = R>,
{
    let timer = Timer::start_with_threshold(name, threshold_ms);
    let result = f().await;
    let elapsed = timer.stop();
    (result, elapsed)
}
