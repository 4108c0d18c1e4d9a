use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Maximum extra delay added on top of the minimum interval, as a fraction of it.
const MAX_JITTER: f64 = 0.2;

/// Shared minimum-interval gate. Every caller of [`RateLimiter::wait`] is
/// spaced at least `min_interval` (plus 0-20% jitter) after the previous one,
/// whichever task or strategy it comes from.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn per_second(max_requests_per_second: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / max_requests_per_second))
    }

    /// Sleep until the next request may go out, then claim the slot.
    pub async fn wait(&self) {
        // Held across the sleep so that waiters queue up in order.
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let jitter = rand::thread_rng().gen_range(0.0..=MAX_JITTER);
            let gap = self.min_interval.mul_f64(1.0 + jitter);
            let ready_at = previous + gap;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed <= Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_does_not_wait() {
        let limiter = RateLimiter::per_second(2.0);
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.wait().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
