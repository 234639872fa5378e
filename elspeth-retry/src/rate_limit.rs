// elspeth-retry/src/rate_limit.rs
// ============================================================================
// Module: Per-Service Rate Limiter
// Description: Token-bucket limiter with independent per-second and
//              per-minute budgets (§4.8).
// Purpose: Bound outbound call rate per external service without a global
//          lock serializing unrelated services against each other.
// Dependencies: tokio::{sync::Mutex, time}
// ============================================================================

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configured budgets for one external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum calls permitted per rolling one-second window.
    pub per_second: u32,
    /// Maximum calls permitted per rolling one-minute window.
    pub per_minute: u32,
}

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / window.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// A per-service rate limiter enforcing both a per-second and a per-minute
/// budget. Whichever bucket is more exhausted determines the wait.
pub struct RateLimiter {
    per_second: Mutex<Bucket>,
    per_minute: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter for the given budgets.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            per_second: Mutex::new(Bucket::new(config.per_second, Duration::from_secs(1))),
            per_minute: Mutex::new(Bucket::new(config.per_minute, Duration::from_secs(60))),
        }
    }

    /// Waits until both budgets have a token available, then consumes one
    /// from each.
    pub async fn acquire(&self) {
        loop {
            let now = Instant::now();
            let second_wait = {
                let mut bucket = self.per_second.lock().await;
                bucket.try_take(now)
            };
            let minute_wait = {
                let mut bucket = self.per_minute.lock().await;
                bucket.try_take(now)
            };
            match (second_wait, minute_wait) {
                (None, None) => return,
                (wait_a, wait_b) => {
                    // Return whichever token we did manage to take before
                    // sleeping, so the next loop iteration re-acquires both
                    // atomically rather than leaking a consumed token.
                    if wait_a.is_none() {
                        self.per_second.lock().await.tokens += 1.0;
                    }
                    if wait_b.is_none() {
                        self.per_minute.lock().await.tokens += 1.0;
                    }
                    let wait = wait_a.unwrap_or_default().max(wait_b.unwrap_or_default());
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimitConfig;
    use super::RateLimiter;

    #[tokio::test]
    async fn allows_calls_up_to_the_per_second_budget() {
        let limiter = RateLimiter::new(RateLimitConfig { per_second: 2, per_minute: 1000 });
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < std::time::Duration::from_millis(50));
    }
}
