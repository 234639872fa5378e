// elspeth-retry/src/backoff.rs
// ============================================================================
// Module: Retry Backoff
// Description: Exponential backoff with jitter, bounded by a max attempt
//              count (§4.8).
// Purpose: Give every retryable external call the same backoff shape, so
//          retry behavior is a policy value, not code duplicated per
//          plugin.
// Dependencies: rand
// ============================================================================

use std::time::Duration;

use rand::Rng;

/// Exponential backoff policy with full jitter.
///
/// # Invariants
/// - `max_attempts >= 1`: at least the first attempt always runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single computed delay.
    pub max_delay: Duration,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Returns whether another attempt is permitted after `attempts_so_far`
    /// have already run.
    #[must_use]
    pub const fn allows_retry(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Computes the jittered delay before attempt number `attempt`
    /// (1-indexed; `attempt == 1` is the first retry, i.e. the second
    /// overall attempt).
    ///
    /// Uses full jitter: `random(0, min(max_delay, base_delay * 2^(attempt-1)))`,
    /// which spreads retries out enough to avoid a thundering herd against
    /// the same rate-limited endpoint.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let unclamped = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = unclamped.min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let jittered_millis = rng.gen_range(0..=capped.as_millis().max(1));
        Duration::from_millis(jittered_millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::BackoffPolicy;

    #[test]
    fn respects_max_attempts() {
        let policy = BackoffPolicy { max_attempts: 3, ..BackoffPolicy::default() };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn delay_never_exceeds_max_delay() {
        let policy = BackoffPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 1..10 {
            let delay = policy.delay_for_attempt(attempt, &mut rng);
            assert!(delay <= policy.max_delay);
        }
    }
}
