// elspeth-retry/src/client.rs
// ============================================================================
// Module: Audited Call Client
// Description: Orchestrates one external call through rate limiting,
//              retry/backoff, and live/replay/verify mode dispatch (§4.8).
// Purpose: Be the single place "how an external call is made" is decided,
//          so every source/transform/sink plugin gets identical audit
//          coverage without re-implementing retry logic.
// Dependencies: crate::{backoff, error, rate_limit}, elspeth-core::enums::{CallStatus, RunMode}, tokio
// ============================================================================

use std::future::Future;
use std::time::Duration;
use std::time::Instant as StdInstant;

use elspeth_core::enums::CallStatus;
use elspeth_core::enums::RunMode;

use crate::backoff::BackoffPolicy;
use crate::error::ExternalCallError;
use crate::error::RetryClassification;
use crate::error::VerificationDivergence;
use crate::rate_limit::RateLimiter;

/// The outcome of one successful attempt, before it is wrapped into a
/// recorder `Call` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAttemptResult {
    /// The raw response bytes.
    pub response_bytes: Vec<u8>,
    /// Canonical hash of the response bytes.
    pub response_hash: String,
    /// Provider-assigned request identifier, if any.
    pub provider_request_id: Option<String>,
}

/// What a plugin-supplied call function returns on failure: a message plus
/// this client's classification of whether retrying could help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAttemptFailure {
    /// Human-readable failure message.
    pub message: String,
    /// Whether this failure is retryable.
    pub classification: RetryClassification,
}

/// A previously recorded call, used to serve replay mode or to diff against
/// in verify mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCall {
    /// The prior run's response bytes.
    pub response_bytes: Vec<u8>,
    /// The prior run's response hash.
    pub response_hash: String,
}

/// A source of prior calls to replay or verify against.
pub trait ReplaySource {
    /// Looks up the call matching `(endpoint, request_hash, attempt)` from
    /// the run being replayed or verified.
    fn lookup(&self, endpoint: &str, request_hash: &str, attempt: u32) -> Option<StoredCall>;
}

/// One attempt's worth of audit detail, returned to the caller for
/// recording as a `Call` row.
#[derive(Debug, Clone, PartialEq)]
pub struct CallAttemptRecord {
    /// 1-indexed attempt number within this call's retry sequence.
    pub attempt: u32,
    /// Wall-clock duration of this attempt, in milliseconds.
    pub duration_ms: u64,
    /// Whether this attempt succeeded.
    pub status: CallStatus,
    /// Canonical hash of the response, if the attempt produced one.
    pub response_hash: Option<String>,
    /// Failure message, if the attempt failed.
    pub error_message: Option<String>,
}

/// The full result of executing one audited call, including every attempt
/// made.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExecution {
    /// One record per attempt, in order.
    pub attempts: Vec<CallAttemptRecord>,
    /// The final result: the successful response, or the terminal error.
    pub outcome: Result<CallAttemptResult, ExternalCallError>,
    /// Set in verify mode when the live response diverged from the prior
    /// run's recorded response. The run proceeds regardless (§4.8).
    pub divergence: Option<VerificationDivergence>,
}

/// Orchestrates rate limiting, retry/backoff, and live/replay/verify
/// dispatch for one external call.
pub struct AuditedClient<'a> {
    rate_limiter: &'a RateLimiter,
    backoff: BackoffPolicy,
}

impl<'a> AuditedClient<'a> {
    /// Creates a client bound to `rate_limiter`, retrying under `backoff`.
    #[must_use]
    pub fn new(rate_limiter: &'a RateLimiter, backoff: BackoffPolicy) -> Self {
        Self { rate_limiter, backoff }
    }

    /// Executes one audited call to `endpoint` with request hash
    /// `request_hash`, dispatching according to `mode`.
    ///
    /// `perform` is invoked once per attempt (never, in replay mode) and
    /// must itself apply any per-attempt timeout; this client does not
    /// impose one beyond the overall retry budget.
    pub async fn execute<F, Fut>(
        &self,
        endpoint: &str,
        request_hash: &str,
        mode: RunMode,
        replay_source: Option<&dyn ReplaySource>,
        perform: F,
    ) -> CallExecution
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<CallAttemptResult, CallAttemptFailure>>,
    {
        if matches!(mode, RunMode::Replay) {
            return self.execute_replay(endpoint, request_hash, replay_source);
        }

        let mut attempts = Vec::new();
        let mut attempt_number: u32 = 0;
        let mut rng = rand::thread_rng();

        loop {
            attempt_number += 1;
            self.rate_limiter.acquire().await;
            let started = StdInstant::now();
            let result = perform(attempt_number).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(success) => {
                    attempts.push(CallAttemptRecord {
                        attempt: attempt_number,
                        duration_ms,
                        status: CallStatus::Success,
                        response_hash: Some(success.response_hash.clone()),
                        error_message: None,
                    });
                    let divergence = if matches!(mode, RunMode::Verify) {
                        replay_source
                            .and_then(|source| source.lookup(endpoint, request_hash, attempt_number))
                            .filter(|prior| prior.response_hash != success.response_hash)
                            .map(|prior| VerificationDivergence {
                                endpoint: endpoint.to_string(),
                                request_hash: request_hash.to_string(),
                                previous_response_hash: prior.response_hash,
                                current_response_hash: success.response_hash.clone(),
                            })
                    } else {
                        None
                    };
                    return CallExecution { attempts, outcome: Ok(success), divergence };
                }
                Err(failure) => {
                    attempts.push(CallAttemptRecord {
                        attempt: attempt_number,
                        duration_ms,
                        status: CallStatus::Error,
                        response_hash: None,
                        error_message: Some(failure.message.clone()),
                    });
                    let can_retry = matches!(failure.classification, RetryClassification::Retryable)
                        && self.backoff.allows_retry(attempt_number);
                    if !can_retry {
                        let error = ExternalCallError::Failed {
                            endpoint: endpoint.to_string(),
                            message: failure.message,
                            classification: failure.classification,
                            attempts: attempt_number,
                        };
                        return CallExecution { attempts, outcome: Err(error), divergence: None };
                    }
                    let delay = self.backoff.delay_for_attempt(attempt_number, &mut rng);
                    if delay > Duration::ZERO {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    fn execute_replay(&self, endpoint: &str, request_hash: &str, replay_source: Option<&dyn ReplaySource>) -> CallExecution {
        let attempt_number = 1;
        let found = replay_source.and_then(|source| source.lookup(endpoint, request_hash, attempt_number));
        match found {
            Some(stored) => CallExecution {
                attempts: vec![CallAttemptRecord {
                    attempt: attempt_number,
                    duration_ms: 0,
                    status: CallStatus::Success,
                    response_hash: Some(stored.response_hash.clone()),
                    error_message: None,
                }],
                outcome: Ok(CallAttemptResult {
                    response_bytes: stored.response_bytes,
                    response_hash: stored.response_hash,
                    provider_request_id: None,
                }),
                divergence: None,
            },
            None => CallExecution {
                attempts: Vec::new(),
                outcome: Err(ExternalCallError::ReplayMiss {
                    endpoint: endpoint.to_string(),
                    request_hash: request_hash.to_string(),
                    attempt: attempt_number,
                }),
                divergence: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use elspeth_core::enums::RunMode;

    use super::AuditedClient;
    use super::CallAttemptFailure;
    use super::CallAttemptResult;
    use crate::backoff::BackoffPolicy;
    use crate::error::RetryClassification;
    use crate::rate_limit::RateLimitConfig;
    use crate::rate_limit::RateLimiter;

    #[tokio::test]
    async fn retries_retryable_failures_until_success() {
        let limiter = RateLimiter::new(RateLimitConfig { per_second: 100, per_minute: 1000 });
        let backoff = BackoffPolicy { base_delay: std::time::Duration::from_millis(1), max_delay: std::time::Duration::from_millis(5), max_attempts: 3 };
        let client = AuditedClient::new(&limiter, backoff);
        let calls = AtomicU32::new(0);

        let execution = client
            .execute("https://example.test", "deadbeef", RunMode::Live, None, |_attempt| {
                let count = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(CallAttemptFailure { message: "transient".to_string(), classification: RetryClassification::Retryable })
                    } else {
                        Ok(CallAttemptResult { response_bytes: b"ok".to_vec(), response_hash: "abc".to_string(), provider_request_id: None })
                    }
                }
            })
            .await;

        assert!(execution.outcome.is_ok());
        assert_eq!(execution.attempts.len(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let limiter = RateLimiter::new(RateLimitConfig { per_second: 100, per_minute: 1000 });
        let client = AuditedClient::new(&limiter, BackoffPolicy::default());

        let execution = client
            .execute("https://example.test", "deadbeef", RunMode::Live, None, |_attempt| async {
                Err::<CallAttemptResult, _>(CallAttemptFailure { message: "bad request".to_string(), classification: RetryClassification::Permanent })
            })
            .await;

        assert!(execution.outcome.is_err());
        assert_eq!(execution.attempts.len(), 1);
    }
}
