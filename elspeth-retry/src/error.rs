// elspeth-retry/src/error.rs
// ============================================================================
// Module: External Call Errors
// Description: Error taxonomy for the audited external-call client (§4.8,
//              §7).
// Purpose: Give the surrounding NodeState executor one error type whose
//          `retryable` classification it can trust without re-deriving it.
// Dependencies: thiserror
// ============================================================================

use thiserror::Error;

/// Whether a failed external call should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// The call may succeed if retried (timeouts, 5xx, connection resets).
    Retryable,
    /// Retrying cannot help (4xx other than 429, malformed request).
    Permanent,
}

/// An error raised by the audited external-call client.
#[derive(Debug, Error)]
pub enum ExternalCallError {
    /// The call failed and retries (if any remained) were exhausted or the
    /// error was classified permanent.
    #[error("external call to {endpoint} failed: {message}")]
    Failed {
        /// The endpoint contacted.
        endpoint: String,
        /// The underlying failure message.
        message: String,
        /// How the final attempt's failure was classified.
        classification: RetryClassification,
        /// How many attempts were made before giving up.
        attempts: u32,
    },
    /// The call did not complete within its configured timeout.
    #[error("external call to {endpoint} timed out after {elapsed_ms}ms")]
    Timeout {
        /// The endpoint contacted.
        endpoint: String,
        /// How long the call ran before being cancelled.
        elapsed_ms: u64,
    },
    /// Replay mode could not find a matching prior call to serve from.
    #[error("no recorded call found for endpoint {endpoint} with request hash {request_hash}, attempt {attempt}")]
    ReplayMiss {
        /// The endpoint that was to be replayed.
        endpoint: String,
        /// The request hash that was to be replayed.
        request_hash: String,
        /// The attempt number that was to be replayed.
        attempt: u32,
    },
}

/// A divergence detected while running in verify mode: the live call's
/// response did not match the prior run's recorded response. Per §4.8 this
/// is recorded, not propagated — the run proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationDivergence {
    /// The endpoint that diverged.
    pub endpoint: String,
    /// The request hash shared by both runs.
    pub request_hash: String,
    /// The prior run's recorded response hash.
    pub previous_response_hash: String,
    /// This run's live response hash.
    pub current_response_hash: String,
}
