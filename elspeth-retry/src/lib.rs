// elspeth-retry/src/lib.rs
// ============================================================================
// Crate: elspeth-retry
// Description: Audited external-call discipline: rate limiting,
//              retry/backoff, secret fingerprinting, and replay/verify
//              dispatch (§4.8).
// Purpose: Give every source/transform/sink plugin making an external call
//          identical audit coverage and retry behavior without each one
//          re-implementing it.
// Dependencies: elspeth-core, hmac, rand, sha2, tokio, tracing
// ============================================================================

//! ## Overview
//! This crate does not know how to make any particular kind of call (HTTP,
//! an LLM provider SDK, anything else); it only knows how to wrap a
//! plugin-supplied attempt function with rate limiting, retry/backoff, and
//! live/replay/verify mode dispatch, and how to fingerprint a secret for
//! the audit trail without ever storing it.

pub mod backoff;
pub mod client;
pub mod error;
pub mod fingerprint;
pub mod rate_limit;

pub use backoff::BackoffPolicy;
pub use client::AuditedClient;
pub use client::CallAttemptFailure;
pub use client::CallAttemptRecord;
pub use client::CallAttemptResult;
pub use client::CallExecution;
pub use client::ReplaySource;
pub use client::StoredCall;
pub use error::ExternalCallError;
pub use error::RetryClassification;
pub use error::VerificationDivergence;
pub use fingerprint::fingerprint;
pub use rate_limit::RateLimitConfig;
pub use rate_limit::RateLimiter;
