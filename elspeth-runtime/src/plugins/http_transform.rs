// elspeth-runtime/src/plugins/http_transform.rs
// ============================================================================
// Module: HTTP Transform Reference Plugin
// Description: Calls a configured HTTP endpoint per row through the audited
//              retry client, merging the JSON response into the row.
// Purpose: The one reference plugin exercising §4.8's external-call
//          discipline end-to-end (rate limiting, retry, call auditing).
// Dependencies: elspeth-core::interfaces, elspeth-retry, reqwest
// ============================================================================

use async_trait::async_trait;
use elspeth_core::RunMode;
use elspeth_core::enums::CallType;
use elspeth_core::hashing;
use elspeth_core::interfaces::PendingCall;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Transform;
use elspeth_core::interfaces::TransformResult;
use elspeth_core::time::Timestamp;
use elspeth_retry::backoff::BackoffPolicy;
use elspeth_retry::client::AuditedClient;
use elspeth_retry::client::CallAttemptFailure;
use elspeth_retry::client::CallAttemptResult;
use elspeth_retry::error::RetryClassification;
use elspeth_retry::rate_limit::RateLimiter;
use serde_json::Value;

/// Calls `endpoint` with the row as a JSON body and merges the parsed JSON
/// response's top-level fields into the row under `response_field`.
///
/// Runs strictly in [`RunMode::Live`]; replay/verify dispatch belongs to
/// `AuditedClient` and is not exercised by this reference plugin, which
/// always performs a live call.
pub struct HttpTransform {
    endpoint: String,
    response_field: String,
    client: reqwest::Client,
    rate_limiter: RateLimiter,
    backoff: BackoffPolicy,
}

impl HttpTransform {
    /// Builds a transform posting to `endpoint`, storing the response
    /// under `response_field`.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        response_field: impl Into<String>,
        rate_limiter: RateLimiter,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            response_field: response_field.into(),
            client: reqwest::Client::new(),
            rate_limiter,
            backoff,
        }
    }
}

#[async_trait]
impl Transform for HttpTransform {
    async fn process(&self, row: RowData, ctx: &PluginContext) -> TransformResult {
        let body = Value::Object(row.clone());
        let request_hash = match hashing::stable_hash(&body) {
            Ok(hash) => hash,
            Err(err) => {
                return TransformResult::Error {
                    kind: "canonicalization".to_string(),
                    message: err.to_string(),
                    retryable: false,
                };
            }
        };

        let audited = AuditedClient::new(&self.rate_limiter, self.backoff);
        let endpoint = self.endpoint.clone();
        let client = self.client.clone();
        let execution = audited
            .execute(&self.endpoint, &request_hash, RunMode::Live, None, move |_attempt| {
                let client = client.clone();
                let endpoint = endpoint.clone();
                let body = body.clone();
                async move { perform_call(&client, &endpoint, &body).await }
            })
            .await;

        if let Some(log) = &ctx.call_log {
            let mut started_at = Timestamp::now();
            for attempt in &execution.attempts {
                let completed_at = Timestamp::now();
                let pending = PendingCall {
                    call_type: CallType::Http,
                    endpoint: self.endpoint.clone(),
                    started_at,
                    completed_at,
                    duration_ms: attempt.duration_ms,
                    status: attempt.status,
                    request_hash: request_hash.clone(),
                    response_hash: attempt.response_hash.clone(),
                    request_ref: None,
                    response_ref: None,
                    secret_fingerprint: None,
                    attempt: attempt.attempt,
                    provider_request_id: None,
                };
                started_at = completed_at;
                if let Ok(mut guard) = log.lock() {
                    guard.push(pending);
                }
            }
        }

        match execution.outcome {
            Ok(result) => match serde_json::from_slice::<Value>(&result.response_bytes) {
                Ok(response_value) => {
                    let mut merged = row;
                    merged.insert(self.response_field.clone(), response_value);
                    TransformResult::Success { rows: vec![merged] }
                }
                Err(err) => TransformResult::Error { kind: "decode".to_string(), message: err.to_string(), retryable: false },
            },
            Err(err) => TransformResult::Error { kind: "http".to_string(), message: err.to_string(), retryable: false },
        }
    }
}

async fn perform_call(client: &reqwest::Client, endpoint: &str, body: &Value) -> Result<CallAttemptResult, CallAttemptFailure> {
    let response = client.post(endpoint).json(body).send().await.map_err(|err| CallAttemptFailure {
        message: err.to_string(),
        classification: if err.is_timeout() || err.is_connect() {
            RetryClassification::Retryable
        } else {
            RetryClassification::Permanent
        },
    })?;
    let status = response.status();
    let bytes = response.bytes().await.map_err(|err| CallAttemptFailure {
        message: err.to_string(),
        classification: RetryClassification::Retryable,
    })?;
    if !status.is_success() {
        return Err(CallAttemptFailure {
            message: format!("http status {status}"),
            classification: if status.is_server_error() { RetryClassification::Retryable } else { RetryClassification::Permanent },
        });
    }
    let response_bytes = bytes.to_vec();
    let response_hash = hashing::stable_hash(&String::from_utf8_lossy(&response_bytes).to_string())
        .unwrap_or_else(|_| "unhashable".to_string());
    Ok(CallAttemptResult { response_bytes, response_hash, provider_request_id: None })
}
