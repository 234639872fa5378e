// elspeth-runtime/src/plugins/log_sink.rs
// ============================================================================
// Module: Log Sink Reference Plugin
// Description: Emits one `tracing` event per written row, with no durable
//              output of its own.
// Purpose: The degenerate sink used by scenarios that only need to observe
//          that rows reached the end of the pipeline.
// Dependencies: elspeth-core::interfaces, elspeth-core::hashing, tracing
// ============================================================================

use async_trait::async_trait;
use elspeth_core::hashing;
use elspeth_core::interfaces::ArtifactDescriptor;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Sink;
use elspeth_core::interfaces::SinkError;

/// Logs each row at `info` level via `tracing` and reports a zero-byte
/// artifact; nothing is persisted.
#[derive(Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn write(&mut self, rows: Vec<RowData>, ctx: &PluginContext) -> Result<ArtifactDescriptor, SinkError> {
        for row in &rows {
            tracing::info!(node = %ctx.node_label, row = %serde_json::Value::Object(row.clone()), "row reached log sink");
        }
        let content_hash = hashing::stable_hash(&rows).map_err(|err| SinkError::Write(err.to_string()))?;
        Ok(ArtifactDescriptor { uri: "log://sink".to_string(), content_hash, size_bytes: 0, kind: "log".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use elspeth_core::RunId;
    use serde_json::Value;

    use super::*;

    #[tokio::test]
    async fn reports_an_artifact_for_zero_rows() {
        let mut sink = LogSink;
        let ctx = PluginContext {
            run_id: RunId::generate(),
            node_label: "sink".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        };
        let descriptor = sink.write(Vec::new(), &ctx).await.expect("write");
        assert_eq!(descriptor.size_bytes, 0);
    }
}
