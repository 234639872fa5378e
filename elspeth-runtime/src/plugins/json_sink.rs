// elspeth-runtime/src/plugins/json_sink.rs
// ============================================================================
// Module: JSON Sink Reference Plugin
// Description: Appends each batch of rows as newline-delimited JSON to an
//              in-memory buffer.
// Purpose: A deterministic, filesystem-free sink for the end-to-end
//          scenarios and for tests that want to inspect produced output.
// Dependencies: elspeth-core::interfaces, elspeth-core::hashing
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use elspeth_core::hashing;
use elspeth_core::interfaces::ArtifactDescriptor;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Sink;
use elspeth_core::interfaces::SinkError;

/// Writes rows as newline-delimited JSON into a shared in-memory buffer,
/// so tests and reference scenarios can assert on sink output without a
/// filesystem.
pub struct JsonSink {
    uri: String,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl JsonSink {
    /// Builds a sink that writes to `uri` (a free-form locator, not opened
    /// as a real path) and a fresh, empty buffer.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), buffer: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Returns a handle to this sink's buffer, for assertions after a run.
    #[must_use]
    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }
}

#[async_trait]
impl Sink for JsonSink {
    async fn write(&mut self, rows: Vec<RowData>, _ctx: &PluginContext) -> Result<ArtifactDescriptor, SinkError> {
        let mut encoded = Vec::new();
        for row in &rows {
            serde_json::to_writer(&mut encoded, row).map_err(|err| SinkError::Write(err.to_string()))?;
            encoded.push(b'\n');
        }
        let content_hash =
            hashing::stable_hash(&rows).map_err(|err| SinkError::Write(err.to_string()))?;
        let size_bytes = u64::try_from(encoded.len()).unwrap_or(u64::MAX);
        let mut guard = self.buffer.lock().map_err(|_| SinkError::Write("sink buffer mutex poisoned".to_string()))?;
        guard.extend_from_slice(&encoded);
        Ok(ArtifactDescriptor { uri: self.uri.clone(), content_hash, size_bytes, kind: "json_lines".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use elspeth_core::RunId;
    use serde_json::Value;

    use super::*;

    fn ctx() -> PluginContext {
        PluginContext {
            run_id: RunId::generate(),
            node_label: "sink".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        }
    }

    #[tokio::test]
    async fn writes_one_line_per_row() {
        let mut sink = JsonSink::new("mem://out");
        let mut row = RowData::new();
        row.insert("a".to_string(), Value::from(1));
        let descriptor = sink.write(vec![row], &ctx()).await.expect("write");
        assert_eq!(descriptor.kind, "json_lines");
        let buffer = sink.buffer();
        let guard = buffer.lock().expect("lock");
        assert_eq!(String::from_utf8_lossy(&guard), "{\"a\":1}\n");
    }
}
