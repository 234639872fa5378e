// elspeth-runtime/src/plugins/json_source.rs
// ============================================================================
// Module: JSON Source Reference Plugin
// Description: Reads newline-delimited JSON objects into `RowData`.
// Purpose: One of the small reference source plugins needed to run the
//          end-to-end scenarios without a real ingestion system.
// Dependencies: elspeth-core::interfaces, serde_json
// ============================================================================

use async_trait::async_trait;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Source;
use elspeth_core::interfaces::SourceError;
use serde_json::Value;

/// Reads one JSON object per line. A line that does not parse to a JSON
/// object fails the source outright (§6: sources may coerce, but a
/// malformed line is not a coercible shape, it is absent data).
pub struct JsonSource {
    remaining: std::vec::IntoIter<String>,
}

impl JsonSource {
    /// Builds a source over newline-delimited JSON `contents`.
    #[must_use]
    pub fn from_str(contents: &str) -> Self {
        let remaining: Vec<String> =
            contents.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::to_string).collect();
        Self { remaining: remaining.into_iter() }
    }
}

#[async_trait]
impl Source for JsonSource {
    async fn next_row(&mut self, _ctx: &PluginContext) -> Result<Option<RowData>, SourceError> {
        let Some(line) = self.remaining.next() else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&line).map_err(|err| SourceError::Load(err.to_string()))?;
        match value {
            Value::Object(map) => Ok(Some(map)),
            other => Err(SourceError::Load(format!("expected a JSON object, got {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PluginContext {
        PluginContext {
            run_id: elspeth_core::RunId::generate(),
            node_label: "source".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        }
    }

    #[tokio::test]
    async fn reads_each_line_as_a_row() {
        let mut source = JsonSource::from_str("{\"a\":1}\n{\"a\":2}\n");
        let ctx = ctx();
        let first = source.next_row(&ctx).await.expect("row").expect("some row");
        assert_eq!(first.get("a"), Some(&Value::from(1)));
        let second = source.next_row(&ctx).await.expect("row").expect("some row");
        assert_eq!(second.get("a"), Some(&Value::from(2)));
        assert!(source.next_row(&ctx).await.expect("row").is_none());
    }

    #[tokio::test]
    async fn rejects_non_object_lines() {
        let mut source = JsonSource::from_str("[1,2,3]\n");
        let ctx = ctx();
        let err = source.next_row(&ctx).await.expect_err("array line must fail");
        assert!(matches!(err, SourceError::Load(_)));
    }
}
