// elspeth-runtime/src/plugins/csv_source.rs
// ============================================================================
// Module: CSV Source Reference Plugin
// Description: Reads header + comma-separated rows into `RowData`.
// Purpose: One of the small reference source plugins needed to run the
//          end-to-end scenarios without a real ingestion system.
// Dependencies: elspeth-core::interfaces
// ============================================================================

use async_trait::async_trait;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Source;
use elspeth_core::interfaces::SourceError;
use serde_json::Value;

/// Minimal CSV source: no quoting, escaping, or embedded commas. Sufficient
/// for the fixture data the reference scenarios ship with; a production
/// pipeline would replace this with a dedicated plugin.
pub struct CsvSource {
    header: Vec<String>,
    remaining: std::vec::IntoIter<String>,
}

impl CsvSource {
    /// Builds a source over `contents`, whose first line is the header.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if `contents` has no lines at all.
    pub fn from_str(contents: &str) -> Result<Self, SourceError> {
        let mut lines = contents.lines();
        let header_line = lines.next().ok_or_else(|| SourceError::Load("csv input has no header row".to_string()))?;
        let header: Vec<String> = header_line.split(',').map(|field| field.trim().to_string()).collect();
        let remaining: Vec<String> = lines.map(str::to_string).collect();
        Ok(Self { header, remaining: remaining.into_iter() })
    }
}

#[async_trait]
impl Source for CsvSource {
    async fn next_row(&mut self, _ctx: &PluginContext) -> Result<Option<RowData>, SourceError> {
        let Some(line) = self.remaining.next() else {
            return Ok(None);
        };
        if line.trim().is_empty() {
            return Ok(None);
        }
        let fields: Vec<&str> = line.split(',').collect();
        let mut row = RowData::new();
        for (index, name) in self.header.iter().enumerate() {
            let value = fields.get(index).map(|field| field.trim()).unwrap_or_default();
            row.insert(name.clone(), Value::String(value.to_string()));
        }
        Ok(Some(row))
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
    async fn reads_rows_in_order() {
        let mut source = CsvSource::from_str("name,age\nalice,30\nbob,41\n").expect("build source");
        let ctx = ctx();
        let first = source.next_row(&ctx).await.expect("row").expect("some row");
        assert_eq!(first.get("name"), Some(&Value::String("alice".to_string())));
        let second = source.next_row(&ctx).await.expect("row").expect("some row");
        assert_eq!(second.get("age"), Some(&Value::String("41".to_string())));
        assert!(source.next_row(&ctx).await.expect("row").is_none());
    }

    #[test]
    fn rejects_empty_input() {
        let err = CsvSource::from_str("").expect_err("empty input must fail");
        assert!(matches!(err, SourceError::Load(_)));
    }
}
