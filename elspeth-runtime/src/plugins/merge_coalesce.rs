// elspeth-runtime/src/plugins/merge_coalesce.rs
// ============================================================================
// Module: Labeled-Merge Coalesce Reference Plugin
// Description: Merges rows arrived under distinct route labels into one
//              row, nesting each arrival's fields under its label.
// Purpose: The one reference plugin exercising §4.5's coalesce protocol.
// Dependencies: elspeth-core::interfaces
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use elspeth_core::interfaces::Coalesce;
use elspeth_core::interfaces::CoalesceError;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use serde_json::Value;

/// Merges one row per expected label into a single row, with each
/// arrival's fields nested under a key named after its label.
///
/// The scheduler is responsible for only calling `merge` once every
/// expected label has arrived; this plugin trusts `rows_by_label` to
/// already be complete and does not itself check for missing labels.
pub struct MergeCoalesce;

impl MergeCoalesce {
    /// Builds the merge coalescer. It carries no configuration; every
    /// arrival's fields are nested verbatim under its label.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for MergeCoalesce {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Coalesce for MergeCoalesce {
    async fn merge(&self, rows_by_label: BTreeMap<String, RowData>, _ctx: &PluginContext) -> Result<RowData, CoalesceError> {
        if rows_by_label.is_empty() {
            return Err(CoalesceError::Failed("no arrivals to merge".to_string()));
        }
        let mut merged = RowData::new();
        for (label, row) in rows_by_label {
            merged.insert(label, Value::Object(row));
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use elspeth_core::RunId;
    use serde_json::json;

    use super::*;

    fn ctx() -> PluginContext {
        PluginContext {
            run_id: RunId::generate(),
            node_label: "merge".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        }
    }

    #[tokio::test]
    async fn nests_each_arrival_under_its_label() {
        let coalesce = MergeCoalesce::new();
        let mut left = RowData::new();
        left.insert("score".to_string(), json!(1));
        let mut right = RowData::new();
        right.insert("score".to_string(), json!(2));

        let mut arrivals = BTreeMap::new();
        arrivals.insert("left".to_string(), left);
        arrivals.insert("right".to_string(), right);

        let merged = coalesce.merge(arrivals, &ctx()).await.expect("merge");
        assert_eq!(merged.get("left"), Some(&json!({"score": 1})));
        assert_eq!(merged.get("right"), Some(&json!({"score": 2})));
    }

    #[tokio::test]
    async fn rejects_an_empty_arrival_set() {
        let coalesce = MergeCoalesce::new();
        let result = coalesce.merge(BTreeMap::new(), &ctx()).await;
        assert!(result.is_err());
    }
}
