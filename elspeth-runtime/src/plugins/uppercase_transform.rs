// elspeth-runtime/src/plugins/uppercase_transform.rs
// ============================================================================
// Module: Uppercase Transform Reference Plugin
// Description: Upper-cases the string value of one configured field.
// Purpose: A deterministic, I/O-free transform exercising the scheduler's
//          transform path in the end-to-end scenarios.
// Dependencies: elspeth-core::interfaces
// ============================================================================

use async_trait::async_trait;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Transform;
use elspeth_core::interfaces::TransformResult;
use serde_json::Value;

/// Upper-cases the value of `field` if present and a string; any other row
/// passes through unchanged.
pub struct UppercaseTransform {
    field: String,
}

impl UppercaseTransform {
    /// Builds a transform that upper-cases `field`.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

#[async_trait]
impl Transform for UppercaseTransform {
    async fn process(&self, mut row: RowData, _ctx: &PluginContext) -> TransformResult {
        if let Some(Value::String(value)) = row.get(&self.field) {
            let upper = value.to_uppercase();
            row.insert(self.field.clone(), Value::String(upper));
        }
        TransformResult::Success { rows: vec![row] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PluginContext {
        PluginContext {
            run_id: elspeth_core::RunId::generate(),
            node_label: "transform".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        }
    }

    #[tokio::test]
    async fn uppercases_the_configured_field() {
        let transform = UppercaseTransform::new("name");
        let mut row = RowData::new();
        row.insert("name".to_string(), Value::String("alice".to_string()));
        let result = transform.process(row, &ctx()).await;
        let TransformResult::Success { rows } = result else { panic!("expected success") };
        assert_eq!(rows[0].get("name"), Some(&Value::String("ALICE".to_string())));
    }

    #[tokio::test]
    async fn passes_through_when_field_absent() {
        let transform = UppercaseTransform::new("missing");
        let row = RowData::new();
        let result = transform.process(row.clone(), &ctx()).await;
        let TransformResult::Success { rows } = result else { panic!("expected success") };
        assert_eq!(rows[0], row);
    }
}
