// elspeth-runtime/src/plugins/field_gate.rs
// ============================================================================
// Module: Field-Equality Gate Reference Plugin
// Description: Routes a row by comparing one field's string value against a
//              configured set of route labels.
// Purpose: The one reference `Gate` needed to exercise route/fork dispatch
//          in the end-to-end scenarios without a full expression engine.
// Dependencies: elspeth-core::interfaces
// ============================================================================

use async_trait::async_trait;
use elspeth_core::interfaces::GateError;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RoutingAction;
use elspeth_core::interfaces::RowData;
use elspeth_core::interfaces::Gate;

/// Routes by looking up `field` in the row and using its string value
/// directly as the route label, falling back to `Continue` when the field
/// is absent or the declared `default_label` names the route to follow.
pub struct FieldRouteGate {
    field: String,
    default_label: Option<String>,
}

impl FieldRouteGate {
    /// Builds a gate routing on `field`, falling back to `default_label`
    /// (or `Continue` if `None`) when the row lacks that field.
    #[must_use]
    pub fn new(field: impl Into<String>, default_label: Option<String>) -> Self {
        Self { field: field.into(), default_label }
    }
}

#[async_trait]
impl Gate for FieldRouteGate {
    async fn evaluate(&self, row: &RowData, _ctx: &PluginContext) -> Result<RoutingAction, GateError> {
        match row.get(&self.field).and_then(|value| value.as_str()) {
            Some(label) => Ok(RoutingAction::Route { label: label.to_string() }),
            None => match &self.default_label {
                Some(label) => Ok(RoutingAction::Route { label: label.clone() }),
                None => Ok(RoutingAction::Continue),
            },
        }
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
            node_label: "gate".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        }
    }

    #[tokio::test]
    async fn routes_by_field_value() {
        let gate = FieldRouteGate::new("tier", None);
        let mut row = RowData::new();
        row.insert("tier".to_string(), Value::String("high".to_string()));
        let action = gate.evaluate(&row, &ctx()).await.expect("evaluate");
        assert!(matches!(action, RoutingAction::Route { label } if label == "high"));
    }

    #[tokio::test]
    async fn falls_back_to_default_label_when_field_absent() {
        let gate = FieldRouteGate::new("tier", Some("low".to_string()));
        let row = RowData::new();
        let action = gate.evaluate(&row, &ctx()).await.expect("evaluate");
        assert!(matches!(action, RoutingAction::Route { label } if label == "low"));
    }

    #[tokio::test]
    async fn continues_when_field_absent_and_no_default() {
        let gate = FieldRouteGate::new("tier", None);
        let row = RowData::new();
        let action = gate.evaluate(&row, &ctx()).await.expect("evaluate");
        assert!(matches!(action, RoutingAction::Continue));
    }
}
