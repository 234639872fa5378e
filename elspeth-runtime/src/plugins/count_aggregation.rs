// elspeth-runtime/src/plugins/count_aggregation.rs
// ============================================================================
// Module: Count-Triggered Aggregation Reference Plugin
// Description: Buffers rows under a configured key and flushes a summary
//              row once the buffer reaches a configured size, or on
//              source exhaustion regardless of size.
// Purpose: The one reference plugin exercising §4.4's aggregation
//          protocol (buffer, trigger, partial flush).
// Dependencies: elspeth-core::interfaces
// ============================================================================

use async_trait::async_trait;
use elspeth_core::interfaces::Aggregation;
use elspeth_core::interfaces::AggregationError;
use elspeth_core::interfaces::FlushReason;
use elspeth_core::interfaces::PluginContext;
use elspeth_core::interfaces::RowData;
use serde_json::Value;
use serde_json::json;

/// Buffers rows and flushes a single summary row (`count`, plus the sum of
/// a configured numeric field) once `threshold` rows have been accepted,
/// or whenever the caller flushes for another reason (e.g. source
/// exhaustion).
pub struct CountAggregation {
    threshold: usize,
    sum_field: String,
    buffered: Vec<RowData>,
}

impl CountAggregation {
    /// Builds an aggregation that flushes every `threshold` rows, summing
    /// `sum_field` across the buffered rows into the output row.
    #[must_use]
    pub fn new(threshold: usize, sum_field: impl Into<String>) -> Self {
        Self { threshold, sum_field: sum_field.into(), buffered: Vec::new() }
    }

    fn summarize(&self) -> RowData {
        let sum: f64 = self
            .buffered
            .iter()
            .filter_map(|row| row.get(&self.sum_field))
            .filter_map(serde_json::Value::as_f64)
            .sum();
        let mut row = RowData::new();
        row.insert("count".to_string(), json!(self.buffered.len()));
        row.insert("sum".to_string(), json!(sum));
        row
    }
}

#[async_trait]
impl Aggregation for CountAggregation {
    async fn accept(&mut self, row: RowData, _ctx: &PluginContext) -> Result<(), AggregationError> {
        self.buffered.push(row);
        Ok(())
    }

    async fn flush(&mut self, _ctx: &PluginContext, reason: FlushReason) -> Result<Vec<RowData>, AggregationError> {
        if self.buffered.is_empty() {
            return Ok(Vec::new());
        }
        if reason == FlushReason::Count && self.buffered.len() < self.threshold {
            return Ok(Vec::new());
        }
        let summary = self.summarize();
        self.buffered.clear();
        Ok(vec![summary])
    }

    fn snapshot(&self) -> Result<Value, AggregationError> {
        serde_json::to_value(&self.buffered).map_err(|err| AggregationError::Failed(err.to_string()))
    }

    fn restore(&mut self, snapshot: Value) -> Result<(), AggregationError> {
        self.buffered = serde_json::from_value(snapshot).map_err(|err| AggregationError::Failed(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use elspeth_core::RunId;

    use super::*;

    fn ctx() -> PluginContext {
        PluginContext {
            run_id: RunId::generate(),
            node_label: "batch".to_string(),
            config: Value::Null,
            checkpoint: None,
            call_log: None,
        }
    }

    fn row(value: f64) -> RowData {
        let mut row = RowData::new();
        row.insert("amount".to_string(), json!(value));
        row
    }

    #[tokio::test]
    async fn does_not_flush_before_threshold_reached() {
        let mut agg = CountAggregation::new(3, "amount");
        agg.accept(row(1.0), &ctx()).await.expect("accept");
        let flushed = agg.flush(&ctx(), FlushReason::Count).await.expect("flush");
        assert!(flushed.is_empty());
    }

    #[tokio::test]
    async fn flushes_a_summary_row_at_threshold() {
        let mut agg = CountAggregation::new(2, "amount");
        agg.accept(row(1.0), &ctx()).await.expect("accept");
        agg.accept(row(2.0), &ctx()).await.expect("accept");
        let flushed = agg.flush(&ctx(), FlushReason::Count).await.expect("flush");
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].get("count"), Some(&json!(2)));
        assert_eq!(flushed[0].get("sum"), Some(&json!(3.0)));
    }

    #[tokio::test]
    async fn flushes_a_partial_buffer_on_source_exhaustion() {
        let mut agg = CountAggregation::new(10, "amount");
        agg.accept(row(5.0), &ctx()).await.expect("accept");
        let flushed = agg.flush(&ctx(), FlushReason::SourceExhausted).await.expect("flush");
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].get("count"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trip_the_buffer() {
        let mut agg = CountAggregation::new(10, "amount");
        agg.accept(row(5.0), &ctx()).await.expect("accept");
        let snapshot = agg.snapshot().expect("snapshot");

        let mut restored = CountAggregation::new(10, "amount");
        restored.restore(snapshot).expect("restore");
        let flushed = restored.flush(&ctx(), FlushReason::SourceExhausted).await.expect("flush");
        assert_eq!(flushed[0].get("count"), Some(&json!(1)));
    }
}
