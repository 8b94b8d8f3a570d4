//! In-memory telemetry sink with callbacks and filtering
//!
//! [`RecordingSink`] implements every sink trait and keeps what it receives in
//! memory. It is the backend for tests and local demos, and can be told to fail
//! durable writes to exercise the dataset retry path.

use super::records::{
    ErrorLog, InteractionLog, MetricRecord, MetricSample, RecordFilterFn, SpanRecord,
    TelemetryRecord, ToolCallLog,
};
use super::sinks::{DurableStore, LogSink, MetricSink, TraceSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Type alias for record callback functions
pub type RecordCallback = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// A batch of dataset rows accepted by the store
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetBatch {
    pub timestamp: DateTime<Utc>,
    pub table: String,
    pub rows: Vec<Value>,
}

impl TelemetryRecord for DatasetBatch {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn interaction_id(&self) -> Option<&str> {
        None
    }

    fn printable_summary(&self) -> String {
        let plural = if self.rows.len() != 1 { "s" } else { "" };
        format!(
            "[{}] DatasetBatch ({} row{} -> {})",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.rows.len(),
            plural,
            self.table
        )
    }
}

/// Anything the recording sink has received
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Interaction(InteractionLog),
    Error(ErrorLog),
    ToolCall(ToolCallLog),
    Span(SpanRecord),
    Metric(MetricRecord),
    Dataset(DatasetBatch),
}

impl TelemetryEvent {
    /// The event as a generic record
    pub fn record(&self) -> &dyn TelemetryRecord {
        match self {
            TelemetryEvent::Interaction(r) => r,
            TelemetryEvent::Error(r) => r,
            TelemetryEvent::ToolCall(r) => r,
            TelemetryEvent::Span(r) => r,
            TelemetryEvent::Metric(r) => r,
            TelemetryEvent::Dataset(r) => r,
        }
    }
}

/// Store for capturing and querying telemetry
///
/// RecordingSink provides thread-safe storage with support for:
/// - A callback triggered on each stored record
/// - Typed accessors per record kind
/// - Custom filter predicates
/// - Query for the last N summaries
/// - Injected durable-write failures
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
    on_record_callback: Option<RecordCallback>,
    failing_writes: AtomicUsize,
    write_attempts: AtomicUsize,
}

impl RecordingSink {
    /// Create a new recording sink
    ///
    /// # Arguments
    ///
    /// * `on_record_callback` - Optional callback called whenever a record is stored
    pub fn new(on_record_callback: Option<RecordCallback>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            on_record_callback,
            failing_writes: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
        }
    }

    /// Store a record, triggering the callback first if one is configured
    pub fn store(&self, event: TelemetryEvent) {
        if let Some(callback) = &self.on_record_callback {
            callback(&event);
        }

        self.events().push(event);
    }

    /// Make the next `count` durable writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Make every durable write fail until reset with `fail_next_writes(0)`
    pub fn fail_all_writes(&self) {
        self.failing_writes.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of durable writes attempted, failed ones included
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn interactions(&self) -> Vec<InteractionLog> {
        self.collect(|e| match e {
            TelemetryEvent::Interaction(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn errors(&self) -> Vec<ErrorLog> {
        self.collect(|e| match e {
            TelemetryEvent::Error(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn tool_calls(&self) -> Vec<ToolCallLog> {
        self.collect(|e| match e {
            TelemetryEvent::ToolCall(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn spans(&self) -> Vec<SpanRecord> {
        self.collect(|e| match e {
            TelemetryEvent::Span(r) => Some(r.clone()),
            _ => None,
        })
    }

    pub fn metrics(&self) -> Vec<MetricSample> {
        self.collect(|e| match e {
            TelemetryEvent::Metric(r) => Some(r.sample.clone()),
            _ => None,
        })
    }

    /// Every dataset row from every successful write, in write order
    pub fn dataset_rows(&self) -> Vec<Value> {
        self.collect(|e| match e {
            TelemetryEvent::Dataset(batch) => Some(batch.rows.clone()),
            _ => None,
        })
        .into_iter()
        .flatten()
        .collect()
    }

    /// Count records matching an optional filter
    pub fn count_events(&self, filter_func: Option<&dyn RecordFilterFn>) -> usize {
        self.events()
            .iter()
            .filter(|e| filter_func.map_or(true, |f| f.matches(e.record())))
            .count()
    }

    /// Get summaries of records matching an optional filter
    pub fn get_event_summaries(&self, filter_func: Option<&dyn RecordFilterFn>) -> Vec<String> {
        self.events()
            .iter()
            .map(TelemetryEvent::record)
            .filter(|r| filter_func.map_or(true, |f| f.matches(*r)))
            .map(|r| r.printable_summary())
            .collect()
    }

    /// Get the last N summaries, optionally filtered
    pub fn get_last_n_summaries(
        &self,
        n: usize,
        filter_func: Option<&dyn RecordFilterFn>,
    ) -> Vec<String> {
        let summaries = self.get_event_summaries(filter_func);
        let start_idx = summaries.len().saturating_sub(n);
        summaries[start_idx..].to_vec()
    }

    /// Clear all records
    pub fn clear(&self) {
        self.events().clear();
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    fn events(&self) -> MutexGuard<'_, Vec<TelemetryEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn collect<T>(&self, pick: impl Fn(&TelemetryEvent) -> Option<T>) -> Vec<T> {
        self.events().iter().filter_map(pick).collect()
    }

    fn store_metric(&self, sample: MetricSample) {
        self.store(TelemetryEvent::Metric(MetricRecord {
            timestamp: Utc::now(),
            sample,
        }));
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn record(&self, entry: &InteractionLog) -> anyhow::Result<()> {
        self.store(TelemetryEvent::Interaction(entry.clone()));
        Ok(())
    }

    async fn record_error(&self, entry: &ErrorLog) -> anyhow::Result<()> {
        self.store(TelemetryEvent::Error(entry.clone()));
        Ok(())
    }

    async fn record_tool_call(&self, entry: &ToolCallLog) -> anyhow::Result<()> {
        self.store(TelemetryEvent::ToolCall(entry.clone()));
        Ok(())
    }
}

#[async_trait]
impl TraceSink for RecordingSink {
    async fn send_span(&self, span: &SpanRecord) -> anyhow::Result<()> {
        self.store(TelemetryEvent::Span(span.clone()));
        Ok(())
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn record_latency(&self, duration_ms: f64) -> anyhow::Result<()> {
        self.store_metric(MetricSample::Latency { duration_ms });
        Ok(())
    }

    async fn record_success(&self) -> anyhow::Result<()> {
        self.store_metric(MetricSample::Success);
        Ok(())
    }

    async fn record_error(&self, error_type: &str) -> anyhow::Result<()> {
        self.store_metric(MetricSample::Error {
            error_type: error_type.to_string(),
        });
        Ok(())
    }

    async fn record_token_count(
        &self,
        input_tokens: u64,
        output_tokens: u64,
    ) -> anyhow::Result<()> {
        self.store_metric(MetricSample::TokenCount {
            input_tokens,
            output_tokens,
        });
        Ok(())
    }

    async fn record_custom(&self, name: &str, value: f64) -> anyhow::Result<()> {
        self.store_metric(MetricSample::Custom {
            name: name.to_string(),
            value,
        });
        Ok(())
    }
}

#[async_trait]
impl DurableStore for RecordingSink {
    async fn write(&self, table: &str, rows: &[Value]) -> anyhow::Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            anyhow::bail!("injected write failure for {}", table);
        }
        self.store(TelemetryEvent::Dataset(DatasetBatch {
            timestamp: Utc::now(),
            table: table.to_string(),
            rows: rows.to_vec(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn interaction_log(id: &str) -> InteractionLog {
        InteractionLog {
            interaction_id: id.to_string(),
            agent_name: "test-agent".to_string(),
            timestamp: Utc::now(),
            input: json!("hello"),
            output: "hello".to_string(),
            duration_ms: 1.5,
            metadata: Map::new(),
            trajectory: None,
        }
    }

    #[tokio::test]
    async fn test_store_interaction() {
        let sink = RecordingSink::default();

        sink.record(&interaction_log("i-1")).await.unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.interactions()[0].interaction_id, "i-1");
        assert!(sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_callback_triggered() {
        let callback_count = Arc::new(AtomicUsize::new(0));
        let callback_count_clone = Arc::clone(&callback_count);

        let callback: RecordCallback = Arc::new(move |_event: &TelemetryEvent| {
            callback_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let sink = RecordingSink::new(Some(callback));
        sink.record(&interaction_log("i-1")).await.unwrap();
        sink.record_success().await.unwrap();

        assert_eq!(callback_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_metrics_recorded_in_order() {
        let sink = RecordingSink::default();

        sink.record_latency(12.0).await.unwrap();
        sink.record_success().await.unwrap();
        sink.record_token_count(3, 4).await.unwrap();

        assert_eq!(
            sink.metrics(),
            vec![
                MetricSample::Latency { duration_ms: 12.0 },
                MetricSample::Success,
                MetricSample::TokenCount {
                    input_tokens: 3,
                    output_tokens: 4
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_write_failures() {
        let sink = RecordingSink::default();
        sink.fail_next_writes(1);

        assert!(sink.write("t", &[json!({"a": 1})]).await.is_err());
        assert!(sink.write("t", &[json!({"a": 2})]).await.is_ok());

        assert_eq!(sink.write_attempts(), 2);
        assert_eq!(sink.dataset_rows(), vec![json!({"a": 2})]);
    }

    #[tokio::test]
    async fn test_fail_all_writes() {
        let sink = RecordingSink::default();
        sink.fail_all_writes();

        for _ in 0..3 {
            assert!(sink.write("t", &[json!(1)]).await.is_err());
        }
        assert!(sink.dataset_rows().is_empty());

        sink.fail_next_writes(0);
        assert!(sink.write("t", &[json!(1)]).await.is_ok());
    }

    #[tokio::test]
    async fn test_filtered_queries() {
        let sink = RecordingSink::default();
        sink.record(&interaction_log("keep")).await.unwrap();
        sink.record(&interaction_log("skip")).await.unwrap();
        sink.record_success().await.unwrap();

        let only_keep = |r: &dyn TelemetryRecord| r.interaction_id() == Some("keep");
        let filter: &dyn RecordFilterFn = &only_keep;
        assert_eq!(sink.count_events(Some(filter)), 1);
        assert_eq!(sink.count_events(None), 3);

        let last = sink.get_last_n_summaries(1, None);
        assert_eq!(last.len(), 1);
        assert!(last[0].contains("Metric success"));
    }

    #[tokio::test]
    async fn test_clear() {
        let sink = RecordingSink::default();
        sink.record_success().await.unwrap();
        assert!(!sink.is_empty());

        sink.clear();
        assert!(sink.is_empty());
    }
}
