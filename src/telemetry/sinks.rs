//! Interfaces to telemetry backends
//!
//! The instrumentation core only ever talks to these traits. Each one is
//! optional: a missing sink simply means that kind of telemetry is not shipped.
//! Errors are reported as `anyhow::Error`; the dispatcher logs them and moves
//! on, so implementations do not need their own fallback handling.

use super::records::{ErrorLog, InteractionLog, SpanRecord, ToolCallLog};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Structured log backend
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Record a completed interaction
    async fn record(&self, entry: &InteractionLog) -> anyhow::Result<()>;

    /// Record a failed interaction
    async fn record_error(&self, entry: &ErrorLog) -> anyhow::Result<()>;

    /// Record a nested tool call
    async fn record_tool_call(&self, _entry: &ToolCallLog) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Distributed trace backend
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn send_span(&self, span: &SpanRecord) -> anyhow::Result<()>;
}

/// Metrics backend
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn record_latency(&self, duration_ms: f64) -> anyhow::Result<()>;

    async fn record_success(&self) -> anyhow::Result<()>;

    async fn record_error(&self, error_type: &str) -> anyhow::Result<()>;

    async fn record_token_count(&self, input_tokens: u64, output_tokens: u64)
        -> anyhow::Result<()>;

    async fn record_custom(&self, _name: &str, _value: f64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Batch-write storage for dataset rows
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Write a batch of serialized rows to `table`; the batch succeeds or fails as a whole
    async fn write(&self, table: &str, rows: &[Value]) -> anyhow::Result<()>;
}

/// The set of backends an instrumented agent ships to
#[derive(Clone, Default)]
pub struct Sinks {
    pub log: Option<Arc<dyn LogSink>>,
    pub trace: Option<Arc<dyn TraceSink>>,
    pub metric: Option<Arc<dyn MetricSink>>,
    pub store: Option<Arc<dyn DurableStore>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one backend for every kind of telemetry
    pub fn all<S>(sink: Arc<S>) -> Self
    where
        S: LogSink + TraceSink + MetricSink + DurableStore + 'static,
    {
        Self {
            log: Some(sink.clone()),
            trace: Some(sink.clone()),
            metric: Some(sink.clone()),
            store: Some(sink),
        }
    }

    pub fn with_log(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn with_metric(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric = Some(sink);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks")
            .field("log", &self.log.is_some())
            .field("trace", &self.trace.is_some())
            .field("metric", &self.metric.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}
