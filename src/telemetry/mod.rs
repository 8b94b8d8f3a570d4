//! Telemetry records and the sinks they are shipped to.
//!
//! - [`records`]: interactions, log entries, spans and metric samples
//! - [`sinks`]: the async backend traits and the [`Sinks`] bundle
//! - [`RecordingSink`]: in-memory backend for tests and demos
//! - [`TracingSink`]: backend that emits `tracing` events

pub mod recording_sink;
pub mod records;
pub mod sinks;
pub mod tracing_sink;

pub use recording_sink::{DatasetBatch, RecordCallback, RecordingSink, TelemetryEvent};
pub use records::{
    short_type_name, truncate_chars, ErrorInfo, ErrorLog, Interaction, InteractionLog,
    MetricRecord, MetricSample, RecordFilterFn, SpanRecord, TelemetryRecord, ToolCallLog,
    ToolCallRecord, MAX_ERROR_INPUT_CHARS, MAX_ERROR_MESSAGE_CHARS,
};
pub use sinks::{DurableStore, LogSink, MetricSink, Sinks, TraceSink};
pub use tracing_sink::{init_tracing, TracingSink};
