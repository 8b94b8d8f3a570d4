//! Telemetry record types
//!
//! This module defines the data shipped to telemetry sinks: the completed
//! [`Interaction`] itself, the log entries, spans and metric samples derived from
//! it, and the [`ToolCallRecord`]s that make up a trajectory. All shippable
//! records implement [`TelemetryRecord`], which provides a timestamp, the owning
//! interaction id and a printable summary.

use crate::context::TraceContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;

/// Longest error message kept in telemetry, in characters
pub const MAX_ERROR_MESSAGE_CHARS: usize = 256;

/// Longest input excerpt attached to error logs, in characters
pub const MAX_ERROR_INPUT_CHARS: usize = 500;

/// Trait for filtering telemetry records
///
/// Implemented for any matching closure so queries can take `&dyn RecordFilterFn`
/// instead of spelling out the closure type.
pub trait RecordFilterFn: Send + Sync {
    /// Test whether a record passes the filter
    fn matches(&self, record: &dyn TelemetryRecord) -> bool;
}

impl<F> RecordFilterFn for F
where
    F: Fn(&dyn TelemetryRecord) -> bool + Send + Sync,
{
    fn matches(&self, record: &dyn TelemetryRecord) -> bool {
        self(record)
    }
}

/// Base trait for everything a sink can receive
pub trait TelemetryRecord: Send + Sync {
    /// When the record was produced
    fn timestamp(&self) -> DateTime<Utc>;

    /// Interaction the record belongs to, if any
    fn interaction_id(&self) -> Option<&str>;

    /// Get a formatted string summary of the record
    fn printable_summary(&self) -> String;
}

/// Error shape used in telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
}

impl ErrorInfo {
    /// Build an error record, truncating the message
    pub fn new(error_type: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self {
            error_type: error_type.into(),
            message: truncate_chars(message.as_ref(), MAX_ERROR_MESSAGE_CHARS),
        }
    }

    /// Describe an error value using its type name and `Display` output
    pub fn from_error<E: Display + ?Sized>(error: &E) -> Self {
        Self::new(short_type_name::<E>(), error.to_string())
    }
}

/// One nested tool call inside an interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A completed call through an instrumented entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub interaction_id: String,
    pub method: String,
    pub input: Value,
    /// Extracted output; `None` when the call failed
    pub output: Option<String>,
    pub duration_ms: f64,
    pub metadata: Map<String, Value>,
    pub trajectory: Vec<ToolCallRecord>,
    pub error: Option<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub trace: Option<TraceContext>,
}

impl Interaction {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Input as text: strings verbatim, anything else as JSON
    pub fn input_text(&self) -> String {
        match &self.input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Structured log entry for a successful interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionLog {
    pub interaction_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub input: Value,
    pub output: String,
    pub duration_ms: f64,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Vec<ToolCallRecord>>,
}

/// Structured log entry for a failed interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub interaction_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorInfo,
    pub context: Map<String, Value>,
}

/// Debug-level log entry for one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallLog {
    pub interaction_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A finished trace span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

impl SpanRecord {
    pub fn duration_ms(&self) -> f64 {
        (self.end - self.start).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }
}

/// A single metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSample {
    Latency { duration_ms: f64 },
    Success,
    Error { error_type: String },
    TokenCount { input_tokens: u64, output_tokens: u64 },
    Custom { name: String, value: f64 },
}

/// Metric sample as received by a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub sample: MetricSample,
}

impl TelemetryRecord for InteractionLog {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn interaction_id(&self) -> Option<&str> {
        Some(&self.interaction_id)
    }

    fn printable_summary(&self) -> String {
        let mut summary = format!(
            "[{}] InteractionLog (interaction_id: {})\n   Agent: {}\n   Duration: {:.2}ms",
            format_time(self.timestamp),
            self.interaction_id,
            self.agent_name,
            self.duration_ms
        );

        summary.push_str(&format!("\n   Output: {}", preview(&self.output)));

        if let Some(trajectory) = &self.trajectory {
            if !trajectory.is_empty() {
                let names: Vec<&str> = trajectory.iter().map(|t| t.tool_name.as_str()).collect();
                summary.push_str(&format!("\n   Tools: {}", names.join(", ")));
            }
        }

        summary
    }
}

impl TelemetryRecord for ErrorLog {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn interaction_id(&self) -> Option<&str> {
        Some(&self.interaction_id)
    }

    fn printable_summary(&self) -> String {
        format!(
            "[{}] ErrorLog (interaction_id: {})\n   Agent: {}\n   Error: {}: {}",
            format_time(self.timestamp),
            self.interaction_id,
            self.agent_name,
            self.error.error_type,
            self.error.message
        )
    }
}

impl TelemetryRecord for ToolCallLog {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn interaction_id(&self) -> Option<&str> {
        Some(&self.interaction_id)
    }

    fn printable_summary(&self) -> String {
        let mut summary = format!(
            "[{}] ToolCallLog (interaction_id: {})\n   Tool: {}\n   Duration: {:.2}ms",
            format_time(self.timestamp),
            self.interaction_id,
            self.tool_name,
            self.duration_ms
        );
        if let Some(error) = &self.error {
            summary.push_str(&format!("\n   Error: {}", error));
        }
        summary
    }
}

impl TelemetryRecord for SpanRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.start
    }

    fn interaction_id(&self) -> Option<&str> {
        self.attributes.get("interaction_id").and_then(Value::as_str)
    }

    fn printable_summary(&self) -> String {
        let mut summary = format!(
            "[{}] Span {} (trace_id: {}, span_id: {})\n   Duration: {:.2}ms",
            format_time(self.start),
            self.name,
            self.trace_id,
            self.span_id,
            self.duration_ms()
        );
        if let Some(parent) = &self.parent_span_id {
            summary.push_str(&format!("\n   Parent: {}", parent));
        }
        summary
    }
}

impl TelemetryRecord for MetricRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn interaction_id(&self) -> Option<&str> {
        None
    }

    fn printable_summary(&self) -> String {
        let detail = match &self.sample {
            MetricSample::Latency { duration_ms } => format!("latency {:.2}ms", duration_ms),
            MetricSample::Success => "success".to_string(),
            MetricSample::Error { error_type } => format!("error ({})", error_type),
            MetricSample::TokenCount {
                input_tokens,
                output_tokens,
            } => format!("tokens in={} out={}", input_tokens, output_tokens),
            MetricSample::Custom { name, value } => format!("custom {}={}", name, value),
        };
        format!("[{}] Metric {}", format_time(self.timestamp), detail)
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Last path segment of a type name, e.g. `AgentError` for `my_agent::AgentError`
pub fn short_type_name<T: ?Sized>() -> String {
    let mut name = std::any::type_name::<T>();

    // Smart pointers name their pointee
    while let Some((outer, inner)) = name.split_once('<') {
        let outer = outer.rsplit("::").next().unwrap_or(outer);
        if !matches!(outer, "Box" | "Arc" | "Rc") {
            break;
        }
        name = inner.strip_suffix('>').unwrap_or(inner);
    }

    let name = name.trim_start_matches("dyn ");
    let name = name.split(" + ").next().unwrap_or(name);
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%H:%M:%S%.3f").to_string()
}

fn preview(text: &str) -> String {
    if text.chars().count() > 100 {
        format!("{}...", truncate_chars(text, 100))
    } else {
        text.to_string()
    }
}
