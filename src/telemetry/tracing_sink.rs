//! Telemetry sink backed by the [`tracing`] crate.
//!
//! [`TracingSink`] turns interactions, spans and metric samples into structured
//! `tracing` events. Wire it to any subscriber (`tracing-subscriber` for stdout,
//! an OpenTelemetry layer for export) when no dedicated backend client is
//! available.

use super::records::{ErrorLog, InteractionLog, SpanRecord, ToolCallLog};
use super::sinks::{LogSink, MetricSink, TraceSink};
use crate::config::LoggingConfig;
use crate::error::{EvaluationError, Result};
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

/// Emits every record as a `tracing` event
///
/// | Record | Level |
/// |--------|-------|
/// | interaction, span, metric | `INFO` |
/// | tool call | `DEBUG` |
/// | interaction error | `ERROR` |
#[derive(Debug, Clone)]
pub struct TracingSink {
    agent_name: String,
}

impl TracingSink {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }
}

#[async_trait]
impl LogSink for TracingSink {
    async fn record(&self, entry: &InteractionLog) -> anyhow::Result<()> {
        let payload = serde_json::to_string(entry)?;
        tracing::info!(
            agent = %self.agent_name,
            interaction_id = %entry.interaction_id,
            duration_ms = entry.duration_ms,
            entry = %payload,
            "agent.interaction"
        );
        Ok(())
    }

    async fn record_error(&self, entry: &ErrorLog) -> anyhow::Result<()> {
        tracing::error!(
            agent = %self.agent_name,
            interaction_id = %entry.interaction_id,
            error_type = %entry.error.error_type,
            error_message = %entry.error.message,
            context = %serde_json::Value::Object(entry.context.clone()),
            "agent.interaction.error"
        );
        Ok(())
    }

    async fn record_tool_call(&self, entry: &ToolCallLog) -> anyhow::Result<()> {
        tracing::debug!(
            agent = %self.agent_name,
            interaction_id = %entry.interaction_id,
            tool = %entry.tool_name,
            duration_ms = entry.duration_ms,
            is_error = entry.error.is_some(),
            "agent.tool_call"
        );
        Ok(())
    }
}

#[async_trait]
impl TraceSink for TracingSink {
    async fn send_span(&self, span: &SpanRecord) -> anyhow::Result<()> {
        tracing::info!(
            agent = %self.agent_name,
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            parent_span_id = span.parent_span_id.as_deref().unwrap_or(""),
            name = %span.name,
            duration_ms = span.duration_ms(),
            "agent.span"
        );
        Ok(())
    }
}

#[async_trait]
impl MetricSink for TracingSink {
    async fn record_latency(&self, duration_ms: f64) -> anyhow::Result<()> {
        tracing::info!(agent = %self.agent_name, duration_ms, "agent.metric.latency");
        Ok(())
    }

    async fn record_success(&self) -> anyhow::Result<()> {
        tracing::info!(agent = %self.agent_name, "agent.metric.success");
        Ok(())
    }

    async fn record_error(&self, error_type: &str) -> anyhow::Result<()> {
        tracing::info!(agent = %self.agent_name, error_type, "agent.metric.error");
        Ok(())
    }

    async fn record_token_count(
        &self,
        input_tokens: u64,
        output_tokens: u64,
    ) -> anyhow::Result<()> {
        tracing::info!(agent = %self.agent_name, input_tokens, output_tokens, "agent.metric.tokens");
        Ok(())
    }

    async fn record_custom(&self, name: &str, value: f64) -> anyhow::Result<()> {
        tracing::info!(agent = %self.agent_name, metric = name, value, "agent.metric.custom");
        Ok(())
    }
}

/// Install a global fmt subscriber honouring `RUST_LOG`, falling back to the configured level
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| EvaluationError::RuntimeError(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::records::ErrorInfo;
    use chrono::Utc;
    use serde_json::{json, Map};

    #[tokio::test]
    async fn test_tracing_sink_accepts_all_records() {
        let sink = TracingSink::new("agent");
        let now = Utc::now();

        let log = InteractionLog {
            interaction_id: "i-1".to_string(),
            agent_name: "agent".to_string(),
            timestamp: now,
            input: json!("hi"),
            output: "hello".to_string(),
            duration_ms: 2.0,
            metadata: Map::new(),
            trajectory: None,
        };
        let error = ErrorLog {
            interaction_id: "i-2".to_string(),
            agent_name: "agent".to_string(),
            timestamp: now,
            error: ErrorInfo::new("Timeout", "gave up"),
            context: Map::new(),
        };
        let span = SpanRecord {
            trace_id: "a".repeat(32),
            span_id: "b".repeat(16),
            parent_span_id: None,
            name: "agent.call".to_string(),
            start: now,
            end: now,
            attributes: Map::new(),
        };

        assert!(LogSink::record(&sink, &log).await.is_ok());
        assert!(LogSink::record_error(&sink, &error).await.is_ok());
        assert!(sink.send_span(&span).await.is_ok());
        assert!(sink.record_latency(2.0).await.is_ok());
        assert!(MetricSink::record_error(&sink, "Timeout").await.is_ok());
    }

    #[test]
    fn test_init_tracing_twice_reports_error() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
