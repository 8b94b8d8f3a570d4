//! Telemetry dispatcher for instrumented agents
//!
//! This module turns finished interactions and tool calls into sink work: the
//! outer span, the structured log entry, the metric samples and the dataset
//! row. Every piece runs as its own [`WorkerPool`] job so a slow or failing
//! sink only ever affects itself, but the jobs of one call are queued together:
//! a shutdown racing a call ships all of its telemetry or none of it.

use super::worker_pool::{TelemetryJob, WorkerPool};
use crate::config::EvaluationConfig;
use crate::context::{new_span_id, sampled, TraceContext};
use crate::dataset::{DatasetBuffer, DatasetRow, FlushOutcome};
use crate::error::Result;
use crate::telemetry::{
    truncate_chars, ErrorLog, Interaction, InteractionLog, Sinks, SpanRecord, ToolCallLog,
    ToolCallRecord, MAX_ERROR_INPUT_CHARS,
};
use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Central system for shipping interaction telemetry
///
/// The dispatcher owns the sinks, the background worker pool and (when dataset
/// collection is on) the dataset buffer of one instrumented agent.
pub struct TelemetryDispatcher {
    agent_name: String,
    config: EvaluationConfig,
    sinks: Sinks,
    pool: WorkerPool,
    dataset: Option<Arc<DatasetBuffer>>,
}

impl TelemetryDispatcher {
    /// Validate the configuration and start the worker pool
    ///
    /// # Arguments
    ///
    /// * `config` - Evaluation configuration for the agent
    /// * `sinks` - Backends to ship to; missing ones are skipped
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(config: &EvaluationConfig, sinks: Sinks) -> Result<Self> {
        config.validate()?;

        let pool = WorkerPool::start(config.worker.pool_size, config.worker.queue_capacity)?;

        let dataset = match (config.dataset.auto_collect, &sinks.store) {
            (true, Some(store)) => Some(Arc::new(DatasetBuffer::new(
                store.clone(),
                config.dataset_table(),
                config.dataset.buffer_size,
                config.dataset.max_retries,
            ))),
            (true, None) => {
                warn!(
                    agent = %config.agent_name,
                    "dataset.auto_collect is enabled but no durable store was supplied, disabling collection"
                );
                None
            }
            (false, _) => None,
        };

        info!(agent = %config.agent_name, sinks = ?sinks, "Telemetry dispatcher started");

        Ok(Self {
            agent_name: config.agent_name.clone(),
            config: config.clone(),
            sinks,
            pool,
            dataset,
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Dataset buffer, present only when collection is active
    pub fn dataset(&self) -> Option<&Arc<DatasetBuffer>> {
        self.dataset.as_ref()
    }

    /// Whether new telemetry is still accepted
    pub fn is_accepting(&self) -> bool {
        self.pool.is_accepting()
    }

    /// Whether tool calls should be appended to trajectories
    pub fn records_trajectories(&self) -> bool {
        self.config.logging.include_trajectories
    }

    /// Start a trace context for a new outer call, honouring the sample rate
    pub fn begin_trace(&self) -> Option<TraceContext> {
        (self.config.tracing.enabled && sampled(self.config.tracing.sample_rate))
            .then(TraceContext::generate)
    }

    /// Ship everything derived from a finished interaction
    pub fn dispatch_interaction(&self, interaction: Interaction) {
        if !self.is_accepting() {
            debug!(interaction_id = %interaction.interaction_id, "Dispatcher shut down, skipping interaction");
            return;
        }

        let jobs: Vec<TelemetryJob> = [
            self.interaction_span_job(&interaction),
            self.interaction_log_job(&interaction),
            self.interaction_metrics_job(&interaction),
            self.dataset_row_job(&interaction),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !self.pool.submit_all(jobs) {
            debug!(interaction_id = %interaction.interaction_id, "Interaction telemetry dropped");
        }
    }

    /// Ship the span and debug log for one tool call
    pub fn dispatch_tool_call(
        &self,
        interaction_id: &str,
        trace: Option<&TraceContext>,
        record: &ToolCallRecord,
        started_at: DateTime<Utc>,
    ) {
        if !self.is_accepting() {
            return;
        }
        let mut jobs = Vec::with_capacity(2);

        if let (true, Some(sink), Some(trace)) =
            (self.config.tracing.enabled, &self.sinks.trace, trace)
        {
            let mut attributes = Map::new();
            attributes.insert("tool_name".to_string(), json!(record.tool_name));
            attributes.insert("interaction_id".to_string(), json!(interaction_id));
            if let Some(error) = &record.error {
                attributes.insert("error".to_string(), json!(true));
                attributes.insert("error.message".to_string(), json!(error));
            }

            let span = SpanRecord {
                trace_id: trace.trace_id.clone(),
                span_id: new_span_id(),
                parent_span_id: Some(trace.parent_span_id.clone()),
                name: format!("tool.{}", record.tool_name),
                start: started_at,
                end: record.timestamp,
                attributes,
            };
            let sink = sink.clone();
            jobs.push(job("tool_span", async move {
                report("trace", sink.send_span(&span).await);
            }));
        }

        if let (true, Some(sink)) = (self.config.logging.enabled, &self.sinks.log) {
            let entry = ToolCallLog {
                interaction_id: interaction_id.to_string(),
                agent_name: self.agent_name.clone(),
                timestamp: record.timestamp,
                tool_name: record.tool_name.clone(),
                duration_ms: record.duration_ms,
                error: record.error.clone(),
            };
            let sink = sink.clone();
            jobs.push(job("tool_log", async move {
                report("log", sink.record_tool_call(&entry).await);
            }));
        }

        if !self.pool.submit_all(jobs) {
            debug!(interaction_id, tool = %record.tool_name, "Tool call telemetry dropped");
        }
    }

    /// Queue a custom metric sample
    ///
    /// Returns false if metrics are disabled, there is no metric sink, or the
    /// job was dropped.
    pub fn record_custom_metric(&self, name: impl Into<String>, value: f64) -> bool {
        let (true, Some(sink)) = (self.config.metrics.enabled, &self.sinks.metric) else {
            return false;
        };
        let name = name.into();
        let sink = sink.clone();
        self.pool.submit(
            "custom_metric",
            async move {
                report("metric", sink.record_custom(&name, value).await);
            }
            .boxed(),
        )
    }

    /// Wait for queued telemetry, then write buffered dataset rows
    pub async fn flush(&self) -> FlushOutcome {
        if !self.pool.wait_for_idle(Some(self.config.worker.drain_timeout())).await {
            warn!(pending = self.pool.pending(), "Timed out waiting for telemetry jobs");
        }
        match &self.dataset {
            Some(buffer) => buffer.flush().await,
            None => FlushOutcome::default(),
        }
    }

    /// Drain the worker pool and close the dataset buffer
    ///
    /// Returns true if the pool drained before the timeout.
    pub async fn shutdown(&self) -> bool {
        let drained = self.pool.shutdown(self.config.worker.drain_timeout()).await;
        if let Some(buffer) = &self.dataset {
            let outcome = buffer.close().await;
            debug!(?outcome, "Dataset buffer closed");
        }
        drained
    }

    fn interaction_span_job(&self, interaction: &Interaction) -> Option<TelemetryJob> {
        let (true, Some(sink), Some(trace)) =
            (self.config.tracing.enabled, &self.sinks.trace, &interaction.trace)
        else {
            return None;
        };

        let mut attributes = Map::new();
        attributes.insert("interaction_id".to_string(), json!(interaction.interaction_id));
        attributes.insert("agent_name".to_string(), json!(self.agent_name));
        attributes.insert("method".to_string(), json!(interaction.method));
        if let Some(error) = &interaction.error {
            attributes.insert("error".to_string(), json!(true));
            attributes.insert("error.type".to_string(), json!(error.error_type));
            attributes.insert("error.message".to_string(), json!(error.message));
        }

        let span = SpanRecord {
            trace_id: trace.trace_id.clone(),
            span_id: trace.parent_span_id.clone(),
            parent_span_id: None,
            name: format!("agent.{}", interaction.method),
            start: interaction.started_at,
            end: interaction.ended_at,
            attributes,
        };
        let sink = sink.clone();
        Some(job("span", async move {
            report("trace", sink.send_span(&span).await);
        }))
    }

    fn interaction_log_job(&self, interaction: &Interaction) -> Option<TelemetryJob> {
        let (true, Some(sink)) = (self.config.logging.enabled, &self.sinks.log) else {
            return None;
        };
        let sink = sink.clone();

        let log_job = match &interaction.error {
            Some(error) => {
                let mut context = Map::new();
                context.insert("method".to_string(), json!(interaction.method));
                context.insert(
                    "input".to_string(),
                    json!(truncate_chars(&interaction.input_text(), MAX_ERROR_INPUT_CHARS)),
                );
                context.insert("duration_ms".to_string(), json!(interaction.duration_ms));

                let entry = ErrorLog {
                    interaction_id: interaction.interaction_id.clone(),
                    agent_name: self.agent_name.clone(),
                    timestamp: interaction.ended_at,
                    error: error.clone(),
                    context,
                };
                job("error_log", async move {
                    report("log", sink.record_error(&entry).await);
                })
            }
            None => {
                let entry = InteractionLog {
                    interaction_id: interaction.interaction_id.clone(),
                    agent_name: self.agent_name.clone(),
                    timestamp: interaction.ended_at,
                    input: interaction.input.clone(),
                    output: interaction.output.clone().unwrap_or_default(),
                    duration_ms: interaction.duration_ms,
                    metadata: interaction.metadata.clone(),
                    trajectory: self
                        .records_trajectories()
                        .then(|| interaction.trajectory.clone()),
                };
                job("log", async move {
                    report("log", sink.record(&entry).await);
                })
            }
        };
        Some(log_job)
    }

    fn interaction_metrics_job(&self, interaction: &Interaction) -> Option<TelemetryJob> {
        let (true, Some(sink)) = (self.config.metrics.enabled, &self.sinks.metric) else {
            return None;
        };
        let sink = sink.clone();

        let duration_ms = interaction.duration_ms;
        let error_type = interaction.error.as_ref().map(|e| e.error_type.clone());
        let tokens = token_counts(&interaction.metadata);

        Some(job("metrics", async move {
            report("metric", sink.record_latency(duration_ms).await);
            match error_type {
                Some(error_type) => report("metric", sink.record_error(&error_type).await),
                None => report("metric", sink.record_success().await),
            }
            if let Some((input_tokens, output_tokens)) = tokens {
                report("metric", sink.record_token_count(input_tokens, output_tokens).await);
            }
        }))
    }

    fn dataset_row_job(&self, interaction: &Interaction) -> Option<TelemetryJob> {
        let buffer = self.dataset.as_ref()?;
        if !sampled(self.config.dataset.sample_rate) {
            return None;
        }
        let row =
            DatasetRow::from_interaction(&self.agent_name, interaction, self.records_trajectories())?;

        let buffer = buffer.clone();
        Some(job("dataset", async move {
            buffer.add(row).await;
        }))
    }
}

impl std::fmt::Debug for TelemetryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryDispatcher")
            .field("agent_name", &self.agent_name)
            .field("sinks", &self.sinks)
            .field("accepting", &self.is_accepting())
            .field("dataset", &self.dataset.is_some())
            .finish()
    }
}

fn job<F>(label: &'static str, future: F) -> TelemetryJob
where
    F: Future<Output = ()> + Send + 'static,
{
    TelemetryJob::new(label, future.boxed())
}

fn token_counts(metadata: &Map<String, Value>) -> Option<(u64, u64)> {
    let input = metadata.get("input_tokens").and_then(Value::as_u64)?;
    let output = metadata.get("output_tokens").and_then(Value::as_u64)?;
    Some((input, output))
}

fn report(sink: &'static str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!(sink, "Telemetry sink failed: {:#}", e);
    }
}
