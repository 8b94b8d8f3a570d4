//! Evaluation wrapper: setup, method lookup and lifecycle.

use super::methods::{AsyncMethod, StreamMethod, SyncMethod};
use super::shape::{
    AgentMethod, AgentTarget, CallShape, ErrorClassifier, MethodBody, CONVENTIONAL_METHODS,
};
use super::tool_trace::ToolTracer;
use crate::config::EvaluationConfig;
use crate::dataset::FlushOutcome;
use crate::dispatch::TelemetryDispatcher;
use crate::error::{EvaluationError, Result};
use crate::telemetry::{
    short_type_name, DurableStore, LogSink, MetricSink, Sinks, TraceSink, TracingSink,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{self, Display};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Builder for [`EvaluationWrapper`]
pub struct EvaluationWrapperBuilder<I, O, E, C = O> {
    target: AgentTarget<I, O, E, C>,
    config: EvaluationConfig,
    sinks: Sinks,
    classify: Option<ErrorClassifier<E>>,
}

impl<I, O, E, C> EvaluationWrapperBuilder<I, O, E, C>
where
    I: Serialize + Send + 'static,
    O: Serialize + Send + 'static,
    E: Display + Send + 'static,
    C: Serialize + Send + 'static,
{
    /// Replace all sinks at once
    pub fn sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.log = Some(sink);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sinks.trace = Some(sink);
        self
    }

    pub fn metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.sinks.metric = Some(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.sinks.store = Some(store);
        self
    }

    /// Name errors for the `error.type` span attribute, error logs and metrics
    ///
    /// Without a classifier errors are named after `E`, which says little
    /// when `E` is a boxed trait object or `anyhow::Error`.
    pub fn error_type<F>(mut self, classify: F) -> Self
    where
        F: Fn(&E) -> String + Send + Sync + 'static,
    {
        self.classify = Some(Arc::new(classify));
        self
    }

    /// Probe the agent, start the dispatcher and instrument every conventional entry point
    ///
    /// Fails when the agent exposes none of [`CONVENTIONAL_METHODS`], when the
    /// configuration is invalid, or when called outside a tokio runtime.
    pub fn build(self) -> Result<EvaluationWrapper<I, O, E, C>> {
        let Self {
            target,
            mut config,
            sinks,
            classify,
        } = self;

        if config.agent_name.trim().is_empty() {
            config.agent_name = target.name().to_string();
        }

        let entry_points = target.conventional_methods();
        let Some(primary) = entry_points.first().map(|name| name.to_string()) else {
            return Err(EvaluationError::ConfigError(format!(
                "agent '{}' exposes none of the supported entry points ({})",
                target.name(),
                CONVENTIONAL_METHODS.join(", ")
            )));
        };

        let dispatcher = Arc::new(TelemetryDispatcher::start(&config, sinks)?);

        let classify = classify.unwrap_or_else(|| Arc::new(|_: &E| short_type_name::<E>()));

        let wrapper = EvaluationWrapper {
            target,
            instrumented: RwLock::new(HashSet::new()),
            classify,
            primary,
            dispatcher,
            shutdown_done: tokio::sync::Mutex::new(false),
        };

        for name in &entry_points {
            wrapper.instrument(name)?;
        }
        for name in wrapper.target.method_names() {
            if !wrapper.is_instrumented(name) {
                debug!(method = name, "Leaving non-conventional method uninstrumented");
            }
        }

        info!(
            agent = %config.agent_name,
            primary = %wrapper.primary,
            methods = ?entry_points,
            logging = config.logging.enabled,
            tracing = config.tracing.enabled,
            trace_sample_rate = config.tracing.sample_rate,
            metrics = config.metrics.enabled,
            dataset = wrapper.dispatcher.dataset().is_some(),
            "Evaluation enabled"
        );

        Ok(wrapper)
    }
}

/// An agent with evaluation instrumentation attached
///
/// Hands out instrumented handles for the agent's methods and owns the
/// telemetry pipeline. Call [`shutdown`](Self::shutdown) before exiting so
/// queued telemetry and buffered dataset rows are written.
///
/// # Examples
///
/// ```ignore
/// let wrapper = EvaluationWrapper::builder(target, config)
///     .sinks(Sinks::all(recording.clone()))
///     .build()?;
///
/// let answer = wrapper.sync_method("generate_content")?.call("hello".to_string())?;
/// wrapper.shutdown().await;
/// ```
pub struct EvaluationWrapper<I, O, E, C = O> {
    target: AgentTarget<I, O, E, C>,
    instrumented: RwLock<HashSet<String>>,
    classify: ErrorClassifier<E>,
    primary: String,
    dispatcher: Arc<TelemetryDispatcher>,
    shutdown_done: tokio::sync::Mutex<bool>,
}

impl<I, O, E, C> EvaluationWrapper<I, O, E, C>
where
    I: Serialize + Send + 'static,
    O: Serialize + Send + 'static,
    E: Display + Send + 'static,
    C: Serialize + Send + 'static,
{
    pub fn builder(
        target: AgentTarget<I, O, E, C>,
        config: EvaluationConfig,
    ) -> EvaluationWrapperBuilder<I, O, E, C> {
        EvaluationWrapperBuilder {
            target,
            config,
            sinks: Sinks::new(),
            classify: None,
        }
    }

    /// The wrapped agent, for calling methods without instrumentation
    pub fn target(&self) -> &AgentTarget<I, O, E, C> {
        &self.target
    }

    pub fn config(&self) -> &EvaluationConfig {
        self.dispatcher.config()
    }

    /// Name of the highest-priority conventional entry point
    pub fn primary_method(&self) -> &str {
        &self.primary
    }

    pub fn primary_shape(&self) -> Option<CallShape> {
        self.target.method(&self.primary).map(AgentMethod::shape)
    }

    pub fn is_instrumented(&self, name: &str) -> bool {
        self.instrumented
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    /// Instrumented method names in the agent's registration order
    pub fn instrumented_methods(&self) -> Vec<String> {
        self.target
            .method_names()
            .filter(|name| self.is_instrumented(name))
            .map(str::to_string)
            .collect()
    }

    /// Instrument a method of the wrapped agent by name
    ///
    /// The method table is fixed once wrapped, so a name identifies one
    /// method. Returns `Ok(false)` if the method is already instrumented.
    pub fn instrument(&self, name: &str) -> Result<bool> {
        let method = self
            .target
            .method(name)
            .ok_or_else(|| EvaluationError::UnknownMethod(name.to_string()))?;

        let mut instrumented = self.instrumented.write().unwrap_or_else(PoisonError::into_inner);
        if !instrumented.insert(name.to_string()) {
            debug!(method = name, "Method already instrumented");
            return Ok(false);
        }
        debug!(method = name, shape = %method.shape(), "Instrumented method");
        Ok(true)
    }

    pub fn sync_method(&self, name: &str) -> Result<SyncMethod<I, O, E>> {
        let method = self.lookup(name)?;
        match method.body() {
            MethodBody::Sync(func) => Ok(SyncMethod::new(
                name,
                func.clone(),
                self.classify.clone(),
                self.dispatcher.clone(),
            )),
            _ => Err(mismatch(name, CallShape::Sync, method.shape())),
        }
    }

    pub fn async_method(&self, name: &str) -> Result<AsyncMethod<I, O, E>> {
        let method = self.lookup(name)?;
        match method.body() {
            MethodBody::AsyncSingle(func) => {
                Ok(AsyncMethod::new(
                    name,
                    func.clone(),
                    self.classify.clone(),
                    self.dispatcher.clone(),
                ))
            }
            _ => Err(mismatch(name, CallShape::AsyncSingle, method.shape())),
        }
    }

    pub fn stream_method(&self, name: &str) -> Result<StreamMethod<I, C, E>> {
        let method = self.lookup(name)?;
        match method.body() {
            MethodBody::AsyncStream(func) => {
                Ok(StreamMethod::new(
                    name,
                    func.clone(),
                    self.classify.clone(),
                    self.dispatcher.clone(),
                ))
            }
            _ => Err(mismatch(name, CallShape::AsyncStream, method.shape())),
        }
    }

    /// Recorder for a tool called from inside instrumented methods
    pub fn tool_trace(&self, tool_name: impl AsRef<str>) -> ToolTracer {
        ToolTracer::new(tool_name)
    }

    /// Queue a custom metric sample; false if it was not queued
    pub fn record_custom_metric(&self, name: impl Into<String>, value: f64) -> bool {
        self.dispatcher.record_custom_metric(name, value)
    }

    /// Wait for queued telemetry and write buffered dataset rows
    pub async fn flush(&self) -> FlushOutcome {
        self.dispatcher.flush().await
    }

    /// Drain telemetry, close the dataset buffer and stop accepting work
    ///
    /// Concurrent and repeated calls are safe; only the first does any work.
    /// Returns false if the drain timed out and some telemetry was abandoned.
    pub async fn shutdown(&self) -> bool {
        let mut done = self.shutdown_done.lock().await;
        if *done {
            return true;
        }

        let drained = self.dispatcher.shutdown().await;
        *done = true;
        info!(agent = %self.dispatcher.agent_name(), drained, "Evaluation shut down");
        drained
    }

    pub fn is_shut_down(&self) -> bool {
        !self.dispatcher.is_accepting()
    }

    pub(crate) fn dispatcher(&self) -> &Arc<TelemetryDispatcher> {
        &self.dispatcher
    }

    fn lookup(&self, name: &str) -> Result<&AgentMethod<I, O, E, C>> {
        let method = self
            .target
            .method(name)
            .ok_or_else(|| EvaluationError::UnknownMethod(name.to_string()))?;

        if !self.is_instrumented(name) {
            return Err(EvaluationError::ConfigError(format!(
                "method '{}' is not instrumented",
                name
            )));
        }
        Ok(method)
    }
}

impl<I, O, E, C> fmt::Debug for EvaluationWrapper<I, O, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationWrapper")
            .field("target", &self.target)
            .field("primary", &self.primary)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn mismatch(name: &str, expected: CallShape, actual: CallShape) -> EvaluationError {
    EvaluationError::ShapeMismatch {
        name: name.to_string(),
        expected: expected.as_str(),
        actual: actual.as_str(),
    }
}

/// Instrument an agent with logs, traces and metrics emitted as `tracing` events
///
/// Dataset collection needs a durable store; use
/// [`EvaluationWrapper::builder`] to supply one.
pub fn enable_evaluation<I, O, E, C>(
    target: AgentTarget<I, O, E, C>,
    config: EvaluationConfig,
) -> Result<EvaluationWrapper<I, O, E, C>>
where
    I: Serialize + Send + 'static,
    O: Serialize + Send + 'static,
    E: Display + Send + 'static,
    C: Serialize + Send + 'static,
{
    let agent_name = if config.agent_name.trim().is_empty() {
        target.name().to_string()
    } else {
        config.agent_name.clone()
    };
    let sink = Arc::new(TracingSink::new(agent_name));

    EvaluationWrapper::builder(target, config)
        .log_sink(sink.clone())
        .trace_sink(sink.clone())
        .metric_sink(sink)
        .build()
}
