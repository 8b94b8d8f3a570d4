//! Lifetime of one instrumented call.

use super::extract::{extract_metadata, extract_output};
use crate::context::{CallContext, TraceContext};
use crate::dispatch::TelemetryDispatcher;
use crate::telemetry::{ErrorInfo, Interaction};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Tracks an outer call from entry to dispatch.
///
/// Exactly one interaction is dispatched per scope. If the scope is dropped
/// before `succeed`/`fail` (the caller dropped the future or stream, or the
/// callable panicked) the interaction is dispatched as a `Cancelled` or `Panic`
/// error. The call context is closed in every case.
pub(crate) struct InteractionScope {
    dispatcher: Arc<TelemetryDispatcher>,
    context: CallContext,
    interaction_id: String,
    method: String,
    input: Value,
    trace: Option<TraceContext>,
    started_at: DateTime<Utc>,
    start: Instant,
    finished: bool,
}

impl InteractionScope {
    pub(crate) fn begin(dispatcher: &Arc<TelemetryDispatcher>, method: &str, input: Value) -> Self {
        let interaction_id = Uuid::new_v4().to_string();
        let trace = dispatcher.begin_trace();
        let context = CallContext::begin(
            interaction_id.clone(),
            trace.clone(),
            dispatcher.records_trajectories(),
            dispatcher.clone(),
        );

        Self {
            dispatcher: dispatcher.clone(),
            context,
            interaction_id,
            method: method.to_string(),
            input,
            trace,
            started_at: Utc::now(),
            start: Instant::now(),
            finished: false,
        }
    }

    /// Context to hand to the wrapped callable
    pub(crate) fn context(&self) -> CallContext {
        self.context.clone()
    }

    pub(crate) fn succeed(mut self, response: &Value) {
        let output = extract_output(response);
        let metadata = extract_metadata(response);
        self.complete(Some(output), metadata, None);
    }

    pub(crate) fn fail(mut self, error: ErrorInfo) {
        self.complete(None, Map::new(), Some(error));
    }

    fn complete(
        &mut self,
        output: Option<String>,
        metadata: Map<String, Value>,
        error: Option<ErrorInfo>,
    ) {
        self.finished = true;
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let trajectory = self.context.finish();

        let interaction = Interaction {
            interaction_id: self.interaction_id.clone(),
            method: self.method.clone(),
            input: std::mem::take(&mut self.input),
            output,
            duration_ms,
            metadata,
            trajectory,
            error,
            started_at: self.started_at,
            ended_at: Utc::now(),
            trace: self.trace.take(),
        };
        self.dispatcher.dispatch_interaction(interaction);
    }
}

impl Drop for InteractionScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let (error_type, message) = if std::thread::panicking() {
            ("Panic", "agent method panicked")
        } else {
            ("Cancelled", "call was dropped before completion")
        };
        debug!(interaction_id = %self.interaction_id, method = %self.method, "{}", message);
        self.complete(None, Map::new(), Some(ErrorInfo::new(error_type, message)));
    }
}

/// Serialize a payload for telemetry; never fails
pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        debug!("Payload not serializable for telemetry: {}", e);
        Value::String(format!("<unserializable: {}>", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationConfig;
    use crate::telemetry::{RecordingSink, Sinks};
    use serde_json::json;

    async fn dispatcher(sink: &Arc<RecordingSink>) -> Arc<TelemetryDispatcher> {
        let config = EvaluationConfig::default_for("proj", "agent");
        Arc::new(TelemetryDispatcher::start(&config, Sinks::all(sink.clone())).unwrap())
    }

    #[tokio::test]
    async fn test_success_extracts_output() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&sink).await;

        let scope = InteractionScope::begin(&dispatcher, "run", json!("question"));
        let context = scope.context();
        assert!(context.is_active());
        assert!(context.trace().is_some());

        scope.succeed(&json!({"text": "answer", "model": "m"}));
        assert!(!context.is_active());
        dispatcher.flush().await;

        let logs = sink.interactions();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].input, json!("question"));
        assert_eq!(logs[0].output, "answer");
        assert_eq!(logs[0].metadata["model"], "m");
    }

    #[tokio::test]
    async fn test_dropped_scope_is_cancelled() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(&sink).await;

        let scope = InteractionScope::begin(&dispatcher, "run_async", json!("question"));
        let context = scope.context();
        drop(scope);

        assert!(context.trace().is_none());
        dispatcher.flush().await;

        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error.error_type, "Cancelled");
    }

    #[test]
    fn test_to_json_never_fails() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(vec![1u8], "byte keys are not valid JSON object keys");
        assert!(matches!(to_json(&map), Value::String(s) if s.starts_with("<unserializable")));
        assert_eq!(to_json("plain"), json!("plain"));
    }
}
