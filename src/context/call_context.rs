//! Per-call context handed to instrumented agent methods.
//!
//! Every call through an instrumented method creates a [`CallContext`] and
//! passes it to the wrapped callable as an argument. The callable forwards it
//! to its tools (see [`ToolTracer`](crate::instrument::ToolTracer)), which use it
//! to append to the call's trajectory and to parent their trace spans. Clones
//! share state, so a tool executed on another thread or task records into the
//! same interaction.
//!
//! When the outer call completes the context is closed: the trace scope is
//! cleared, the trajectory is taken, and later tool calls through any
//! surviving clone run unrecorded.

use super::trace_context::{TraceContext, TraceScope};
use crate::dispatch::TelemetryDispatcher;
use crate::telemetry::ToolCallRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

struct CallState {
    interaction_id: String,
    trace: TraceScope,
    trajectory: Option<Mutex<Vec<ToolCallRecord>>>,
    active: AtomicBool,
    dispatcher: Arc<TelemetryDispatcher>,
}

/// Explicit correlation context for one outer call
#[derive(Clone, Default)]
pub struct CallContext {
    state: Option<Arc<CallState>>,
}

impl CallContext {
    /// A context that belongs to no interaction
    ///
    /// Tools run under a detached context execute normally but record nothing.
    pub fn detached() -> Self {
        Self { state: None }
    }

    pub(crate) fn begin(
        interaction_id: String,
        trace: Option<TraceContext>,
        record_trajectory: bool,
        dispatcher: Arc<TelemetryDispatcher>,
    ) -> Self {
        let scope = TraceScope::new();
        if let Some(context) = trace {
            scope.set(context);
        }

        Self {
            state: Some(Arc::new(CallState {
                interaction_id,
                trace: scope,
                trajectory: record_trajectory.then(|| Mutex::new(Vec::new())),
                active: AtomicBool::new(true),
                dispatcher,
            })),
        }
    }

    /// Interaction id while the outer call is running
    pub fn interaction_id(&self) -> Option<&str> {
        self.live().map(|state| state.interaction_id.as_str())
    }

    /// Active trace context, if tracing is on for this call
    pub fn trace(&self) -> Option<TraceContext> {
        self.live().and_then(|state| state.trace.current())
    }

    pub fn is_active(&self) -> bool {
        self.live().is_some()
    }

    /// Tool calls recorded so far
    pub fn trajectory(&self) -> Vec<ToolCallRecord> {
        self.live()
            .and_then(|state| state.trajectory.as_ref())
            .map(|t| t.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .unwrap_or_default()
    }

    pub(crate) fn dispatcher(&self) -> Option<&Arc<TelemetryDispatcher>> {
        self.live().map(|state| &state.dispatcher)
    }

    /// Append to the trajectory; returns false when nothing was recorded
    pub(crate) fn record_tool_call(&self, record: ToolCallRecord) -> bool {
        match self.live().and_then(|state| state.trajectory.as_ref()) {
            Some(trajectory) => {
                trajectory.lock().unwrap_or_else(PoisonError::into_inner).push(record);
                true
            }
            None => false,
        }
    }

    /// Close the context and hand back the trajectory
    pub(crate) fn finish(&self) -> Vec<ToolCallRecord> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        state.active.store(false, Ordering::SeqCst);
        state.trace.clear();
        state
            .trajectory
            .as_ref()
            .map(|t| std::mem::take(&mut *t.lock().unwrap_or_else(PoisonError::into_inner)))
            .unwrap_or_default()
    }

    fn live(&self) -> Option<&CallState> {
        self.state
            .as_deref()
            .filter(|state| state.active.load(Ordering::SeqCst))
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("interaction_id", &self.interaction_id())
            .field("trace", &self.trace())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationConfig;
    use crate::telemetry::Sinks;
    use chrono::Utc;

    fn record(name: &str) -> ToolCallRecord {
        ToolCallRecord {
            tool_name: name.to_string(),
            duration_ms: 1.0,
            timestamp: Utc::now(),
            error: None,
        }
    }

    async fn dispatcher() -> Arc<TelemetryDispatcher> {
        let config = EvaluationConfig::default_for("proj", "agent");
        Arc::new(TelemetryDispatcher::start(&config, Sinks::new()).unwrap())
    }

    #[test]
    fn test_detached_context_records_nothing() {
        let context = CallContext::detached();
        assert!(!context.is_active());
        assert!(context.interaction_id().is_none());
        assert!(context.trace().is_none());
        assert!(!context.record_tool_call(record("search")));
        assert!(context.finish().is_empty());
    }

    #[tokio::test]
    async fn test_trajectory_shared_between_clones() {
        let context = CallContext::begin("i-1".to_string(), None, true, dispatcher().await);
        let clone = context.clone();

        assert!(clone.record_tool_call(record("search")));
        assert!(context.record_tool_call(record("calculator")));

        let names: Vec<String> = context.trajectory().into_iter().map(|r| r.tool_name).collect();
        assert_eq!(names, vec!["search", "calculator"]);
    }

    #[tokio::test]
    async fn test_trajectory_disabled() {
        let context = CallContext::begin("i-1".to_string(), None, false, dispatcher().await);
        assert!(context.is_active());
        assert!(!context.record_tool_call(record("search")));
    }

    #[tokio::test]
    async fn test_finish_clears_everything() {
        let trace = TraceContext::generate();
        let context =
            CallContext::begin("i-1".to_string(), Some(trace.clone()), true, dispatcher().await);
        let leaked = context.clone();

        assert_eq!(leaked.trace(), Some(trace));
        leaked.record_tool_call(record("search"));

        let trajectory = context.finish();
        assert_eq!(trajectory.len(), 1);

        assert!(!leaked.is_active());
        assert!(leaked.trace().is_none());
        assert!(leaked.interaction_id().is_none());
        assert!(!leaked.record_tool_call(record("late")));
    }

    #[tokio::test]
    async fn test_context_visible_from_spawned_task() {
        let trace = TraceContext::generate();
        let context =
            CallContext::begin("i-9".to_string(), Some(trace.clone()), true, dispatcher().await);
        let clone = context.clone();

        let seen = tokio::spawn(async move { clone.trace() }).await.unwrap();
        assert_eq!(seen, Some(trace));
    }
}
