//! Nested tool-call recording.
//!
//! A [`ToolTracer`] runs a tool under the [`CallContext`] of the outer call. The
//! tool's result is returned untouched; as a side effect the call is appended to
//! the outer interaction's trajectory and, when the call is traced, a
//! `tool.<name>` span is emitted as a child of the outer span.

use crate::context::CallContext;
use crate::telemetry::{truncate_chars, ToolCallRecord, MAX_ERROR_MESSAGE_CHARS};
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Records calls to one named tool
///
/// # Examples
///
/// ```ignore
/// let search = ToolTracer::new("search");
/// let hits = search.call(&ctx, || index.lookup(&query))?;
/// let page = search.call_async(&ctx, fetch(url)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ToolTracer {
    tool_name: Arc<str>,
}

impl ToolTracer {
    pub fn new(tool_name: impl AsRef<str>) -> Self {
        Self {
            tool_name: Arc::from(tool_name.as_ref()),
        }
    }

    pub fn name(&self) -> &str {
        &self.tool_name
    }

    /// Run a synchronous tool
    pub fn call<T, E, F>(&self, context: &CallContext, tool: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = tool();
        self.record(context, started_at, start, result.as_ref().err());
        result
    }

    /// Await an asynchronous tool
    pub async fn call_async<T, E, Fut>(&self, context: &CallContext, tool: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let result = tool.await;
        self.record(context, started_at, start, result.as_ref().err());
        result
    }

    /// Turn a tool function into a traced function with the same signature
    pub fn wrap<A, T, E, F>(&self, context: CallContext, tool: F) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        E: Display,
    {
        let tracer = self.clone();
        move |arg| tracer.call(&context, || tool(arg))
    }

    fn record<E: Display>(
        &self,
        context: &CallContext,
        started_at: DateTime<Utc>,
        start: Instant,
        error: Option<&E>,
    ) {
        let (Some(interaction_id), Some(dispatcher)) =
            (context.interaction_id(), context.dispatcher())
        else {
            debug!(tool = %self.tool_name, "No active interaction, tool call not recorded");
            return;
        };

        let record = ToolCallRecord {
            tool_name: self.tool_name.to_string(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
            error: error.map(|e| truncate_chars(&e.to_string(), MAX_ERROR_MESSAGE_CHARS)),
        };

        context.record_tool_call(record.clone());
        dispatcher.dispatch_tool_call(interaction_id, context.trace().as_ref(), &record, started_at);
    }
}

/// Start recording calls to `tool_name`
pub fn tool_trace(tool_name: impl AsRef<str>) -> ToolTracer {
    ToolTracer::new(tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_tool_still_runs() {
        let tracer = tool_trace("calculator");
        let context = CallContext::detached();

        let ok: Result<i32, String> = tracer.call(&context, || Ok(2 + 2));
        let err: Result<i32, String> = tracer.call(&context, || Err("divide by zero".to_string()));

        assert_eq!(ok, Ok(4));
        assert_eq!(err, Err("divide by zero".to_string()));
        assert!(context.trajectory().is_empty());
    }

    #[test]
    fn test_wrap_keeps_signature() {
        let tracer = ToolTracer::new("double");
        let double = tracer.wrap(CallContext::detached(), |x: i32| Ok::<_, String>(x * 2));

        assert_eq!(double(21), Ok(42));
        assert_eq!(tracer.name(), "double");
    }

    #[test]
    fn test_detached_async_tool() {
        let tracer = ToolTracer::new("fetch");
        let result: Result<&str, String> = tokio_test::block_on(
            tracer.call_async(&CallContext::detached(), async { Ok("page") }),
        );
        assert_eq!(result, Ok("page"));
    }
}
