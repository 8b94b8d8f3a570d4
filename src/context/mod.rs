//! Correlation context for instrumented calls.
//!
//! - [`TraceContext`] / [`TraceScope`]: trace and parent span ids for one outer call
//! - [`CallContext`]: the explicit per-call handle passed to agent methods and tools

pub mod call_context;
pub mod trace_context;

pub use call_context::CallContext;
pub use trace_context::{new_span_id, new_trace_id, sampled, TraceContext, TraceScope};
