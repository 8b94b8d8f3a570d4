//! Instrumentation of agent methods.
//!
//! - [`shape`]: the agent method table and its call shapes
//! - [`EvaluationWrapper`]: setup, instrumented method handles and lifecycle
//! - [`ToolTracer`]: trajectory and span recording for nested tool calls
//! - [`extract`]: best-effort output and metadata extraction

pub mod extract;
pub mod methods;
mod scope;
pub mod shape;
pub mod tool_trace;
pub mod wrapper;

pub use extract::{extract_metadata, extract_output};
pub use methods::{AsyncMethod, StreamMethod, SyncMethod};
pub use shape::{
    AgentMethod, AgentTarget, CallShape, ErrorClassifier, MethodBody, CONVENTIONAL_METHODS,
};
pub use tool_trace::{tool_trace, ToolTracer};
pub use wrapper::{enable_evaluation, EvaluationWrapper, EvaluationWrapperBuilder};
