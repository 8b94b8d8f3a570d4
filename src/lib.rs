//! Evaluation instrumentation for AI agents.
//!
//! Wrap an agent's entry points to get structured logs, distributed traces,
//! metrics and an evaluation dataset without touching its logic. Telemetry is
//! shipped by a bounded background worker pool, so callers never wait on a
//! sink.
//!
//! ```ignore
//! use agent_evaluation::prelude::*;
//!
//! let target = AgentTarget::new("support-agent")
//!     .with_method("generate_content", AgentMethod::sync(|prompt: String, ctx| answer(prompt, ctx)));
//!
//! let wrapper = enable_evaluation(target, EvaluationConfig::from_env("my-project", "support-agent")?)?;
//! let reply = wrapper.sync_method("generate_content")?.call("Hello!".to_string());
//! wrapper.shutdown().await;
//! ```

pub mod config;
pub mod context;
pub mod dataset;
pub mod dispatch;
pub mod error;
pub mod instrument;
pub mod telemetry;

pub use config::EvaluationConfig;
pub use error::{EvaluationError, Result};
pub use instrument::{enable_evaluation, EvaluationWrapper};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::EvaluationConfig;
    pub use crate::context::CallContext;
    pub use crate::error::{EvaluationError, Result};
    pub use crate::instrument::{
        enable_evaluation, tool_trace, AgentMethod, AgentTarget, CallShape, EvaluationWrapper,
        ToolTracer,
    };
    pub use crate::telemetry::{
        init_tracing, DurableStore, LogSink, MetricSink, RecordingSink, Sinks, TraceSink,
        TracingSink,
    };
}
