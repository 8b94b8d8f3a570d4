//! Off-critical-path telemetry delivery.
//!
//! [`TelemetryDispatcher`] turns finished interactions into sink jobs and runs
//! them on a bounded [`WorkerPool`].

pub mod dispatcher;
pub mod worker_pool;

pub use dispatcher::TelemetryDispatcher;
pub use worker_pool::{TelemetryJob, WorkerPool};
