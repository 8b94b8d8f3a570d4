//! Error types and result aliases for the agent evaluation library.
//!
//! This module defines [`EvaluationError`] and the [`Result`] alias used by the
//! setup and lifecycle APIs. Errors raised by a wrapped agent method are never
//! converted into this type: they are handed back to the caller unchanged.
//! Errors raised by telemetry sinks are `anyhow::Error`s that are logged and
//! dropped.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Method '{name}' is {actual}, not {expected}")]
    ShapeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EvaluationError>;
