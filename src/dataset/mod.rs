//! Evaluation dataset capture.
//!
//! Successful interactions become [`DatasetRow`]s which the [`DatasetBuffer`]
//! batches into a [`DurableStore`](crate::telemetry::DurableStore).

pub mod buffer;
pub mod row;

pub use buffer::{DatasetBuffer, FlushOutcome};
pub use row::DatasetRow;
