//! Trace correlation identifiers.
//!
//! A [`TraceContext`] pairs the trace id of one outer call with the span id of
//! that call's own span, which nested tool spans use as their parent. The
//! [`TraceScope`] holding it is shared by every clone of the owning
//! [`CallContext`](super::CallContext), so a tool running on another thread or
//! task sees the same context, and clearing it is visible everywhere at once.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Correlation identifiers for one outer call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceContext {
    /// 32 lowercase hex characters
    pub trace_id: String,
    /// 16 lowercase hex characters; the outer call's span id
    pub parent_span_id: String,
}

impl TraceContext {
    /// Generate a fresh trace id and root span id
    pub fn generate() -> Self {
        Self {
            trace_id: new_trace_id(),
            parent_span_id: new_span_id(),
        }
    }
}

/// A new 32-hex-character trace id
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A new 16-hex-character span id
pub fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Decide whether an event falls inside a sampling `rate` in `[0, 1]`
pub fn sampled(rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    let roll = (Uuid::new_v4().as_u128() >> 64) as u64;
    (roll as f64 / u64::MAX as f64) < rate
}

/// Shared slot holding the active trace context of one outer call
#[derive(Debug, Clone, Default)]
pub struct TraceScope {
    slot: Arc<RwLock<Option<TraceContext>>>,
}

impl TraceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a context, make it current, and return it
    pub fn begin(&self) -> TraceContext {
        let context = TraceContext::generate();
        self.set(context.clone());
        context
    }

    pub(crate) fn set(&self, context: TraceContext) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(context);
    }

    pub fn current(&self) -> Option<TraceContext> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Drop the context for every holder of this scope
    pub fn clear(&self) {
        self.slot.write().unwrap_or_else(PoisonError::into_inner).take();
    }
}
