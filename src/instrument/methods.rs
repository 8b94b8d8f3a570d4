//! Instrumented method handles, one per call shape.
//!
//! Each handle calls through to the original method with a fresh
//! [`CallContext`](crate::context::CallContext) and returns exactly what the
//! method returned. Telemetry is handed to the dispatcher once the call (or, for
//! streams, the whole stream) has completed. Errors are named for telemetry by
//! the wrapper's [`ErrorClassifier`].

use super::scope::{to_json, InteractionScope};
use super::shape::{AsyncFn, ErrorClassifier, StreamFn, SyncFn};
use crate::dispatch::TelemetryDispatcher;
use crate::telemetry::ErrorInfo;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Handle to an instrumented synchronous method
pub struct SyncMethod<I, O, E> {
    name: Arc<str>,
    func: SyncFn<I, O, E>,
    classify: ErrorClassifier<E>,
    dispatcher: Arc<TelemetryDispatcher>,
}

/// Handle to an instrumented single-shot async method
pub struct AsyncMethod<I, O, E> {
    name: Arc<str>,
    func: AsyncFn<I, O, E>,
    classify: ErrorClassifier<E>,
    dispatcher: Arc<TelemetryDispatcher>,
}

/// Handle to an instrumented streaming method
pub struct StreamMethod<I, O, E> {
    name: Arc<str>,
    func: StreamFn<I, O, E>,
    classify: ErrorClassifier<E>,
    dispatcher: Arc<TelemetryDispatcher>,
}

impl<I, O, E> SyncMethod<I, O, E>
where
    I: Serialize,
    O: Serialize,
    E: Display,
{
    pub(crate) fn new(
        name: &str,
        func: SyncFn<I, O, E>,
        classify: ErrorClassifier<E>,
        dispatcher: Arc<TelemetryDispatcher>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            func,
            classify,
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, input: I) -> Result<O, E> {
        let scope = InteractionScope::begin(&self.dispatcher, &self.name, to_json(&input));
        let result = (self.func)(input, scope.context());
        match &result {
            Ok(response) => scope.succeed(&to_json(response)),
            Err(error) => scope.fail(describe(&self.classify, error)),
        }
        result
    }
}

impl<I, O, E> AsyncMethod<I, O, E>
where
    I: Serialize,
    O: Serialize,
    E: Display,
{
    pub(crate) fn new(
        name: &str,
        func: AsyncFn<I, O, E>,
        classify: ErrorClassifier<E>,
        dispatcher: Arc<TelemetryDispatcher>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            func,
            classify,
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Await the original method
    ///
    /// Dropping the returned future before it completes still dispatches the
    /// interaction, as a `Cancelled` error.
    pub async fn call(&self, input: I) -> Result<O, E> {
        let scope = InteractionScope::begin(&self.dispatcher, &self.name, to_json(&input));
        let result = (self.func)(input, scope.context()).await;
        match &result {
            Ok(response) => scope.succeed(&to_json(response)),
            Err(error) => scope.fail(describe(&self.classify, error)),
        }
        result
    }
}

impl<I, O, E> StreamMethod<I, O, E>
where
    I: Serialize + Send + 'static,
    O: Serialize + Send + 'static,
    E: Display + Send + 'static,
{
    pub(crate) fn new(
        name: &str,
        func: StreamFn<I, O, E>,
        classify: ErrorClassifier<E>,
        dispatcher: Arc<TelemetryDispatcher>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            func,
            classify,
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stream the original method's items unchanged
    ///
    /// The interaction starts on first poll and is dispatched once the stream
    /// is exhausted, with the last successful item as output. If any item was
    /// an error the interaction is recorded as failed with the first error.
    pub fn call(&self, input: I) -> BoxStream<'static, Result<O, E>> {
        let name = self.name.clone();
        let func = self.func.clone();
        let classify = self.classify.clone();
        let dispatcher = self.dispatcher.clone();

        async_stream::stream! {
            let scope = InteractionScope::begin(&dispatcher, &name, to_json(&input));
            let mut items = func(input, scope.context());
            let mut last: Option<Value> = None;
            let mut first_error: Option<ErrorInfo> = None;

            while let Some(item) = items.next().await {
                match &item {
                    Ok(response) => last = Some(to_json(response)),
                    Err(error) => {
                        if first_error.is_none() {
                            first_error = Some(describe(&classify, error));
                        }
                    }
                }
                yield item;
            }

            match first_error {
                Some(error) => scope.fail(error),
                None => scope.succeed(&last.unwrap_or_else(|| Value::String(String::new()))),
            }
        }
        .boxed()
    }
}

fn describe<E: Display>(classify: &ErrorClassifier<E>, error: &E) -> ErrorInfo {
    ErrorInfo::new(classify(error), error.to_string())
}

macro_rules! method_handle_impls {
    ($($handle:ident),*) => {$(
        impl<I, O, E> Clone for $handle<I, O, E> {
            fn clone(&self) -> Self {
                Self {
                    name: self.name.clone(),
                    func: self.func.clone(),
                    classify: self.classify.clone(),
                    dispatcher: self.dispatcher.clone(),
                }
            }
        }

        impl<I, O, E> fmt::Debug for $handle<I, O, E> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($handle)).field("name", &self.name).finish()
            }
        }
    )*};
}

method_handle_impls!(SyncMethod, AsyncMethod, StreamMethod);
