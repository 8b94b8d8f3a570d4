//! Agent method table and call shapes.
//!
//! An agent is described as an [`AgentTarget`]: a name plus named methods, each
//! an [`AgentMethod`] tagged with the way it is called. Every method receives
//! the caller's input and a [`CallContext`] to forward to its tools.
//!
//! Single-shot methods resolve to `O`; streaming methods yield chunks of `C`,
//! which defaults to `O` for agents whose chunks and responses share a type.

use crate::context::CallContext;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Entry-point names probed at setup, in priority order
pub const CONVENTIONAL_METHODS: [&str; 5] =
    ["run_async", "generate_content_stream", "generate_content", "run", "call"];

/// How a method is invoked and how its result is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// Plain function returning a result
    Sync,
    /// Future resolving to a single result
    AsyncSingle,
    /// Stream yielding results until exhausted
    AsyncStream,
}

impl CallShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::Sync => "sync",
            CallShape::AsyncSingle => "async",
            CallShape::AsyncStream => "stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SyncFn<I, O, E> = Arc<dyn Fn(I, CallContext) -> Result<O, E> + Send + Sync>;
pub type AsyncFn<I, O, E> =
    Arc<dyn Fn(I, CallContext) -> BoxFuture<'static, Result<O, E>> + Send + Sync>;
pub type StreamFn<I, O, E> =
    Arc<dyn Fn(I, CallContext) -> BoxStream<'static, Result<O, E>> + Send + Sync>;

/// Names an error for the `error.type` span attribute and error metrics
pub type ErrorClassifier<E> = Arc<dyn Fn(&E) -> String + Send + Sync>;

/// A method body tagged with its shape
pub enum MethodBody<I, O, E, C = O> {
    Sync(SyncFn<I, O, E>),
    AsyncSingle(AsyncFn<I, O, E>),
    AsyncStream(StreamFn<I, C, E>),
}

impl<I, O, E, C> Clone for MethodBody<I, O, E, C> {
    fn clone(&self) -> Self {
        match self {
            MethodBody::Sync(f) => MethodBody::Sync(f.clone()),
            MethodBody::AsyncSingle(f) => MethodBody::AsyncSingle(f.clone()),
            MethodBody::AsyncStream(f) => MethodBody::AsyncStream(f.clone()),
        }
    }
}

/// One callable entry point of an agent
///
/// # Examples
///
/// ```ignore
/// let echo = AgentMethod::sync(|input: String, _ctx| Ok::<_, AgentError>(input));
/// let answer = AgentMethod::future(|input: String, ctx| async move { agent.answer(input, ctx).await });
/// let chunks = AgentMethod::stream(|input: String, ctx| agent.chunks(input, ctx));
/// ```
pub struct AgentMethod<I, O, E, C = O> {
    body: MethodBody<I, O, E, C>,
}

impl<I, O, E, C> AgentMethod<I, O, E, C> {
    pub fn sync<F>(func: F) -> Self
    where
        F: Fn(I, CallContext) -> Result<O, E> + Send + Sync + 'static,
    {
        Self::from_body(MethodBody::Sync(Arc::new(func)))
    }

    pub fn future<F, Fut>(func: F) -> Self
    where
        F: Fn(I, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        Self::from_body(MethodBody::AsyncSingle(Arc::new(move |input, context| {
            func(input, context).boxed()
        })))
    }

    pub fn stream<F, S>(func: F) -> Self
    where
        F: Fn(I, CallContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<C, E>> + Send + 'static,
    {
        Self::from_body(MethodBody::AsyncStream(Arc::new(move |input, context| {
            func(input, context).boxed()
        })))
    }

    pub fn from_body(body: MethodBody<I, O, E, C>) -> Self {
        Self { body }
    }

    pub fn shape(&self) -> CallShape {
        match self.body {
            MethodBody::Sync(_) => CallShape::Sync,
            MethodBody::AsyncSingle(_) => CallShape::AsyncSingle,
            MethodBody::AsyncStream(_) => CallShape::AsyncStream,
        }
    }

    pub fn body(&self) -> &MethodBody<I, O, E, C> {
        &self.body
    }
}

impl<I, O, E, C> Clone for AgentMethod<I, O, E, C> {
    fn clone(&self) -> Self {
        Self {
            body: self.body.clone(),
        }
    }
}

impl<I, O, E, C> fmt::Debug for AgentMethod<I, O, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentMethod").field("shape", &self.shape()).finish()
    }
}

/// An agent described by name and its table of methods
///
/// Method order is preserved; registering a name twice replaces the earlier
/// method.
pub struct AgentTarget<I, O, E, C = O> {
    name: String,
    methods: Vec<(String, AgentMethod<I, O, E, C>)>,
}

impl<I, O, E, C> AgentTarget<I, O, E, C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, name: impl Into<String>, method: AgentMethod<I, O, E, C>) -> Self {
        self.add_method(name, method);
        self
    }

    pub fn add_method(&mut self, name: impl Into<String>, method: AgentMethod<I, O, E, C>) {
        let name = name.into();
        match self.methods.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = method,
            None => self.methods.push((name, method)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&AgentMethod<I, O, E, C>> {
        self.methods
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, method)| method)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.method(name).is_some()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(name, _)| name.as_str())
    }

    /// Conventional entry points this agent exposes, in probe order
    pub fn conventional_methods(&self) -> Vec<&'static str> {
        CONVENTIONAL_METHODS
            .iter()
            .copied()
            .filter(|name| self.has_method(name))
            .collect()
    }
}

impl<I, O, E, C> fmt::Debug for AgentTarget<I, O, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTarget")
            .field("name", &self.name)
            .field("methods", &self.method_names().collect::<Vec<_>>())
            .finish()
    }
}
