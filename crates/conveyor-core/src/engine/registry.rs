//! Handler registry: `code_ref` string -> node handler resolution.
//!
//! The registry is an explicit value built once by the host application and
//! handed to the engine (dependency injection) -- there is no process-wide
//! mutable registration. Resolution happens at dispatch time, not at compile
//! time, so a definition may reference a handler that does not exist yet;
//! dispatching an unresolved `code_ref` fails that run with a configuration
//! error rather than the whole process.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::handler::{FnHandler, HandlerError, NodeContext, NodeHandler, NodeHandlerDyn, NodeOutcome};

/// Immutable map of `code_ref` -> handler, built at process start.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandlerDyn>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a `code_ref`. Later registrations of the
    /// same ref replace earlier ones.
    pub fn register<H>(mut self, code_ref: impl Into<String>, handler: H) -> Self
    where
        H: NodeHandler + 'static,
    {
        self.handlers.insert(code_ref.into(), Arc::new(handler));
        self
    }

    /// Register a plain async closure as a handler.
    pub fn register_fn<F, Fut>(self, code_ref: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutcome, HandlerError>> + Send + 'static,
    {
        self.register(code_ref, FnHandler::new(f))
    }

    /// Resolve a `code_ref` to its handler.
    pub fn resolve(&self, code_ref: &str) -> Option<Arc<dyn NodeHandlerDyn>> {
        self.handlers.get(code_ref).cloned()
    }

    /// Registered code_refs, for diagnostics.
    pub fn refs(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
