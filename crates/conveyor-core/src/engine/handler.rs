//! Node handler contract and the cooperative checkpoint API.
//!
//! A task node's `code_ref` resolves to a [`NodeHandler`]. Handlers receive a
//! [`NodeContext`] carrying a snapshot of the run data, the node's static
//! arguments, and a [`Checkpoint`] handle. Long-running handlers call
//! [`Checkpoint::interrupted`] at loop boundaries: the call returns normally
//! with `None` to continue, or with `Some(Interruption)` after the gate has
//! already consumed the pending signal, persisted the partial progress, and
//! committed the status transition -- persistence is an explicit, ordered
//! side effect, not exception unwinding.
//!
//! There is no preemption: a handler that never checks the checkpoint runs to
//! completion or failure before any pending pause/cancel takes effect.
//! Handlers log through the `tracing` facade.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conveyor_types::run::SignalKind;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// What a handler produced.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// The node finished; the value (a JSON object) is merged into `Run.data`
    /// and the engine advances to the next node.
    Completed(Value),
    /// A pause/cancel took effect inside the handler. The transition and the
    /// partial progress are already durably committed; the engine stops
    /// dispatching further nodes.
    Interrupted(Interruption),
}

/// A committed mid-node interruption.
#[derive(Debug, Clone)]
pub struct Interruption {
    /// Whether the run paused or was cancelled.
    pub kind: SignalKind,
    /// Reason carried by the consumed signal, if any.
    pub reason: Option<String>,
}

/// Errors raised by node handlers.
///
/// A handler error fails the run (captured into `Run.error`); the engine
/// performs no automatic retry -- retry logic, if any, lives inside the
/// handler itself.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler's own logic failed.
    #[error("{0}")]
    Failed(String),

    /// The checkpoint gate could not reach the run store.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

// ---------------------------------------------------------------------------
// Checkpoint handle
// ---------------------------------------------------------------------------

/// Handler-facing checkpoint handle.
///
/// Wraps the engine's signal gate behind dynamic dispatch so `NodeContext`
/// stays a concrete type regardless of which repository backs the engine.
#[derive(Clone)]
pub struct Checkpoint {
    source: Arc<dyn InterruptSource>,
}

impl Checkpoint {
    pub fn new(source: Arc<dyn InterruptSource>) -> Self {
        Self { source }
    }

    /// A checkpoint that never interrupts, for handlers driven outside an
    /// engine worker (unit tests, ad-hoc invocation).
    pub fn disabled() -> Self {
        Self {
            source: Arc::new(NeverInterrupt),
        }
    }

    /// Consult the control plane at a loop boundary.
    ///
    /// `partial` is the progress accumulated so far (a JSON object). When a
    /// pause or cancel is pending, the gate consumes the signal, atomically
    /// merges `partial` into `Run.data`, commits the transition, and returns
    /// the interruption; the handler should then return
    /// [`NodeOutcome::Interrupted`] without further work. When nothing is
    /// pending, the partial progress is **not** persisted -- completed-node
    /// outputs are checkpointed by the engine itself.
    pub async fn interrupted(&self, partial: Value) -> Result<Option<Interruption>, HandlerError> {
        self.source.poll_boxed(partial).await
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint").finish_non_exhaustive()
    }
}

/// Object-safe source of interruptions, implemented by the engine's signal
/// gate. Boxed futures keep the trait dyn-compatible.
pub trait InterruptSource: Send + Sync {
    fn poll_boxed<'a>(
        &'a self,
        partial: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Interruption>, HandlerError>> + Send + 'a>>;
}

/// Backs [`Checkpoint::disabled`].
struct NeverInterrupt;

impl InterruptSource for NeverInterrupt {
    fn poll_boxed<'a>(
        &'a self,
        _partial: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Interruption>, HandlerError>> + Send + 'a>> {
        Box::pin(async { Ok(None) })
    }
}

// ---------------------------------------------------------------------------
// Node context
// ---------------------------------------------------------------------------

/// Everything a handler gets for one dispatch.
#[derive(Debug)]
pub struct NodeContext {
    /// The run being executed.
    pub thread_id: String,
    /// The node being dispatched.
    pub node_id: String,
    /// Snapshot of `Run.data` at dispatch time.
    pub data: Value,
    /// Static arguments from the node definition.
    pub args: serde_json::Map<String, Value>,
    /// Cooperative interruption handle.
    pub checkpoint: Checkpoint,
}

// ---------------------------------------------------------------------------
// Handler traits
// ---------------------------------------------------------------------------

/// A registered node handler.
///
/// Uses native async fn in traits (RPITIT); see [`NodeHandlerDyn`] for the
/// object-safe companion the registry stores.
pub trait NodeHandler: Send + Sync {
    fn call(
        &self,
        ctx: NodeContext,
    ) -> impl Future<Output = Result<NodeOutcome, HandlerError>> + Send;
}

/// Object-safe version of [`NodeHandler`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`Arc<dyn
/// NodeHandlerDyn>`). A blanket implementation is provided for all types
/// implementing `NodeHandler`.
pub trait NodeHandlerDyn: Send + Sync {
    fn call_boxed<'a>(
        &'a self,
        ctx: NodeContext,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, HandlerError>> + Send + 'a>>;
}

/// Blanket implementation: any `NodeHandler` automatically implements
/// `NodeHandlerDyn`.
impl<T: NodeHandler> NodeHandlerDyn for T {
    fn call_boxed<'a>(
        &'a self,
        ctx: NodeContext,
    ) -> Pin<Box<dyn Future<Output = Result<NodeOutcome, HandlerError>> + Send + 'a>> {
        Box::pin(self.call(ctx))
    }
}

/// Adapter turning a plain async closure into a [`NodeHandler`].
///
/// Used by `HandlerRegistry::register_fn` so hosts and tests can register
/// handlers without defining a struct per node.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> NodeHandler for FnHandler<F>
where
    F: Fn(NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutcome, HandlerError>> + Send,
{
    fn call(
        &self,
        ctx: NodeContext,
    ) -> impl Future<Output = Result<NodeOutcome, HandlerError>> + Send {
        (self.f)(ctx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
