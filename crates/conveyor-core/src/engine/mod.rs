//! Workflow engine core: plan compilation, handler dispatch, and the run
//! state machine.
//!
//! - `compiler` -- definition validation and executable plan construction
//! - `expression` -- pure evaluator for condition predicates
//! - `handler` -- node handler contract and cooperative checkpoint API
//! - `registry` -- code_ref -> handler resolution (explicit DI, no globals)
//! - `gate` -- signal consumption and mid-node interruption commits
//! - `executor` -- worker pool, plan walker, and control-plane operations

pub mod compiler;
pub mod executor;
pub mod expression;
pub mod gate;
pub mod handler;
pub mod registry;
