//! Shared domain types for Conveyor.
//!
//! This crate contains the core domain types of the workflow orchestration
//! engine: Flow, FlowVersion, the node/edge definition graph, Run, Signal,
//! and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod run;
