//! SQLite persistence for flows, versions, runs, and signals.

pub mod flow;
pub mod pool;
pub mod run;
