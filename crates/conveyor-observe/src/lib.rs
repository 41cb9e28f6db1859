//! Observability setup for Conveyor: tracing subscriber initialization with
//! optional OpenTelemetry trace export.

pub mod tracing_setup;
