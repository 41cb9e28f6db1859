//! REST API layer: envelope responses, error mapping, router, handlers.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
