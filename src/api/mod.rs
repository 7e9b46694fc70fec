//! HTTP API layer: router, middleware, endpoints and error mapping.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod types;
