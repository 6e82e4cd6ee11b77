//! HTTP transport, OAuth 2.0 endpoints, and authentication middleware
//! (spec component L), built the way the teacher's
//! `turbomcp-transport::axum` module lays out Axum services: shared state,
//! a middleware module, and a handlers module per endpoint group.

pub mod error_response;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::{AppState, HttpConfig};
