//! Axum HTTP server: routes, handlers and request tracking.
//!
//! # Responsibilities
//! - Define the Axum router with the instrumented routes.
//! - Inject shared application state (`AppState`) into handlers.
//! - Record request metrics and spans around every routed request.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
