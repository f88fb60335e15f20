//! Axum HTTP server: routing, middleware, shared state and handlers.
//!
//! # Responsibilities
//! - Define the router with all routes and shared middleware.
//! - Inject shared application state (`AppState`) into handlers.
//! - Map [`common::ServiceError`] onto JSON error responses.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
