//! Lendhub HTTP server.
//!
//! Wires the cache layer and job system into an axum application:
//! configuration, tracing, rate-limited routes, cache-aware read
//! handlers, health endpoints, and graceful shutdown that drains the
//! worker pool.

pub mod config;
pub mod handlers;
pub mod interceptor;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::AppConfig;
pub use interceptor::{WriteHooks, cached};
pub use server::{AppState, LendhubServer, ServerBuilder, build_app};
