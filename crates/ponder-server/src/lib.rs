//! # ponder-server
//!
//! Axum HTTP API over the session service.
//!
//! - Session endpoints: create, list, inspect, terminate
//! - Server-sent event stream per session with replay from a cursor
//!   (`?from=N` or `Last-Event-ID`)
//! - Completed-session history listing
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod sse;

pub use config::ServerConfig;
pub use errors::ApiError;
pub use server::{AppState, PonderServer};
pub use shutdown::ShutdownCoordinator;
