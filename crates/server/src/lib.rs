//! The kiln HTTP API: authenticates submissions, persists them as queued
//! jobs, and multiplexes live container logs to any number of readers.
//!
//! The server is stateless apart from the injected store and runtime
//! handles, so replicas can be added freely; all coordination goes through
//! the store.

pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod stream;

pub use app::{router, AppState, ServerConfig};
pub use error::ServerError;
