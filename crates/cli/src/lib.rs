//! Client-side pieces of the `kiln` CLI: credential resolution, project
//! zipping, and the HTTP/SSE client. Split out of `main.rs` so the logic is
//! unit-testable.

pub mod archive;
pub mod client;
pub mod config;

pub use client::{Client, ClientError};
