//! SQLite-backed implementation of the [`common::JobStore`] capability.
//!
//! One database file, four tables: `users`, `api_keys`, `jobs`, `job_events`.
//! Foreign keys cascade from users to keys and jobs, and from jobs to events.
//! Timestamps are stored as ISO-8601 TEXT in UTC; booleans as 0/1/NULL.

pub mod entity;
mod schema;
mod store;

pub use store::SqlStore;
