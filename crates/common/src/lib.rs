//! Shared domain types and the store capability trait for the kiln CI runner.
//!
//! Every other crate in the workspace depends on this one: the server and the
//! admin CLI drive the [`JobStore`] trait, the controller consumes [`Job`]
//! rows and produces status transitions, and the client CLI speaks the
//! [`StreamEvent`] wire shapes.

pub mod auth;
pub mod events;
pub mod models;
pub mod store;

pub use auth::{generate_api_key, hash_api_key, validate_email, API_KEY_PREFIX};
pub use events::StreamEvent;
pub use models::{ApiKey, EventKind, Job, JobEvent, JobStatus, JobSummary, User};
pub use store::{JobStore, StoreError, StoreResult};
