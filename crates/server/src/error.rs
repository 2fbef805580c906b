//! Request error taxonomy and its mapping to HTTP responses.
//!
//! Internal failures never leak details to the client; the full error goes
//! to the log and the response carries a generic message.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use common::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("authentication required")]
    AuthRequired,

    #[error("invalid or revoked API key")]
    AuthInvalid,

    #[error("user account is inactive")]
    UserInactive,

    #[error("not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// Upload decoding failures keep the status multer assigned (notably 413
    /// for over-limit bodies).
    #[error("upload failed: {1}")]
    Upload(StatusCode, String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            Self::AuthRequired => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::AuthInvalid => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::UserInactive => (StatusCode::FORBIDDEN, self.to_string()),
            Self::NotFound | Self::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Job not found".to_string())
            }
            Self::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Upload(status, message) => (*status, message.clone()),
            Self::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, self.to_string()),
            Self::Store(StoreError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            Self::Store(_) | Self::Internal(_) => {
                error!("Internal error serving request: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({ "detail": detail }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
