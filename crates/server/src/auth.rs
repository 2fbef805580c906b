//! Bearer-key authentication middleware.
//!
//! The presented secret is hashed and looked up; the key and its owning user
//! must both be active. The resolved user rides in request extensions for
//! the handlers, which scope every store read by it.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::warn;

use common::{hash_api_key, JobStore, User};

use crate::app::AppState;
use crate::error::ServerError;

/// The authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::AuthRequired)?;
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or(ServerError::AuthRequired)?;

    let key = state
        .store
        .get_api_key_by_hash(&hash_api_key(token))
        .await?
        .filter(|key| key.is_active)
        .ok_or(ServerError::AuthInvalid)?;

    let user = state
        .store
        .get_user(&key.user_id)
        .await?
        .ok_or(ServerError::AuthInvalid)?;
    if !user.is_active {
        return Err(ServerError::UserInactive);
    }

    // Best-effort bookkeeping; an update failure never blocks the request.
    if let Err(e) = state.store.touch_api_key(&key.id, Utc::now()).await {
        warn!("Failed to update last_used_at for key {}: {}", key.id, e);
    }

    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}
