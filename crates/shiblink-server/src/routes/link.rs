//! Identity-link route: `POST /shibboleth-token`
//!
//! The request body is the raw signed assertion. The caller must present a
//! bearer token; its subject is the account the link is stored under.

use std::sync::Arc;

use axum::extract::rejection::StringRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json, Router};

use shiblink_core::linking::LinkState;
use shiblink_core::resolver::AuthContext;

use crate::error::AppError;
use crate::middleware::require_external_identity;
use crate::state::AppState;

/// Maximum accepted assertion size in bytes.
pub const MAX_ASSERTION_BYTES: usize = 64 * 1024;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shibboleth-token", post(link_identity))
        .layer(DefaultBodyLimit::max(MAX_ASSERTION_BYTES))
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn link_identity(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    body: Result<String, StringRejection>,
) -> Result<Json<LinkState>, AppError> {
    require_external_identity(&auth)?;

    let raw = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(format!(
                "assertion exceeds {MAX_ASSERTION_BYTES} bytes"
            ))
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    })?;

    let link_state = state.linker.link(&auth, &raw).await?;
    Ok(Json(link_state))
}
