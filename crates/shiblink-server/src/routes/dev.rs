//! Development reload gate: `POST /.src`
//!
//! Mounted only in dev mode. Accepts an API-key caller with `202 Accepted`
//! and does nothing else; the reload itself is handled outside this server.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Router};
use tracing::info;

use shiblink_core::resolver::AuthContext;

use crate::error::AppError;
use crate::middleware::require_api_key;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/.src", post(reload_source))
}

async fn reload_source(Extension(auth): Extension<AuthContext>) -> Result<StatusCode, AppError> {
    require_api_key(&auth)?;
    info!("source reload requested");
    Ok(StatusCode::ACCEPTED)
}
