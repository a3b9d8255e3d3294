//! Attribute read route: `GET /me`
//!
//! Returns the decrypted attribute map of the caller's external identity.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};

use shiblink_core::resolver::AuthContext;

use crate::error::AppError;
use crate::middleware::require_external_identity;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/me", get(read_attributes))
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn read_attributes(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    let subject = require_external_identity(&auth)?;
    let snapshot = state.attributes.get_all(subject).await?;
    Ok(Json(snapshot.into_plaintext_map()))
}
