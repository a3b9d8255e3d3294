//! Authentication middleware.
//!
//! Runs the resolver on every protected request and stores the resulting
//! [`AuthContext`] in request extensions. The middleware itself never
//! rejects a request; handlers pick the variant they accept with
//! [`require_external_identity`] or [`require_api_key`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use shiblink_core::resolver::AuthContext;

use crate::error::AppError;
use crate::state::AppState;

/// Resolve the `Authorization` header into an [`AuthContext`] extension.
pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let auth = state.resolver.resolve(header.as_deref()).await;
    if let AuthContext::Error { reason, detail } = &auth {
        debug!(reason = %reason, detail = ?detail, path = %req.uri().path(), "credential not accepted");
    }

    req.extensions_mut().insert(auth);
    next.run(req).await
}

/// Accept only an external identity and return its subject.
///
/// # Errors
///
/// - [`AppError::Unauthorized`] if resolution failed.
/// - [`AppError::Forbidden`] for an API-key caller.
pub fn require_external_identity(auth: &AuthContext) -> Result<&str, AppError> {
    match auth {
        AuthContext::ExternalIdentity { subject, .. } => Ok(subject),
        AuthContext::Error { reason, .. } => Err(AppError::Unauthorized(*reason)),
        AuthContext::ApiKey { .. } => Err(AppError::Forbidden(
            "this endpoint requires a bearer token".to_owned(),
        )),
    }
}

/// Accept only the static API key.
///
/// # Errors
///
/// - [`AppError::Unauthorized`] if resolution failed.
/// - [`AppError::Forbidden`] for an external identity.
pub fn require_api_key(auth: &AuthContext) -> Result<(), AppError> {
    match auth {
        AuthContext::ApiKey { .. } => Ok(()),
        AuthContext::Error { reason, .. } => Err(AppError::Unauthorized(*reason)),
        AuthContext::ExternalIdentity { .. } => Err(AppError::Forbidden(
            "this endpoint requires an API key".to_owned(),
        )),
    }
}
