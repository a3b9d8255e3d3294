//! HTTP error types for `shiblink` server.
//!
//! Maps domain errors from `shiblink-core` into HTTP responses. Every error
//! produces a JSON body with a machine-readable `error` field, an optional
//! resolver `reason` code and a human-readable `message`. Nothing else is
//! ever serialized: upstream and internal failures are logged with their
//! detail and answered with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use shiblink_core::error::{AttributeError, LinkError, VerifyError};
use shiblink_core::resolver::AuthFailure;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The credential was missing or rejected.
    Unauthorized(AuthFailure),
    /// The caller authenticated, but not as the kind this route requires.
    Forbidden(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// Request body exceeds the route's limit.
    PayloadTooLarge(String),
    /// A concurrent writer changed the attributes being written.
    Conflict(String),
    /// A dependency (key host, record store) failed.
    Upstream(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    message: String,
}

fn unauthorized_message(reason: AuthFailure) -> &'static str {
    match reason {
        AuthFailure::AuthHeaderMissing => "missing Authorization header",
        AuthFailure::AuthSchemeInvalid => "Authorization header must use the Key or Bearer scheme",
        AuthFailure::ApiKeyAuthDisabled => "API key authentication is disabled",
        AuthFailure::ApiKeyMismatch => "invalid API key",
        AuthFailure::ExternalTokenInvalid => "bearer token was rejected by the identity provider",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, reason, message) = match self {
            Self::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                Some(reason.code()),
                unauthorized_message(reason).to_owned(),
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", None, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", None, msg),
            Self::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", None, msg)
            }
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", None, msg),
            Self::Upstream(msg) => {
                tracing::warn!(error = %msg, "upstream dependency failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    None,
                    "an upstream dependency is unavailable".to_owned(),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    None,
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            reason,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::InvalidExternalToken { .. } => {
                Self::Unauthorized(AuthFailure::ExternalTokenInvalid)
            }
            VerifyError::MalformedAssertion { .. } | VerifyError::SignatureVerification { .. } => {
                Self::BadRequest(err.to_string())
            }
            VerifyError::KeyFetch { .. } => Self::Upstream(err.to_string()),
        }
    }
}

impl From<AttributeError> for AppError {
    fn from(err: AttributeError) -> Self {
        match err {
            AttributeError::StoreRead(_) | AttributeError::StoreWrite(_) => {
                Self::Upstream(err.to_string())
            }
            AttributeError::WriteConflict { .. } => Self::Conflict(err.to_string()),
            AttributeError::Crypto(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<LinkError> for AppError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Unauthorized { .. } => Self::Forbidden(err.to_string()),
            LinkError::Verify(inner) => inner.into(),
            LinkError::Attribute(inner) => inner.into(),
        }
    }
}
