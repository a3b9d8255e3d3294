//! Authentication resolver.
//!
//! Turns the value of one `Authorization` header into exactly one
//! [`AuthContext`]. Resolution never fails: every rejection is encoded as
//! [`AuthContext::Error`] and it is up to each protected handler to reject
//! it explicitly. There is no implicit deny.
//!
//! The header has the form `<scheme> <credential>`, where the scheme is
//! matched case-insensitively against the closed set in [`AuthScheme`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::VerifyError;
use crate::verifier::TokenIntrospector;

/// Supported authorization schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Key <static api key>`
    Key,
    /// `Bearer <identity provider access token>`
    Bearer,
}

impl AuthScheme {
    /// Parse a scheme token, ignoring ASCII case.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("key") {
            Some(Self::Key)
        } else if token.eq_ignore_ascii_case("bearer") {
            Some(Self::Bearer)
        } else {
            None
        }
    }
}

/// Why a credential was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthFailure {
    AuthHeaderMissing,
    AuthSchemeInvalid,
    ApiKeyAuthDisabled,
    ApiKeyMismatch,
    ExternalTokenInvalid,
}

impl AuthFailure {
    /// Stable machine-readable reason code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::AuthHeaderMissing => "missing-header",
            Self::AuthSchemeInvalid => "invalid-auth-type",
            Self::ApiKeyAuthDisabled => "key-auth-disabled",
            Self::ApiKeyMismatch => "invalid-key",
            Self::ExternalTokenInvalid => "invalid-bearer-token",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The outcome of resolving one request's credential.
#[derive(Clone, PartialEq)]
pub enum AuthContext {
    /// The request carried the configured static API key.
    ApiKey { value: String },
    /// The request carried a bearer token the identity provider accepted.
    ExternalIdentity {
        subject: String,
        claims: Map<String, Value>,
    },
    /// The credential was missing or rejected.
    Error {
        reason: AuthFailure,
        detail: Option<String>,
    },
}

impl AuthContext {
    fn failure(reason: AuthFailure) -> Self {
        Self::Error {
            reason,
            detail: None,
        }
    }

    /// Short name of the variant, for logs and error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "apiKey",
            Self::ExternalIdentity { .. } => "externalIdentity",
            Self::Error { .. } => "error",
        }
    }

    /// The external subject, if this is an external identity.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::ExternalIdentity { subject, .. } => Some(subject),
            _ => None,
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("value", &"[REDACTED]")
                .finish(),
            Self::ExternalIdentity { subject, .. } => f
                .debug_struct("ExternalIdentity")
                .field("subject", subject)
                .finish_non_exhaustive(),
            Self::Error { reason, detail } => f
                .debug_struct("Error")
                .field("reason", reason)
                .field("detail", detail)
                .finish(),
        }
    }
}

/// The configured static API key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiKeySecret(String);

impl ApiKeySecret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    fn matches(&self, candidate: &str) -> bool {
        self.0.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl fmt::Debug for ApiKeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKeySecret([REDACTED])")
    }
}

/// Classifies inbound credentials.
pub struct Resolver {
    api_key: Option<ApiKeySecret>,
    introspector: Arc<dyn TokenIntrospector>,
}

impl Resolver {
    /// Create a resolver. `api_key = None` disables `Key` authentication.
    #[must_use]
    pub fn new(api_key: Option<ApiKeySecret>, introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self {
            api_key,
            introspector,
        }
    }

    /// Resolve an `Authorization` header value.
    pub async fn resolve(&self, header: Option<&str>) -> AuthContext {
        let header = header.map(str::trim).unwrap_or_default();
        if header.is_empty() {
            return AuthContext::failure(AuthFailure::AuthHeaderMissing);
        }

        let Some((scheme, credential)) = header.split_once(char::is_whitespace) else {
            return AuthContext::failure(AuthFailure::AuthSchemeInvalid);
        };
        let credential = credential.trim();
        if credential.is_empty() {
            return AuthContext::failure(AuthFailure::AuthSchemeInvalid);
        }

        match AuthScheme::parse(scheme) {
            Some(AuthScheme::Key) => self.resolve_key(credential),
            Some(AuthScheme::Bearer) => self.resolve_bearer(credential).await,
            None => {
                debug!(scheme, "unsupported authorization scheme");
                AuthContext::failure(AuthFailure::AuthSchemeInvalid)
            }
        }
    }

    fn resolve_key(&self, credential: &str) -> AuthContext {
        match &self.api_key {
            None => AuthContext::failure(AuthFailure::ApiKeyAuthDisabled),
            Some(secret) if secret.matches(credential) => AuthContext::ApiKey {
                value: credential.to_owned(),
            },
            Some(_) => AuthContext::failure(AuthFailure::ApiKeyMismatch),
        }
    }

    async fn resolve_bearer(&self, token: &str) -> AuthContext {
        match self.introspector.introspect(token).await {
            Ok(identity) => AuthContext::ExternalIdentity {
                subject: identity.subject,
                claims: identity.claims,
            },
            Err(VerifyError::InvalidExternalToken { body }) => AuthContext::Error {
                reason: AuthFailure::ExternalTokenInvalid,
                detail: Some(body),
            },
            Err(other) => AuthContext::Error {
                reason: AuthFailure::ExternalTokenInvalid,
                detail: Some(other.to_string()),
            },
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("key_auth_enabled", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}
