//! Credential verification.
//!
//! Two independent checks:
//!
//! 1. **Bearer-token introspection**: an opaque access token is sent to the
//!    identity provider's token-info endpoint. HTTP 200 means the token is
//!    valid and the body carries the caller's claims; anything else is a
//!    rejection, and the raw body is kept for diagnostics.
//! 2. **Signed-assertion verification**: a three-part RS256 assertion issued
//!    by the trust authority is checked against the authority's public key
//!    for the deployment environment.
//!
//! Parsing an assertion ([`AssertionVerifier::parse`]) only decodes it.
//! Callers must not act on parsed claims until
//! [`AssertionVerifier::verify`] has succeeded.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::VerifyError;

/// Identity returned by a successful token introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalIdentity {
    /// Stable subject identifier at the identity provider.
    pub subject: String,
    /// Every claim returned by the provider.
    pub claims: Map<String, Value>,
}

impl ExternalIdentity {
    /// Build an identity from a token-info response body.
    ///
    /// The subject is the `sub` claim, falling back to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidExternalToken`] if the body is not a JSON
    /// object or carries no subject.
    pub fn from_token_info(body: &str) -> Result<Self, VerifyError> {
        let claims: Map<String, Value> =
            serde_json::from_str(body).map_err(|e| VerifyError::InvalidExternalToken {
                body: format!("unparseable token info response: {e}"),
            })?;

        let subject = ["sub", "user_id"]
            .iter()
            .find_map(|name| claims.get(*name).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| VerifyError::InvalidExternalToken {
                body: "token info response has no subject".to_owned(),
            })?;

        Ok(Self { subject, claims })
    }
}

/// Validates bearer tokens with the identity provider.
#[async_trait::async_trait]
pub trait TokenIntrospector: Send + Sync + 'static {
    /// Ask the provider whether `token` is valid and for whom.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::InvalidExternalToken`] carrying the provider's
    /// response body when the token is rejected or the call fails.
    async fn introspect(&self, token: &str) -> Result<ExternalIdentity, VerifyError>;
}

/// Token introspection over HTTP: `GET <tokeninfo_url>?access_token=<token>`.
#[derive(Debug, Clone)]
pub struct HttpTokenIntrospector {
    client: reqwest::Client,
    tokeninfo_url: String,
}

impl HttpTokenIntrospector {
    /// Create an introspector. The client's timeout bounds every call.
    #[must_use]
    pub fn new(client: reqwest::Client, tokeninfo_url: impl Into<String>) -> Self {
        Self {
            client,
            tokeninfo_url: tokeninfo_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenIntrospector for HttpTokenIntrospector {
    async fn introspect(&self, token: &str) -> Result<ExternalIdentity, VerifyError> {
        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(|e| VerifyError::InvalidExternalToken {
                body: format!("token info request failed: {e}"),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VerifyError::InvalidExternalToken {
                body: format!("failed to read provider response: {e}"),
            })?;

        if status != StatusCode::OK {
            debug!(status = %status, "identity provider rejected bearer token");
            return Err(VerifyError::InvalidExternalToken { body });
        }

        ExternalIdentity::from_token_info(&body)
    }
}

/// Supplies the trust authority's public key for an environment.
#[async_trait::async_trait]
pub trait PublicKeySource: Send + Sync + 'static {
    /// Return the PEM-encoded public key for `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::KeyFetch`] if the key cannot be obtained.
    async fn public_key_pem(&self, environment: &str) -> Result<String, VerifyError>;

    /// Where the key for `environment` comes from, for error reports.
    fn key_location(&self, environment: &str) -> String {
        format!("<{environment} public key>")
    }
}

/// Fetches public keys from `<base_url><path_template with {env} replaced>`.
#[derive(Debug, Clone)]
pub struct HttpPublicKeySource {
    client: reqwest::Client,
    base_url: String,
    path_template: String,
}

impl HttpPublicKeySource {
    /// Create a key source for a trust-authority host.
    ///
    /// A bare hostname is reached over `https`; a value that already carries
    /// a scheme is used as given.
    #[must_use]
    pub fn new(client: reqwest::Client, trust_host: &str, path_template: impl Into<String>) -> Self {
        let trimmed = trust_host.trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_owned()
        } else {
            format!("https://{trimmed}")
        };
        Self {
            client,
            base_url,
            path_template: path_template.into(),
        }
    }

    /// The URL the key for `environment` is fetched from.
    #[must_use]
    pub fn key_url(&self, environment: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.path_template.replace("{env}", environment)
        )
    }
}

#[async_trait::async_trait]
impl PublicKeySource for HttpPublicKeySource {
    async fn public_key_pem(&self, environment: &str) -> Result<String, VerifyError> {
        let url = self.key_url(environment);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VerifyError::KeyFetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(VerifyError::KeyFetch {
                url,
                reason: format!("trust authority answered {status}"),
            });
        }

        response.text().await.map_err(|e| VerifyError::KeyFetch {
            url,
            reason: format!("failed to read key body: {e}"),
        })
    }

    fn key_location(&self, environment: &str) -> String {
        self.key_url(environment)
    }
}

/// Claims carried by a link assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkClaims {
    /// The external (eRA Commons) username being linked.
    #[serde(rename = "eraCommonsUsername")]
    pub era_commons_username: String,
    /// Issued-at time, seconds since the Unix epoch.
    pub iat: i64,
    /// Any further claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded but unverified link assertion.
#[derive(Debug, Clone)]
pub struct LinkAssertion {
    /// Decoded JOSE header.
    pub header: Map<String, Value>,
    /// Decoded payload. Not trustworthy until verified.
    pub claims: LinkClaims,
    raw: String,
}

impl LinkAssertion {
    /// The compact serialization the assertion was parsed from.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Verifies link assertions against the trust authority's keys.
pub struct AssertionVerifier {
    keys: Arc<dyn PublicKeySource>,
}

impl AssertionVerifier {
    #[must_use]
    pub fn new(keys: Arc<dyn PublicKeySource>) -> Self {
        Self { keys }
    }

    /// Decode the three-part structure without checking the signature.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::MalformedAssertion`] if the input does not have
    /// three dot-separated parts or the header/payload are not the expected
    /// base64url JSON.
    pub fn parse(raw: &str) -> Result<LinkAssertion, VerifyError> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('.').collect();
        let [header, payload, signature] = parts.as_slice() else {
            return Err(malformed(format!(
                "expected 3 dot-separated parts, got {}",
                parts.len()
            )));
        };
        if signature.is_empty() {
            return Err(malformed("signature part is empty"));
        }

        let header: Map<String, Value> = decode_part(header, "header")?;
        let claims: LinkClaims = decode_part(payload, "payload")?;

        Ok(LinkAssertion {
            header,
            claims,
            raw: raw.to_owned(),
        })
    }

    /// Fetch the public key for `environment`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::KeyFetch`] if the key cannot be fetched or is
    /// not an RSA public key in PEM form.
    pub async fn fetch_key(&self, environment: &str) -> Result<DecodingKey, VerifyError> {
        let pem = self.keys.public_key_pem(environment).await?;
        DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| VerifyError::KeyFetch {
            url: self.keys.key_location(environment),
            reason: format!("not an RSA public key: {e}"),
        })
    }

    /// Check the assertion's RS256 signature against `key`.
    ///
    /// Expiry is not enforced; the link window is computed from `iat` by the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::SignatureVerification`] with the verifier's
    /// diagnostic if the signature does not validate.
    pub fn verify_with_key(
        assertion: &LinkAssertion,
        key: &DecodingKey,
    ) -> Result<LinkClaims, VerifyError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<LinkClaims>(assertion.raw(), key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "link assertion signature rejected");
                VerifyError::SignatureVerification {
                    reason: e.to_string(),
                }
            })
    }

    /// Fetch the environment's key and verify the assertion with it.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::KeyFetch`] if the key cannot be obtained.
    /// - [`VerifyError::SignatureVerification`] if the signature is invalid.
    pub async fn verify(
        &self,
        assertion: &LinkAssertion,
        environment: &str,
    ) -> Result<LinkClaims, VerifyError> {
        let key = self.fetch_key(environment).await?;
        Self::verify_with_key(assertion, &key)
    }
}

impl std::fmt::Debug for AssertionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionVerifier").finish_non_exhaustive()
    }
}

fn malformed(reason: impl Into<String>) -> VerifyError {
    VerifyError::MalformedAssertion {
        reason: reason.into(),
    }
}

fn decode_part<T: serde::de::DeserializeOwned>(part: &str, name: &str) -> Result<T, VerifyError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| malformed(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| malformed(format!("invalid {name}: {e}")))
}
