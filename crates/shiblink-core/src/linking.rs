//! Identity-linking protocol.
//!
//! Binds a verified eRA Commons username to the account of the caller's
//! external identity. The signed assertion is parsed and its signature
//! checked against the trust authority's key for the configured environment
//! before the attribute store is touched at all. The three link attributes
//! are then written as one atomic batch against a single snapshot, and the
//! stored state is read back and projected.

use std::sync::Arc;

use chrono::DateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::attributes::{AttributeSnapshot, AttributeStore};
use crate::error::LinkError;
use crate::resolver::AuthContext;
use crate::verifier::AssertionVerifier;

/// How long a link stays valid after the assertion was issued (30 days).
pub const LINK_WINDOW_SECS: i64 = 2_592_000;

pub const LINKED_USERNAME_KEY: &str = "linkedNihUsername";
pub const LAST_LINK_TIME_KEY: &str = "lastLinkTime";
pub const LINK_EXPIRE_TIME_KEY: &str = "linkExpireTime";

/// Expiry of a link whose assertion was issued at `iat`.
#[must_use]
pub fn link_expire_time(iat: i64) -> i64 {
    iat.saturating_add(LINK_WINDOW_SECS)
}

/// Projection of an account's link attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkState {
    pub linked_nih_username: Option<String>,
    pub last_link_time: Option<String>,
    pub link_expire_time: Option<String>,
    pub last_link_time_human: Option<String>,
    pub link_expire_time_human: Option<String>,
}

impl LinkState {
    /// Project the link attributes out of a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &AttributeSnapshot) -> Self {
        let owned = |key: &str| snapshot.plaintext(key).map(str::to_owned);
        let last_link_time = owned(LAST_LINK_TIME_KEY);
        let link_expire_time = owned(LINK_EXPIRE_TIME_KEY);
        Self {
            linked_nih_username: owned(LINKED_USERNAME_KEY),
            last_link_time_human: last_link_time.as_deref().and_then(human_time),
            link_expire_time_human: link_expire_time.as_deref().and_then(human_time),
            last_link_time,
            link_expire_time,
        }
    }
}

/// Render a stored epoch-seconds value as an RFC 2822 UTC date.
fn human_time(epoch_secs: &str) -> Option<String> {
    let secs = epoch_secs.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc2822())
}

/// Runs the linking protocol.
pub struct Linker {
    verifier: AssertionVerifier,
    attributes: Arc<AttributeStore>,
    environment: String,
}

impl Linker {
    #[must_use]
    pub fn new(
        verifier: AssertionVerifier,
        attributes: Arc<AttributeStore>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            attributes,
            environment: environment.into(),
        }
    }

    /// Environment whose trust-authority key signs assertions.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Link the caller's account to the username in `raw_assertion`.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Unauthorized`] unless `auth` is an external identity.
    /// - [`LinkError::Verify`] if the assertion is malformed, the key cannot
    ///   be fetched, or the signature does not validate. Nothing is written.
    /// - [`LinkError::Attribute`] if reading or writing the store fails.
    pub async fn link(&self, auth: &AuthContext, raw_assertion: &str) -> Result<LinkState, LinkError> {
        let AuthContext::ExternalIdentity { subject, .. } = auth else {
            return Err(LinkError::Unauthorized { kind: auth.kind() });
        };

        let assertion = AssertionVerifier::parse(raw_assertion)?;
        let claims = self
            .verifier
            .verify(&assertion, &self.environment)
            .await
            .inspect_err(|e| warn!(subject = %subject, error = %e, "link assertion rejected"))?;

        let snapshot = self.attributes.get_all(subject).await?;

        let last_link_time = claims.iat.to_string();
        let expire_time = link_expire_time(claims.iat).to_string();
        self.attributes
            .upsert_many(
                subject,
                &snapshot,
                &[
                    (LINKED_USERNAME_KEY, claims.era_commons_username.as_str()),
                    (LAST_LINK_TIME_KEY, last_link_time.as_str()),
                    (LINK_EXPIRE_TIME_KEY, expire_time.as_str()),
                ],
            )
            .await?;

        info!(
            subject = %subject,
            relink = snapshot.contains_key(LINKED_USERNAME_KEY),
            link_expire_time = %expire_time,
            "identity linked"
        );

        let stored = self.attributes.get_all(subject).await?;
        Ok(LinkState::from_snapshot(&stored))
    }
}

impl std::fmt::Debug for Linker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linker")
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}
