//! Error types for `shiblink-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material or plaintext, and
//! verification errors never include the raw credential.

use shiblink_storage::StorageError;

/// Errors from the attribute cipher.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The configured key is not valid base64 or has the wrong length.
    #[error("invalid cipher key: {reason}")]
    InvalidKey { reason: String },

    /// The IV supplied for encryption is not a base64 16-byte value.
    #[error("invalid IV: {reason}")]
    InvalidIv { reason: String },

    /// Decryption failed: malformed IV or ciphertext, bad padding (usually a
    /// different key), or non-UTF-8 plaintext.
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
}

/// Errors from the encrypted attribute store.
#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    /// The record store could not be read.
    #[error("attribute store read failed: {0}")]
    StoreRead(#[source] StorageError),

    /// The record store failed while writing (transport or driver fault).
    #[error("attribute store write failed: {0}")]
    StoreWrite(#[source] StorageError),

    /// A write affected a number of rows other than exactly one.
    #[error("write conflict on attribute '{key}': expected 1 affected row, got {affected}")]
    WriteConflict { key: String, affected: u64 },

    /// A value could not be encrypted or decrypted.
    #[error("attribute crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Errors from credential verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The identity provider rejected the bearer token. `body` is the raw
    /// provider response, kept for diagnostics.
    #[error("external token rejected by identity provider")]
    InvalidExternalToken { body: String },

    /// The signed assertion is not a well-formed three-part structure or its
    /// payload lacks the required claims.
    #[error("malformed assertion: {reason}")]
    MalformedAssertion { reason: String },

    /// The trust authority's public key could not be fetched or parsed.
    #[error("public key fetch failed for '{url}': {reason}")]
    KeyFetch { url: String, reason: String },

    /// The assertion's signature does not validate against the key.
    #[error("signature verification failed: {reason}")]
    SignatureVerification { reason: String },
}

/// Errors from the identity-linking protocol.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The caller is not authenticated as an external identity.
    #[error("linking requires an external identity, got {kind}")]
    Unauthorized { kind: &'static str },

    /// The assertion could not be parsed or verified.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// The attribute store failed.
    #[error(transparent)]
    Attribute(#[from] AttributeError),
}
