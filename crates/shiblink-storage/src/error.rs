//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger. Values are never included: they are ciphertext at
//! best and useless for diagnosis.

/// Errors that can occur during record store operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to or initialize the backend.
    #[error("failed to open record store at '{target}': {reason}")]
    Open { target: String, reason: String },

    /// Failed to read an account's records.
    #[error("failed to read records for account '{account_id}': {reason}")]
    Read { account_id: String, reason: String },

    /// Failed to write a record.
    #[error("failed to write key '{key}' for account '{account_id}': {reason}")]
    Write {
        account_id: String,
        key: String,
        reason: String,
    },

    /// Failed to begin, commit, or roll back a transaction.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },
}
