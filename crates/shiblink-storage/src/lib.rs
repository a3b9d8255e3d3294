//! Record store abstraction for `shiblink`.
//!
//! This crate defines the [`RecordStore`] trait, a keyed record store that
//! holds one row per `(account_id, key)` attribute. It knows nothing about
//! encryption: the attribute store in `shiblink-core` encrypts every value
//! before it reaches this layer, and the IV travels in the same row as the
//! ciphertext it belongs to.
//!
//! Writes report the number of affected rows. That count is the only
//! concurrency guard the upper layers rely on, so backends must report it
//! faithfully instead of silently upserting.
//!
//! Two implementations are provided:
//!
//! - [`PostgresRecordStore`]: pooled `PostgreSQL` backend (feature `postgres-backend`)
//! - [`MemoryRecordStore`]: in-memory, for tests and local development

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;

use serde::{Deserialize, Serialize};

pub use error::StorageError;
pub use memory::MemoryRecordStore;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresRecordStore;

/// One persisted attribute row.
///
/// The value is never stored in plaintext: `cipher_text_base64` can only be
/// decrypted with the `iv_base64` stored beside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRecord {
    /// Owning account (the subject of the external identity).
    pub account_id: String,
    /// Attribute name, unique per account.
    pub key: String,
    /// Base64-encoded 16-byte initialization vector.
    pub iv_base64: String,
    /// Base64-encoded ciphertext.
    pub cipher_text_base64: String,
}

/// A single write in a batch submitted to [`RecordStore::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite {
    /// Create a row that must not exist yet.
    Insert(AttributeRecord),
    /// Overwrite a row that must already exist.
    Update(AttributeRecord),
}

impl RecordWrite {
    /// The record carried by this write.
    #[must_use]
    pub fn record(&self) -> &AttributeRecord {
        match self {
            Self::Insert(record) | Self::Update(record) => record,
        }
    }
}

/// Result of a batch submitted to [`RecordStore::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every write affected exactly one row and the batch was committed.
    Committed,
    /// The write at `index` affected `affected` rows; nothing was committed.
    Aborted { index: usize, affected: u64 },
}

/// A pluggable keyed record store.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Fetch every record belonging to an account in a single read.
    ///
    /// Returns an empty vector for an unknown account.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn fetch_all(&self, account_id: &str) -> Result<Vec<AttributeRecord>, StorageError>;

    /// Insert a new record and return the number of affected rows.
    ///
    /// An existing `(account_id, key)` row is left untouched and reported as
    /// zero affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn insert(&self, record: &AttributeRecord) -> Result<u64, StorageError>;

    /// Overwrite the IV and ciphertext of an existing record and return the
    /// number of affected rows (zero if the row vanished).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn update(&self, record: &AttributeRecord) -> Result<u64, StorageError>;

    /// Apply a batch of writes atomically.
    ///
    /// The batch commits only if every write affects exactly one row;
    /// otherwise nothing is persisted and the first offending write is
    /// reported in [`BatchOutcome::Aborted`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] or [`StorageError::Transaction`] if the
    /// underlying backend fails.
    async fn apply(&self, writes: &[RecordWrite]) -> Result<BatchOutcome, StorageError>;
}
