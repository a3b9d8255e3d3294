//! Encrypted per-account attribute store.
//!
//! Wraps a [`RecordStore`] so every attribute value is encrypted with its own
//! IV before it reaches storage and decrypted on the way out. The IV is
//! stored in the same record as its ciphertext.
//!
//! Writes follow a read-modify-write protocol: the caller reads an
//! [`AttributeSnapshot`], then upserts against it. A key present in the
//! snapshot is updated in place and keeps its IV; an absent key is inserted
//! under a fresh IV. Each write must affect exactly one row, otherwise
//! [`AttributeError::WriteConflict`] is returned. The snapshot is never
//! refreshed by a write.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use shiblink_storage::{AttributeRecord, BatchOutcome, RecordStore, RecordWrite};
use tracing::{debug, warn};

use crate::cipher::Cipher;
use crate::error::AttributeError;

/// One decrypted attribute together with the stored IV and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub iv_base64: String,
    pub cipher_text_base64: String,
    pub plaintext: String,
}

/// Point-in-time decrypted view of one account's attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSnapshot {
    entries: BTreeMap<String, AttributeValue>,
}

impl AttributeSnapshot {
    /// Look up an attribute by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    /// The decrypted value of an attribute, if present.
    #[must_use]
    pub fn plaintext(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.plaintext.as_str())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop IVs and ciphertext, keeping only `key → plaintext`.
    #[must_use]
    pub fn into_plaintext_map(self) -> BTreeMap<String, String> {
        self.entries
            .into_iter()
            .map(|(k, v)| (k, v.plaintext))
            .collect()
    }
}

/// Encrypted attribute store.
pub struct AttributeStore {
    records: Arc<dyn RecordStore>,
    cipher: Arc<Cipher>,
}

impl AttributeStore {
    /// Create an attribute store over a record store and cipher.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>, cipher: Arc<Cipher>) -> Self {
        Self { records, cipher }
    }

    /// Read and decrypt every attribute of an account in one store read.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::StoreRead`] if the record store fails.
    /// - [`AttributeError::Crypto`] if any stored value cannot be decrypted.
    pub async fn get_all(&self, account_id: &str) -> Result<AttributeSnapshot, AttributeError> {
        let records = self
            .records
            .fetch_all(account_id)
            .await
            .map_err(AttributeError::StoreRead)?;

        let mut entries = BTreeMap::new();
        for record in records {
            let plaintext = self
                .cipher
                .decrypt(&record.iv_base64, &record.cipher_text_base64)
                .inspect_err(|e| {
                    warn!(account_id, key = %record.key, error = %e, "stored attribute failed to decrypt");
                })?;
            entries.insert(
                record.key,
                AttributeValue {
                    iv_base64: record.iv_base64,
                    cipher_text_base64: record.cipher_text_base64,
                    plaintext,
                },
            );
        }

        Ok(AttributeSnapshot { entries })
    }

    /// Insert or update a single attribute against `snapshot`.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::WriteConflict`] if the write affects zero rows or
    ///   more than one row.
    /// - [`AttributeError::StoreWrite`] if the record store fails.
    /// - [`AttributeError::Crypto`] if the value cannot be encrypted.
    pub async fn upsert(
        &self,
        account_id: &str,
        snapshot: &AttributeSnapshot,
        key: &str,
        value: &str,
    ) -> Result<(), AttributeError> {
        let write = self.prepare_write(account_id, snapshot, key, value)?;
        let affected = match &write {
            RecordWrite::Insert(record) => self.records.insert(record).await,
            RecordWrite::Update(record) => self.records.update(record).await,
        }
        .map_err(AttributeError::StoreWrite)?;

        if affected != 1 {
            warn!(account_id, key, affected, "attribute upsert conflict");
            return Err(AttributeError::WriteConflict {
                key: key.to_owned(),
                affected,
            });
        }

        debug!(account_id, key, inserted = matches!(write, RecordWrite::Insert(_)), "attribute written");
        Ok(())
    }

    /// Insert or update several attributes against `snapshot` atomically.
    ///
    /// Either every write affects exactly one row and all of them commit, or
    /// none of them is persisted.
    ///
    /// # Errors
    ///
    /// - [`AttributeError::WriteConflict`] naming the first offending key.
    /// - [`AttributeError::StoreWrite`] if the record store fails.
    /// - [`AttributeError::Crypto`] if a value cannot be encrypted.
    pub async fn upsert_many(
        &self,
        account_id: &str,
        snapshot: &AttributeSnapshot,
        values: &[(&str, &str)],
    ) -> Result<(), AttributeError> {
        let writes = values
            .iter()
            .map(|(key, value)| self.prepare_write(account_id, snapshot, key, value))
            .collect::<Result<Vec<_>, _>>()?;

        match self
            .records
            .apply(&writes)
            .await
            .map_err(AttributeError::StoreWrite)?
        {
            BatchOutcome::Committed => {
                debug!(account_id, count = writes.len(), "attribute batch committed");
                Ok(())
            }
            BatchOutcome::Aborted { index, affected } => {
                let key = writes
                    .get(index)
                    .map(|w| w.record().key.clone())
                    .unwrap_or_default();
                warn!(account_id, key = %key, affected, "attribute batch aborted");
                Err(AttributeError::WriteConflict { key, affected })
            }
        }
    }

    fn prepare_write(
        &self,
        account_id: &str,
        snapshot: &AttributeSnapshot,
        key: &str,
        value: &str,
    ) -> Result<RecordWrite, AttributeError> {
        let existing_iv = snapshot.get(key).map(|v| v.iv_base64.clone());
        let iv_base64 = existing_iv.clone().unwrap_or_else(Cipher::new_iv);
        let cipher_text_base64 = self.cipher.encrypt(&iv_base64, value)?;

        let record = AttributeRecord {
            account_id: account_id.to_owned(),
            key: key.to_owned(),
            iv_base64,
            cipher_text_base64,
        };

        Ok(if existing_iv.is_some() {
            RecordWrite::Update(record)
        } else {
            RecordWrite::Insert(record)
        })
    }
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore").finish_non_exhaustive()
    }
}
