//! In-memory record store for testing and local development.
//!
//! Rows live in a `BTreeMap` keyed by `(account_id, key)` behind a `RwLock`.
//! Nothing is persisted; data is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::{AttributeRecord, BatchOutcome, RecordStore, RecordWrite, StorageError};

type RowId = (String, String);

#[derive(Debug, Clone)]
struct StoredRow {
    iv_base64: String,
    cipher_text_base64: String,
}

fn row_id(record: &AttributeRecord) -> RowId {
    (record.account_id.clone(), record.key.clone())
}

fn stored_row(record: &AttributeRecord) -> StoredRow {
    StoredRow {
        iv_base64: record.iv_base64.clone(),
        cipher_text_base64: record.cipher_text_base64.clone(),
    }
}

/// An in-memory record store backed by a `BTreeMap`.
///
/// Cloning shares the underlying rows. Sorting by `(account_id, key)` makes
/// the per-account scan a contiguous range.
///
/// # Examples
///
/// ```
/// # use shiblink_storage::{AttributeRecord, MemoryRecordStore, RecordStore};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryRecordStore::new();
/// let record = AttributeRecord {
///     account_id: "abc123".to_owned(),
///     key: "linkedNihUsername".to_owned(),
///     iv_base64: "AAAAAAAAAAAAAAAAAAAAAA==".to_owned(),
///     cipher_text_base64: "c2VjcmV0".to_owned(),
/// };
/// assert_eq!(store.insert(&record).await.unwrap(), 1);
/// assert_eq!(store.fetch_all("abc123").await.unwrap(), vec![record]);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    rows: Arc<RwLock<BTreeMap<RowId, StoredRow>>>,
}

impl MemoryRecordStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across all accounts.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store holds no rows at all.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_all(&self, account_id: &str) -> Result<Vec<AttributeRecord>, StorageError> {
        let rows = self.rows.read().await;
        let records = rows
            .range((account_id.to_owned(), String::new())..)
            .take_while(|((owner, _), _)| owner == account_id)
            .map(|((owner, key), row)| AttributeRecord {
                account_id: owner.clone(),
                key: key.clone(),
                iv_base64: row.iv_base64.clone(),
                cipher_text_base64: row.cipher_text_base64.clone(),
            })
            .collect();
        Ok(records)
    }

    async fn insert(&self, record: &AttributeRecord) -> Result<u64, StorageError> {
        let mut rows = self.rows.write().await;
        let id = row_id(record);
        if rows.contains_key(&id) {
            return Ok(0);
        }
        rows.insert(id, stored_row(record));
        Ok(1)
    }

    async fn update(&self, record: &AttributeRecord) -> Result<u64, StorageError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&row_id(record)) {
            Some(row) => {
                *row = stored_row(record);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn apply(&self, writes: &[RecordWrite]) -> Result<BatchOutcome, StorageError> {
        let mut rows = self.rows.write().await;
        let mut staged: BTreeMap<RowId, StoredRow> = BTreeMap::new();

        for (index, write) in writes.iter().enumerate() {
            let record = write.record();
            let id = row_id(record);
            let present = staged.contains_key(&id) || rows.contains_key(&id);
            let affected = match write {
                RecordWrite::Insert(_) => u64::from(!present),
                RecordWrite::Update(_) => u64::from(present),
            };
            if affected != 1 {
                debug!(
                    index,
                    affected,
                    account_id = %record.account_id,
                    key = %record.key,
                    "record batch aborted"
                );
                return Ok(BatchOutcome::Aborted { index, affected });
            }
            staged.insert(id, stored_row(record));
        }

        rows.extend(staged);
        Ok(BatchOutcome::Committed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(account_id: &str, key: &str, cipher_text: &str) -> AttributeRecord {
        AttributeRecord {
            account_id: account_id.to_owned(),
            key: key.to_owned(),
            iv_base64: "AAAAAAAAAAAAAAAAAAAAAA==".to_owned(),
            cipher_text_base64: cipher_text.to_owned(),
        }
    }

    #[tokio::test]
    async fn fetch_unknown_account_returns_empty() {
        let store = MemoryRecordStore::new();
        assert!(store.fetch_all("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_returns_only_the_accounts_rows() {
        let store = MemoryRecordStore::new();
        store.insert(&record("abc", "a", "1")).await.unwrap();
        store.insert(&record("abc", "b", "2")).await.unwrap();
        store.insert(&record("abcd", "a", "3")).await.unwrap();
        store.insert(&record("ab", "z", "4")).await.unwrap();

        let rows = store.fetch_all("abc").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn insert_existing_row_affects_nothing() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.insert(&record("abc", "k", "v1")).await.unwrap(), 1);
        assert_eq!(store.insert(&record("abc", "k", "v2")).await.unwrap(), 0);

        let rows = store.fetch_all("abc").await.unwrap();
        assert_eq!(rows[0].cipher_text_base64, "v1");
    }

    #[tokio::test]
    async fn update_missing_row_affects_nothing() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.update(&record("abc", "k", "v1")).await.unwrap(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn update_overwrites_existing_row() {
        let store = MemoryRecordStore::new();
        store.insert(&record("abc", "k", "v1")).await.unwrap();
        assert_eq!(store.update(&record("abc", "k", "v2")).await.unwrap(), 1);

        let rows = store.fetch_all("abc").await.unwrap();
        assert_eq!(rows[0].cipher_text_base64, "v2");
    }

    #[tokio::test]
    async fn apply_commits_when_every_write_hits_one_row() {
        let store = MemoryRecordStore::new();
        store.insert(&record("abc", "old", "v1")).await.unwrap();

        let outcome = store
            .apply(&[
                RecordWrite::Update(record("abc", "old", "v2")),
                RecordWrite::Insert(record("abc", "new", "n1")),
            ])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::Committed);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn apply_rolls_back_whole_batch_on_conflict() {
        let store = MemoryRecordStore::new();
        store.insert(&record("abc", "taken", "v1")).await.unwrap();

        let outcome = store
            .apply(&[
                RecordWrite::Insert(record("abc", "fresh", "f1")),
                RecordWrite::Insert(record("abc", "taken", "v2")),
            ])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            BatchOutcome::Aborted {
                index: 1,
                affected: 0
            }
        );
        let rows = store.fetch_all("abc").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cipher_text_base64, "v1");
    }

    #[tokio::test]
    async fn apply_sees_earlier_writes_in_the_same_batch() {
        let store = MemoryRecordStore::new();
        let outcome = store
            .apply(&[
                RecordWrite::Insert(record("abc", "k", "v1")),
                RecordWrite::Update(record("abc", "k", "v2")),
            ])
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::Committed);
        let rows = store.fetch_all("abc").await.unwrap();
        assert_eq!(rows[0].cipher_text_base64, "v2");
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryRecordStore::new();
        let clone = store.clone();
        store.insert(&record("abc", "k", "v")).await.unwrap();
        assert_eq!(clone.fetch_all("abc").await.unwrap().len(), 1);
    }

    #[test]
    fn record_serializes_with_wire_field_names() {
        let json = serde_json::to_value(record("abc", "k", "v")).unwrap();
        assert_eq!(json["accountId"], "abc");
        assert_eq!(json["key"], "k");
        assert_eq!(json["ivBase64"], "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(json["cipherTextBase64"], "v");
    }
}
