//! `PostgreSQL` record store.
//!
//! Stores one row per attribute in the `account_attributes` table, keyed by
//! `(account_id, key)`. The IV and ciphertext columns are written together
//! in every statement so they can never drift apart.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime; the pool is built once at startup and shared by every request.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;

use crate::{AttributeRecord, BatchOutcome, RecordStore, RecordWrite, StorageError};

const INSERT_SQL: &str = "INSERT INTO account_attributes (account_id, key, iv, cipher_text) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (account_id, key) DO NOTHING";

const UPDATE_SQL: &str = "UPDATE account_attributes SET iv = $3, cipher_text = $4 \
     WHERE account_id = $1 AND key = $2";

/// A record store backed by `PostgreSQL`.
///
/// Thread-safe via `PgPool`. All operations are fully async.
///
/// # Examples
///
/// ```no_run
/// # use shiblink_storage::PostgresRecordStore;
/// # #[tokio::main]
/// # async fn main() {
/// let store = PostgresRecordStore::connect("postgres://localhost/shiblink", 10).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

impl PostgresRecordStore {
    /// Connect to `PostgreSQL` and create the attribute table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                target: "[redacted database url]".to_owned(),
                reason: e.to_string(),
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS account_attributes (\
                account_id  TEXT NOT NULL, \
                key         TEXT NOT NULL, \
                iv          TEXT NOT NULL, \
                cipher_text TEXT NOT NULL, \
                PRIMARY KEY (account_id, key)\
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            target: "account_attributes".to_owned(),
            reason: format!("migration failed: {e}"),
        })?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool. The table must already exist.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn write_error(record: &AttributeRecord, err: &sqlx::Error) -> StorageError {
    StorageError::Write {
        account_id: record.account_id.clone(),
        key: record.key.clone(),
        reason: err.to_string(),
    }
}

async fn execute_write(
    tx: &mut Transaction<'_, Postgres>,
    write: &RecordWrite,
) -> Result<u64, StorageError> {
    let (sql, record) = match write {
        RecordWrite::Insert(record) => (INSERT_SQL, record),
        RecordWrite::Update(record) => (UPDATE_SQL, record),
    };
    let result = sqlx::query(sql)
        .bind(&record.account_id)
        .bind(&record.key)
        .bind(&record.iv_base64)
        .bind(&record.cipher_text_base64)
        .execute(&mut **tx)
        .await
        .map_err(|e| write_error(record, &e))?;
    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl RecordStore for PostgresRecordStore {
    async fn fetch_all(&self, account_id: &str) -> Result<Vec<AttributeRecord>, StorageError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT key, iv, cipher_text FROM account_attributes \
             WHERE account_id = $1 ORDER BY key",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Read {
            account_id: account_id.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows
            .into_iter()
            .map(|(key, iv_base64, cipher_text_base64)| AttributeRecord {
                account_id: account_id.to_owned(),
                key,
                iv_base64,
                cipher_text_base64,
            })
            .collect())
    }

    async fn insert(&self, record: &AttributeRecord) -> Result<u64, StorageError> {
        let result = sqlx::query(INSERT_SQL)
            .bind(&record.account_id)
            .bind(&record.key)
            .bind(&record.iv_base64)
            .bind(&record.cipher_text_base64)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(record, &e))?;
        Ok(result.rows_affected())
    }

    async fn update(&self, record: &AttributeRecord) -> Result<u64, StorageError> {
        let result = sqlx::query(UPDATE_SQL)
            .bind(&record.account_id)
            .bind(&record.key)
            .bind(&record.iv_base64)
            .bind(&record.cipher_text_base64)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(record, &e))?;
        Ok(result.rows_affected())
    }

    async fn apply(&self, writes: &[RecordWrite]) -> Result<BatchOutcome, StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Transaction {
                reason: format!("begin failed: {e}"),
            })?;

        for (index, write) in writes.iter().enumerate() {
            let affected = execute_write(&mut tx, write).await?;
            if affected != 1 {
                let record = write.record();
                warn!(
                    index,
                    affected,
                    account_id = %record.account_id,
                    key = %record.key,
                    "record batch rolled back"
                );
                tx.rollback().await.map_err(|e| StorageError::Transaction {
                    reason: format!("rollback failed: {e}"),
                })?;
                return Ok(BatchOutcome::Aborted { index, affected });
            }
        }

        tx.commit().await.map_err(|e| StorageError::Transaction {
            reason: format!("commit failed: {e}"),
        })?;
        Ok(BatchOutcome::Committed)
    }
}
