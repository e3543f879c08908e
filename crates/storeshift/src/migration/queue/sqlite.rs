//! SQLite-backed shadow queue.
//!
//! Entries survive a process restart. The full [`ShadowWrite`] is stored as
//! JSON next to the key and operation columns, which exist for operators
//! inspecting the file by hand.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use storeshift_core::migration::{QueuedWrite, ShadowWrite};
use storeshift_core::model::{EntityKey, Timestamp};

use super::{QueueError, QueueResult, ShadowQueue};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS shadow_writes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_attempt_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_shadow_writes_key
    ON shadow_writes(entity_type, entity_id);
"#;

const INSERT_WRITE: &str = r#"
INSERT INTO shadow_writes (entity_type, entity_id, operation, payload, next_attempt_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#;

const SELECT_PENDING: &str = r#"
SELECT seq, payload, attempts, last_error, next_attempt_at
FROM shadow_writes
WHERE seq > ?1
ORDER BY seq
LIMIT ?2
"#;

const SELECT_FAILURES: &str = r#"
SELECT seq, payload, attempts, last_error, next_attempt_at
FROM shadow_writes
WHERE attempts > 0
ORDER BY seq
"#;

const DELETE_WRITE: &str = "DELETE FROM shadow_writes WHERE seq = ?1";

const RECORD_FAILURE: &str = r#"
UPDATE shadow_writes
SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3
WHERE seq = ?1
"#;

const SELECT_KEY_PENDING: &str =
    "SELECT 1 FROM shadow_writes WHERE entity_type = ?1 AND entity_id = ?2 LIMIT 1";

const COUNT_WRITES: &str = "SELECT COUNT(*) FROM shadow_writes";

/// Helper to wrap rusqlite errors for tokio_rusqlite closures.
fn wrap_err(e: rusqlite::Error) -> tokio_rusqlite::Error {
    tokio_rusqlite::Error::Rusqlite(e)
}

fn storage_err(e: tokio_rusqlite::Error) -> QueueError {
    QueueError::Storage(e.to_string())
}

type Row = (i64, String, i64, Option<String>, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn row_to_entry((seq, payload, attempts, last_error, next_attempt_at): Row) -> QueueResult<QueuedWrite> {
    let write: ShadowWrite = serde_json::from_str(&payload)?;
    let next_attempt_at = Timestamp::from_millis(next_attempt_at).ok_or_else(|| {
        QueueError::Storage(format!("entry {seq} has an invalid next_attempt_at"))
    })?;
    Ok(QueuedWrite {
        seq: seq as u64,
        write,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error,
        next_attempt_at,
    })
}

/// Shadow queue stored in a SQLite file.
pub struct SqliteShadowQueue {
    conn: Connection,
}

impl SqliteShadowQueue {
    /// Opens (or creates) the queue file.
    pub async fn open(path: impl AsRef<Path>) -> QueueResult<Self> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(storage_err)?;
        Self::init_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Creates a queue that lives only as long as the connection.
    pub async fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Self::init_schema(&conn).await?;
        Ok(Self { conn })
    }

    async fn init_schema(conn: &Connection) -> QueueResult<()> {
        conn.call(|conn| {
            conn.execute_batch(CREATE_TABLES).map_err(wrap_err)?;
            Ok(())
        })
        .await
        .map_err(storage_err)
    }

    async fn select(&self, sql: &'static str, params: Vec<i64>) -> QueueResult<Vec<QueuedWrite>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql).map_err(wrap_err)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), read_row)
                    .map_err(wrap_err)?;

                let mut out = Vec::new();
                for row in rows {
                    out.push(row.map_err(wrap_err)?);
                }
                Ok(out)
            })
            .await
            .map_err(storage_err)?;

        rows.into_iter().map(row_to_entry).collect()
    }
}

#[async_trait]
impl ShadowQueue for SqliteShadowQueue {
    async fn enqueue(&self, write: ShadowWrite) -> QueueResult<u64> {
        let payload = serde_json::to_string(&write)?;
        let entity_type = write.key.entity_type.to_string();
        let entity_id = write.key.id.to_string();
        let operation = write.operation.as_str();
        let next_attempt_at = write.submitted_at.timestamp_millis();

        let seq = self
            .conn
            .call(move |conn| {
                conn.execute(
                    INSERT_WRITE,
                    rusqlite::params![entity_type, entity_id, operation, payload, next_attempt_at],
                )
                .map_err(wrap_err)?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(storage_err)?;
        Ok(seq as u64)
    }

    async fn pending_after(&self, after: u64, limit: usize) -> QueueResult<Vec<QueuedWrite>> {
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.select(SELECT_PENDING, vec![after, limit]).await
    }

    async fn ack(&self, seq: u64) -> QueueResult<()> {
        let seq = seq as i64;
        self.conn
            .call(move |conn| {
                conn.execute(DELETE_WRITE, [seq]).map_err(wrap_err)?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn record_failure(
        &self,
        seq: u64,
        error: &str,
        next_attempt_at: Timestamp,
    ) -> QueueResult<()> {
        let seq = seq as i64;
        let error = error.to_string();
        let next_attempt_at = next_attempt_at.timestamp_millis();
        self.conn
            .call(move |conn| {
                conn.execute(
                    RECORD_FAILURE,
                    rusqlite::params![seq, error, next_attempt_at],
                )
                .map_err(wrap_err)?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn has_pending(&self, key: &EntityKey) -> QueueResult<bool> {
        let entity_type = key.entity_type.to_string();
        let entity_id = key.id.to_string();
        self.conn
            .call(move |conn| {
                let found: Option<i64> = conn
                    .query_row(SELECT_KEY_PENDING, [&entity_type, &entity_id], |row| {
                        row.get(0)
                    })
                    .optional()
                    .map_err(wrap_err)?;
                Ok(found.is_some())
            })
            .await
            .map_err(storage_err)
    }

    async fn failures(&self) -> QueueResult<Vec<QueuedWrite>> {
        self.select(SELECT_FAILURES, Vec::new()).await
    }

    async fn len(&self) -> QueueResult<u64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row(COUNT_WRITES, [], |row| row.get(0))
                    .map_err(wrap_err)?;
                Ok(count)
            })
            .await
            .map_err(storage_err)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeshift_core::migration::{Mutation, Operation};
    use storeshift_core::model::{Entity, User};

    fn create_write(user: &User) -> ShadowWrite {
        ShadowWrite::new(
            user.entity_key(),
            Operation::Create,
            Mutation::Create(user.clone().into_record()),
        )
    }

    #[tokio::test]
    async fn test_enqueue_and_pending_preserves_payload() {
        let queue = SqliteShadowQueue::open_in_memory().await.unwrap();
        let user = User::new("Ana", "a@x.com", "h1");
        let write = create_write(&user);

        let seq = queue.enqueue(write.clone()).await.unwrap();

        let pending = queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, seq);
        assert_eq!(pending[0].write, write);
        assert_eq!(pending[0].attempts, 0);
        assert!(queue.has_pending(&user.entity_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_failure_and_ack() {
        let queue = SqliteShadowQueue::open_in_memory().await.unwrap();
        let user = User::new("Ana", "a@x.com", "h1");
        let seq = queue.enqueue(create_write(&user)).await.unwrap();

        let retry_at = Timestamp::from_millis(1_700_000_000_000).unwrap();
        queue.record_failure(seq, "timed out", retry_at).await.unwrap();
        queue.record_failure(seq, "timed out again", retry_at).await.unwrap();

        let failures = queue.failures().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(failures[0].last_error.as_deref(), Some("timed out again"));
        assert_eq!(failures[0].next_attempt_at, retry_at);

        queue.ack(seq).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_after_pages_by_seq() {
        let queue = SqliteShadowQueue::open_in_memory().await.unwrap();
        let mut seqs = Vec::new();
        for n in 0..3 {
            let user = User::new("Ana", format!("a{n}@x.com"), "h1");
            seqs.push(queue.enqueue(create_write(&user)).await.unwrap());
        }

        let page = queue.pending_after(seqs[0], 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].seq, seqs[1]);
        let rest = queue.pending_after(seqs[1], 10).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![seqs[2]]);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow.db");
        let user = User::new("Ana", "a@x.com", "h1");

        {
            let queue = SqliteShadowQueue::open(&path).await.unwrap();
            queue.enqueue(create_write(&user)).await.unwrap();
        }

        let reopened = SqliteShadowQueue::open(&path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
        let pending = reopened.pending(10).await.unwrap();
        assert_eq!(pending[0].write.key, user.entity_key());
        assert_eq!(pending[0].write.operation, Operation::Create);
    }
}
