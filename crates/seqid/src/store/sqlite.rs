use crate::{LockRecord, LockStore, SequenceConfig, SequenceStore, StoreError};
use core::time::Duration;
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::{path::Path, sync::Arc};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lock_record (
    lock_key    TEXT PRIMARY KEY NOT NULL,
    lock_value  TEXT NOT NULL,
    holder_info TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_lock_record_expires_at ON lock_record (expires_at);

CREATE TABLE IF NOT EXISTS sequence_config (
    alloc_key          TEXT PRIMARY KEY NOT NULL,
    prefix             TEXT NOT NULL,
    date_format        TEXT NOT NULL,
    padding_length     INTEGER NOT NULL,
    batch_size         INTEGER NOT NULL,
    current_cursor     INTEGER NOT NULL CHECK (current_cursor >= 1),
    overflow_position  INTEGER NOT NULL DEFAULT 0,
    last_rollover_date TEXT NOT NULL
);
"#;

const LOCK_COLUMNS: &str =
    "lock_key, lock_value, holder_info, created_at, expires_at, retry_count";

const SEQUENCE_COLUMNS: &str = "alloc_key, prefix, date_format, padding_length, batch_size, \
     current_cursor, overflow_position, last_rollover_date";

/// Default time a connection waits on another process's write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A SQLite-backed store implementing both tables.
///
/// Every process opens its own `SqliteStore` on the same database file. The
/// file is switched to WAL mode so readers do not block the lease writer, and
/// a busy timeout absorbs short write contention between processes.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    /// A private in-memory database, mostly useful in tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection, creating the schema if it is missing.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lists every sequence row, ordered by key.
    pub fn list_sequences(&self) -> Result<Vec<SequenceConfig>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequence_config ORDER BY alloc_key"
        ))?;
        let rows = stmt.query_map([], raw_sequence)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_config()?);
        }
        Ok(out)
    }
}

impl LockStore for SqliteStore {
    fn insert_lock(&self, record: &LockRecord) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let insert = conn.execute(
            &format!("INSERT INTO lock_record ({LOCK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
            params![
                record.lock_key,
                record.lock_value,
                record.holder_info,
                record.created_at,
                record.expires_at,
                record.retry_count,
            ],
        );
        match insert {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn delete_lock(&self, lock_key: &str, lock_value: &str) -> Result<bool, StoreError> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM lock_record WHERE lock_key = ?1 AND lock_value = ?2",
            params![lock_key, lock_value],
        )?;
        Ok(deleted > 0)
    }

    fn force_delete_lock(
        &self,
        lock_key: &str,
        max_retry_count: u32,
    ) -> Result<bool, StoreError> {
        let deleted = self.conn.lock().execute(
            "DELETE FROM lock_record WHERE lock_key = ?1 AND retry_count >= ?2",
            params![lock_key, max_retry_count],
        )?;
        Ok(deleted > 0)
    }

    fn delete_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError> {
        Ok(self.conn.lock().execute(
            "DELETE FROM lock_record WHERE expires_at < ?1",
            params![now_millis],
        )?)
    }

    fn increment_retry_count(&self, lock_key: &str) -> Result<Option<u32>, StoreError> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "UPDATE lock_record SET retry_count = retry_count + 1
                 WHERE lock_key = ?1
                 RETURNING retry_count",
                params![lock_key],
                |row| row.get::<_, u32>(0),
            )
            .optional()?)
    }

    fn delete_locks_over_retry_budget(
        &self,
        max_retry_count: u32,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let keys = {
            let mut stmt = tx.prepare(
                "DELETE FROM lock_record WHERE retry_count >= ?1 RETURNING lock_key",
            )?;
            let rows = stmt.query_map(params![max_retry_count], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;
        Ok(keys)
    }

    fn get_lock(&self, lock_key: &str) -> Result<Option<LockRecord>, StoreError> {
        Ok(self
            .conn
            .lock()
            .query_row(
                &format!("SELECT {LOCK_COLUMNS} FROM lock_record WHERE lock_key = ?1"),
                params![lock_key],
                lock_row,
            )
            .optional()?)
    }

    fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOCK_COLUMNS} FROM lock_record ORDER BY lock_key"
        ))?;
        let rows = stmt.query_map([], lock_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl SequenceStore for SqliteStore {
    fn load_sequence(&self, key: &str) -> Result<Option<SequenceConfig>, StoreError> {
        let raw = self
            .conn
            .lock()
            .query_row(
                &format!("SELECT {SEQUENCE_COLUMNS} FROM sequence_config WHERE alloc_key = ?1"),
                params![key],
                raw_sequence,
            )
            .optional()?;
        raw.map(RawSequence::into_config).transpose()
    }

    fn create_sequence(&self, config: &SequenceConfig) -> Result<SequenceConfig, StoreError> {
        let cursor = to_sql_cursor(&config.key, config.current_cursor)?;
        {
            let conn = self.conn.lock();
            conn.execute(
                &format!(
                    "INSERT INTO sequence_config ({SEQUENCE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (alloc_key) DO NOTHING"
                ),
                params![
                    config.key,
                    config.prefix,
                    config.date_format,
                    config.padding_length,
                    config.batch_size,
                    cursor,
                    config.overflow_position,
                    config.last_rollover_date,
                ],
            )?;
        }
        self.load_sequence(&config.key)?
            .ok_or_else(|| StoreError::Corrupt {
                table: "sequence_config",
                key: config.key.clone(),
                reason: "row missing right after insert".into(),
            })
    }

    fn update_cursor(
        &self,
        key: &str,
        current_cursor: u64,
        overflow_position: u32,
        last_rollover_date: &str,
    ) -> Result<bool, StoreError> {
        let cursor = to_sql_cursor(key, current_cursor)?;
        let updated = self.conn.lock().execute(
            "UPDATE sequence_config
             SET current_cursor = ?2, overflow_position = ?3, last_rollover_date = ?4
             WHERE alloc_key = ?1",
            params![key, cursor, overflow_position, last_rollover_date],
        )?;
        Ok(updated > 0)
    }
}

fn lock_row(row: &Row<'_>) -> rusqlite::Result<LockRecord> {
    Ok(LockRecord {
        lock_key: row.get(0)?,
        lock_value: row.get(1)?,
        holder_info: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        retry_count: row.get(5)?,
    })
}

/// A `sequence_config` row before the cursor is range-checked.
struct RawSequence {
    config: SequenceConfig,
    cursor: i64,
}

fn raw_sequence(row: &Row<'_>) -> rusqlite::Result<RawSequence> {
    Ok(RawSequence {
        config: SequenceConfig {
            key: row.get(0)?,
            prefix: row.get(1)?,
            date_format: row.get(2)?,
            padding_length: row.get(3)?,
            batch_size: row.get(4)?,
            current_cursor: 0,
            overflow_position: row.get(6)?,
            last_rollover_date: row.get(7)?,
        },
        cursor: row.get(5)?,
    })
}

impl RawSequence {
    fn into_config(self) -> Result<SequenceConfig, StoreError> {
        let RawSequence { mut config, cursor } = self;
        config.current_cursor = u64::try_from(cursor)
            .ok()
            .filter(|cursor| *cursor >= 1)
            .ok_or_else(|| StoreError::Corrupt {
                table: "sequence_config",
                key: config.key.clone(),
                reason: format!("current_cursor {cursor} is not positive"),
            })?;
        Ok(config)
    }
}

fn to_sql_cursor(key: &str, cursor: u64) -> Result<i64, StoreError> {
    i64::try_from(cursor).map_err(|_| StoreError::Corrupt {
        table: "sequence_config",
        key: key.to_owned(),
        reason: format!("current_cursor {cursor} exceeds the INTEGER range"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, value: &str, expires_at: i64) -> LockRecord {
        LockRecord {
            lock_key: key.into(),
            lock_value: value.into(),
            holder_info: "test".into(),
            created_at: 1,
            expires_at,
            retry_count: 0,
        }
    }

    fn sequence(key: &str) -> SequenceConfig {
        SequenceConfig {
            key: key.into(),
            prefix: "ORD".into(),
            date_format: "yyyyMMdd".into(),
            padding_length: 6,
            batch_size: 3,
            current_cursor: 1,
            overflow_position: 0,
            last_rollover_date: "20250617".into(),
        }
    }

    #[test]
    fn lock_rows_round_trip_and_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.insert_lock(&record("a", "1", 100)).unwrap());
        assert!(!store.insert_lock(&record("a", "2", 100)).unwrap());
        assert_eq!(store.get_lock("a").unwrap(), Some(record("a", "1", 100)));

        assert!(!store.delete_lock("a", "2").unwrap());
        assert!(store.delete_lock("a", "1").unwrap());
        assert!(store.get_lock("a").unwrap().is_none());
    }

    #[test]
    fn expiry_retry_and_force_release() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_lock(&record("old", "1", 10)).unwrap();
        store.insert_lock(&record("stuck", "2", 1_000)).unwrap();

        assert_eq!(store.delete_expired_locks(11).unwrap(), 1);
        assert_eq!(store.increment_retry_count("stuck").unwrap(), Some(1));
        assert_eq!(store.increment_retry_count("stuck").unwrap(), Some(2));
        assert_eq!(store.increment_retry_count("old").unwrap(), None);

        assert!(store.delete_locks_over_retry_budget(5).unwrap().is_empty());
        assert_eq!(store.delete_locks_over_retry_budget(2).unwrap(), ["stuck"]);
        assert!(store.list_locks().unwrap().is_empty());

        store.insert_lock(&record("x", "3", 1_000)).unwrap();
        assert!(!store.force_delete_lock("x", 1).unwrap());
        store.increment_retry_count("x").unwrap();
        assert!(store.force_delete_lock("x", 1).unwrap());
        assert!(!store.force_delete_lock("x", 0).unwrap());
    }

    #[test]
    fn create_sequence_keeps_the_first_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.create_sequence(&sequence("order")).unwrap();
        assert_eq!(first, sequence("order"));

        let mut other = sequence("order");
        other.prefix = "XYZ".into();
        assert_eq!(store.create_sequence(&other).unwrap().prefix, "ORD");

        assert!(store.update_cursor("order", 4, 1, "20250618").unwrap());
        let row = store.load_sequence("order").unwrap().unwrap();
        assert_eq!(
            (row.current_cursor, row.overflow_position, row.last_rollover_date.as_str()),
            (4, 1, "20250618")
        );
        assert!(!store.update_cursor("missing", 1, 0, "").unwrap());
        assert_eq!(store.list_sequences().unwrap().len(), 1);
    }

    #[test]
    fn cursor_past_integer_range_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_sequence(&sequence("order")).unwrap();
        assert!(matches!(
            store.update_cursor("order", u64::MAX, 0, ""),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn separate_connections_share_the_lock_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seqid.db");
        let first = SqliteStore::open(&path).unwrap();
        let second = SqliteStore::open(&path).unwrap();

        assert!(first.insert_lock(&record("k", "first", 100)).unwrap());
        assert!(!second.insert_lock(&record("k", "second", 100)).unwrap());
        assert_eq!(second.get_lock("k").unwrap().unwrap().lock_value, "first");
        assert!(first.delete_lock("k", "first").unwrap());
        assert!(second.insert_lock(&record("k", "second", 100)).unwrap());
    }
}
