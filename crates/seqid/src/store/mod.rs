//! Persistence seams for lease records and sequence rows.
//!
//! Both tables live in the same relational datastore in production. The
//! uniqueness of `lock_record.lock_key` is the only thing providing mutual
//! exclusion, so every [`LockStore`] must reject a second insert for a key
//! that already has a row.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
#[cfg(feature = "sqlite")]
pub use sqlite::*;

use crate::SequenceConfig;
use thiserror::Error;

/// One held (or stale) lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockRecord {
    pub lock_key: String,
    /// Token proving ownership of this particular acquisition.
    pub lock_value: String,
    /// Diagnostic identity of the acquirer.
    pub holder_info: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds. The lease is held while `now < expires_at`.
    pub expires_at: i64,
    /// Failed acquisition attempts observed against this record.
    pub retry_count: u32,
}

impl LockRecord {
    pub fn is_held(&self, now_millis: i64) -> bool {
        now_millis < self.expires_at
    }
}

/// Failures reading or writing the datastore.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row holds a value that cannot be represented in memory.
    #[error("corrupt `{table}` row for `{key}`: {reason}")]
    Corrupt {
        table: &'static str,
        key: String,
        reason: String,
    },

    /// The store could not be reached at all.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for lease records.
pub trait LockStore {
    /// Inserts `record`. Returns `false` when a row for the key already
    /// exists.
    fn insert_lock(&self, record: &LockRecord) -> Result<bool, StoreError>;

    /// Deletes the row only if both key and value match.
    fn delete_lock(&self, lock_key: &str, lock_value: &str) -> Result<bool, StoreError>;

    /// Deletes the row for `lock_key`, whoever holds it, but only while its
    /// `retry_count >= max_retry_count`. A fresh lease granted after the
    /// stuck one was released starts at zero and is left alone.
    fn force_delete_lock(&self, lock_key: &str, max_retry_count: u32) -> Result<bool, StoreError>;

    /// Deletes every row whose `expires_at < now_millis`.
    fn delete_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError>;

    /// Increments `retry_count` on the row for `lock_key`, returning the new
    /// count, or `None` if no row exists.
    fn increment_retry_count(&self, lock_key: &str) -> Result<Option<u32>, StoreError>;

    /// Deletes every row whose `retry_count >= max_retry_count`, returning the
    /// keys that were released.
    fn delete_locks_over_retry_budget(
        &self,
        max_retry_count: u32,
    ) -> Result<Vec<String>, StoreError>;

    fn get_lock(&self, lock_key: &str) -> Result<Option<LockRecord>, StoreError>;

    /// All rows, ordered by key.
    fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError>;
}

/// Storage for sequence rows.
pub trait SequenceStore {
    fn load_sequence(&self, key: &str) -> Result<Option<SequenceConfig>, StoreError>;

    /// Inserts `config` unless a row for its key exists, and returns the row
    /// that is stored afterwards.
    fn create_sequence(&self, config: &SequenceConfig) -> Result<SequenceConfig, StoreError>;

    /// Writes the cursor state for `key`. Returns `false` if the row is gone.
    fn update_cursor(
        &self,
        key: &str,
        current_cursor: u64,
        overflow_position: u32,
        last_rollover_date: &str,
    ) -> Result<bool, StoreError>;
}
