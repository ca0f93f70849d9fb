use crate::{LockRecord, LockStore, SequenceConfig, SequenceStore, StoreError};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicBool, Ordering},
};

/// An in-process store implementing both tables.
///
/// Sharing one instance through an `Arc` between several allocators behaves
/// like several processes sharing a database. [`MemoryStore::set_offline`]
/// makes every call fail, for exercising fail-closed paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    locks: Mutex<BTreeMap<String, LockRecord>>,
    sequences: Mutex<HashMap<String, SequenceConfig>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every operation returns [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    fn online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

impl LockStore for MemoryStore {
    fn insert_lock(&self, record: &LockRecord) -> Result<bool, StoreError> {
        self.online()?;
        let mut locks = self.locks.lock();
        if locks.contains_key(&record.lock_key) {
            return Ok(false);
        }
        locks.insert(record.lock_key.clone(), record.clone());
        Ok(true)
    }

    fn delete_lock(&self, lock_key: &str, lock_value: &str) -> Result<bool, StoreError> {
        self.online()?;
        let mut locks = self.locks.lock();
        match locks.get(lock_key) {
            Some(record) if record.lock_value == lock_value => {
                locks.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn force_delete_lock(
        &self,
        lock_key: &str,
        max_retry_count: u32,
    ) -> Result<bool, StoreError> {
        self.online()?;
        let mut locks = self.locks.lock();
        match locks.get(lock_key) {
            Some(record) if record.retry_count >= max_retry_count => {
                locks.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_expired_locks(&self, now_millis: i64) -> Result<usize, StoreError> {
        self.online()?;
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, record| record.expires_at >= now_millis);
        Ok(before - locks.len())
    }

    fn increment_retry_count(&self, lock_key: &str) -> Result<Option<u32>, StoreError> {
        self.online()?;
        Ok(self.locks.lock().get_mut(lock_key).map(|record| {
            record.retry_count = record.retry_count.saturating_add(1);
            record.retry_count
        }))
    }

    fn delete_locks_over_retry_budget(
        &self,
        max_retry_count: u32,
    ) -> Result<Vec<String>, StoreError> {
        self.online()?;
        let mut locks = self.locks.lock();
        let stuck: Vec<String> = locks
            .values()
            .filter(|record| record.retry_count >= max_retry_count)
            .map(|record| record.lock_key.clone())
            .collect();
        for key in &stuck {
            locks.remove(key);
        }
        Ok(stuck)
    }

    fn get_lock(&self, lock_key: &str) -> Result<Option<LockRecord>, StoreError> {
        self.online()?;
        Ok(self.locks.lock().get(lock_key).cloned())
    }

    fn list_locks(&self) -> Result<Vec<LockRecord>, StoreError> {
        self.online()?;
        Ok(self.locks.lock().values().cloned().collect())
    }
}

impl SequenceStore for MemoryStore {
    fn load_sequence(&self, key: &str) -> Result<Option<SequenceConfig>, StoreError> {
        self.online()?;
        Ok(self.sequences.lock().get(key).cloned())
    }

    fn create_sequence(&self, config: &SequenceConfig) -> Result<SequenceConfig, StoreError> {
        self.online()?;
        Ok(self
            .sequences
            .lock()
            .entry(config.key.clone())
            .or_insert_with(|| config.clone())
            .clone())
    }

    fn update_cursor(
        &self,
        key: &str,
        current_cursor: u64,
        overflow_position: u32,
        last_rollover_date: &str,
    ) -> Result<bool, StoreError> {
        self.online()?;
        let mut sequences = self.sequences.lock();
        let Some(row) = sequences.get_mut(key) else {
            return Ok(false);
        };
        row.current_cursor = current_cursor;
        row.overflow_position = overflow_position;
        row.last_rollover_date = last_rollover_date.to_owned();
        Ok(true)
    }
}
