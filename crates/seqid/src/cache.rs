use crate::SequenceConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Reserved-but-unissued IDs for one key, plus the last config seen for it.
#[derive(Clone, Debug, Default)]
pub struct CachedBatch {
    ids: VecDeque<String>,
    config: Option<SequenceConfig>,
}

impl CachedBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn config(&self) -> Option<&SequenceConfig> {
        self.config.as_ref()
    }
}

/// A process-local FIFO of minted IDs per key.
///
/// Every operation runs under one mutex, so a pop can never observe a
/// half-applied refill and two pops can never return the same ID. The cursor
/// in the store has already moved past every cached ID, so losing the cache
/// (restart, [`BatchCache::clear`]) only leaves gaps.
#[derive(Debug, Default)]
pub struct BatchCache {
    entries: Mutex<HashMap<String, CachedBatch>>,
}

impl BatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the oldest cached ID for `key`.
    pub fn pop(&self, key: &str) -> Option<String> {
        self.entries.lock().get_mut(key)?.ids.pop_front()
    }

    /// Appends `ids` after anything already cached for `key` and records
    /// `config` as the latest snapshot.
    pub fn refill<I>(&self, key: &str, ids: I, config: SequenceConfig)
    where
        I: IntoIterator<Item = String>,
    {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_owned()).or_default();
        entry.ids.extend(ids);
        entry.config = Some(config);
    }

    /// Number of IDs cached for `key`.
    pub fn len(&self, key: &str) -> usize {
        self.entries.lock().get(key).map_or(0, CachedBatch::len)
    }

    /// The last config snapshot recorded for `key`.
    pub fn config(&self, key: &str) -> Option<SequenceConfig> {
        self.entries.lock().get(key)?.config.clone()
    }

    /// A copy of the whole entry for `key`.
    pub fn snapshot(&self, key: &str) -> Option<CachedBatch> {
        self.entries.lock().get(key).cloned()
    }

    /// Drops everything cached for `key`. The dropped IDs are never issued.
    pub fn clear(&self, key: &str) -> usize {
        self.entries
            .lock()
            .remove(key)
            .map_or(0, |entry| entry.ids.len())
    }
}
