//! Batched, lease-protected sequence allocation.
//!
//! [`SequenceAllocator::next`] serves IDs from the local [`BatchCache`] when
//! it can. On a miss it takes the key's lease, mints a whole batch from the
//! persisted cursor, writes the advanced cursor back and caches everything
//! but the first ID. Only the lease holder ever moves a cursor, so IDs are
//! unique across every process sharing the store.


use crate::{
    BatchCache, DatePattern, Error, LeaseGuard, LeaseLockManager, LockOptions, LockStore, Result,
    SequenceConfig, SequenceOptions, SequenceRegistry, SequenceStore, TimeSource, mint_batch,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Prefix applied to an allocation key to form its lease key.
pub const LOCK_KEY_PREFIX: &str = "seqid:";

/// The lease key guarding allocation for `key`.
pub fn lock_key_for(key: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{key}")
}

/// Hands out unique, formatted sequence IDs.
///
/// # Example
///
/// ```
/// use seqid::{ManualClock, MemoryStore, SequenceAllocator, SequenceOptions};
/// use std::sync::Arc;
///
/// let clock = ManualClock::from_rfc3339("2025-06-17T09:00:00+00:00").unwrap();
/// let allocator = SequenceAllocator::new(Arc::new(MemoryStore::new()), clock);
/// allocator
///     .register(
///         "order",
///         SequenceOptions::new("ORD").with_padding_length(6).with_batch_size(3),
///     )
///     .unwrap();
///
/// assert_eq!(allocator.allocate("order").unwrap(), "ORD20250617000001");
/// assert_eq!(allocator.allocate("order").unwrap(), "ORD20250617000002");
/// ```
#[derive(Debug)]
pub struct SequenceAllocator<S, T> {
    locks: Arc<LeaseLockManager<S, T>>,
    store: Arc<S>,
    cache: BatchCache,
    registry: SequenceRegistry,
}

impl<S, T> SequenceAllocator<S, T>
where
    S: LockStore + SequenceStore,
    T: TimeSource,
{
    /// An allocator with default [`LockOptions`].
    pub fn new(store: Arc<S>, clock: T) -> Self {
        Self::with_lock_options(store, clock, LockOptions::default())
    }

    pub fn with_lock_options(store: Arc<S>, clock: T, options: LockOptions) -> Self {
        let locks = LeaseLockManager::with_options(Arc::clone(&store), clock, options);
        Self::with_parts(Arc::new(locks), BatchCache::new(), SequenceRegistry::new())
    }

    /// Builds an allocator around an existing lock manager, which may be
    /// shared with a [`crate::LeaseSweeper`].
    pub fn with_parts(
        locks: Arc<LeaseLockManager<S, T>>,
        cache: BatchCache,
        registry: SequenceRegistry,
    ) -> Self {
        Self {
            store: Arc::clone(locks.store()),
            locks,
            cache,
            registry,
        }
    }

    pub fn lock_manager(&self) -> &Arc<LeaseLockManager<S, T>> {
        &self.locks
    }

    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    /// Registers the options used by [`Self::allocate`] for `key`.
    pub fn register(&self, key: impl Into<String>, options: SequenceOptions) -> Result<()> {
        self.registry.register(key, options)
    }

    /// Allocates the next ID for a registered key.
    pub fn allocate(&self, key: &str) -> Result<String> {
        let options = self
            .registry
            .get(key)
            .ok_or_else(|| Error::UnknownKey(key.to_owned()))?;
        self.next(key, &options)
    }

    /// Allocates the next ID for `key`.
    ///
    /// `options` are only used to create the key's row the first time it is
    /// seen. Once the row exists its stored parameters win. They are checked
    /// on every refill; a cache hit returns without looking at them.
    pub fn next(&self, key: &str, options: &SequenceOptions) -> Result<String> {
        if let Some(id) = self.cache.pop(key) {
            trace!(key, "served from cache");
            return Ok(id);
        }
        self.refill(key, options)
    }

    /// Last config snapshot cached for `key`.
    pub fn cached_config(&self, key: &str) -> Option<SequenceConfig> {
        self.cache.config(key)
    }

    /// Number of reserved IDs waiting in the local cache for `key`.
    pub fn cached_len(&self, key: &str) -> usize {
        self.cache.len(key)
    }

    /// Discards the IDs cached for `key`, returning how many were dropped.
    /// They leave a gap in the sequence; the next call mints a fresh batch.
    pub fn clear_cache(&self, key: &str) -> usize {
        self.cache.clear(key)
    }

    #[instrument(level = "debug", skip(self, options), err(level = "debug"))]
    fn refill(&self, key: &str, options: &SequenceOptions) -> Result<String> {
        options.validate(key)?;
        let guard = self.locks.acquire(&lock_key_for(key))?;

        // Another thread may have refilled while we waited for the lease.
        if let Some(id) = self.cache.pop(key) {
            self.release(guard, key)?;
            return Ok(id);
        }

        let now = self.locks.clock().now();
        let mut config = match self.store.load_sequence(key)? {
            Some(config) => config,
            None => {
                let today = DatePattern::parse(&options.date_format)?.stamp(&now);
                let created = self
                    .store
                    .create_sequence(&SequenceConfig::from_options(key, options, today))?;
                info!(key, prefix = %created.prefix, "created sequence");
                created
            }
        };
        config.options().validate(key)?;

        let today = DatePattern::parse(&config.date_format)?.stamp(&now);
        if config.last_rollover_date != today {
            if !self.store.update_cursor(key, 1, 0, &today)? {
                return Err(Error::SequenceMissing(key.to_owned()));
            }
            info!(
                key,
                from = %config.last_rollover_date,
                to = %today,
                "sequence rolled over"
            );
            config.current_cursor = 1;
            config.overflow_position = 0;
            config.last_rollover_date = today.clone();
        }

        let minted = mint_batch(&config, &today)?;
        if !self
            .store
            .update_cursor(key, minted.next_cursor, minted.next_overflow, &today)?
        {
            return Err(Error::SequenceMissing(key.to_owned()));
        }
        if minted.next_overflow > config.overflow_position {
            warn!(
                key,
                overflow_position = minted.next_overflow,
                "numeric range exhausted for the day, widening overflow letters"
            );
        }
        debug!(
            key,
            from = config.current_cursor,
            to = minted.next_cursor,
            batch = minted.ids.len(),
            "minted batch"
        );

        config.current_cursor = minted.next_cursor;
        config.overflow_position = minted.next_overflow;

        let mut ids = minted.ids.into_iter();
        let first = ids
            .next()
            .ok_or_else(|| Error::CursorOverflow(key.to_owned()))?;
        self.cache.refill(key, ids, config);

        self.release(guard, key)?;
        Ok(first)
    }

    fn release(&self, guard: LeaseGuard<'_, S, T>, key: &str) -> Result<()> {
        if !guard.release()? {
            warn!(
                key,
                lease = ?self.locks.options().lease_duration,
                "lease expired before the allocation finished; ids may overlap with another holder"
            );
        }
        Ok(())
    }
}
