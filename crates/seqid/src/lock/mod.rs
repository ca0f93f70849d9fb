//! Lease locks stored as rows in a relational table.
//!
//! A lease is held by whoever managed to insert the row for its key. Waiters
//! poll: each attempt first clears expired rows, then tries the insert, and
//! on conflict bumps the holder's `retry_count`. A row whose retry count
//! reaches the configured budget is presumed stuck and may be deleted by a
//! waiter, trading a brief window of overlapping holders for progress.

mod sweeper;

pub use sweeper::*;

use crate::{Error, LockOptions, LockRecord, LockStore, Result, TimeSource};
use core::time::Duration;
use rand::{Rng, rng};
use std::{sync::Arc, thread, time::Instant};
use tracing::{debug, instrument, trace, warn};

/// Proof of one successful acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    value: String,
    expires_at: i64,
}

impl LockToken {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The opaque value stored in `lock_value`.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Epoch milliseconds after which anyone may reclaim the lease.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

/// What a single [`LeaseLockManager::sweep`] removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows deleted because their lease had expired.
    pub expired: usize,
    /// Keys force-released because their retry budget was exhausted.
    pub forced: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.forced.is_empty()
    }
}

/// Acquires and releases leases on top of a [`LockStore`].
///
/// Wait timeouts are measured on the local monotonic clock; lease timestamps
/// come from the [`TimeSource`], which must agree across processes.
///
/// # Example
///
/// ```
/// use seqid::{LeaseLockManager, MemoryStore, SystemClock};
/// use std::{sync::Arc, time::Duration};
///
/// let locks = LeaseLockManager::new(Arc::new(MemoryStore::new()), SystemClock::utc());
/// let token = locks
///     .try_lock("invoice", Duration::from_millis(100), Duration::from_secs(5))
///     .unwrap();
/// assert!(locks.unlock(&token).unwrap());
/// ```
#[derive(Debug)]
pub struct LeaseLockManager<S, T> {
    store: Arc<S>,
    clock: T,
    options: LockOptions,
}

impl<S, T> LeaseLockManager<S, T>
where
    S: LockStore,
    T: TimeSource,
{
    pub fn new(store: Arc<S>, clock: T) -> Self {
        Self::with_options(store, clock, LockOptions::default())
    }

    pub fn with_options(store: Arc<S>, clock: T, options: LockOptions) -> Self {
        Self {
            store,
            clock,
            options,
        }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    /// [`Self::try_lock`] with the configured wait timeout and lease duration.
    pub fn lock(&self, key: &str) -> Result<LockToken> {
        self.try_lock(key, self.options.wait_timeout, self.options.lease_duration)
    }

    /// Like [`Self::lock`], but releases the lease when the guard drops.
    pub fn acquire(&self, key: &str) -> Result<LeaseGuard<'_, S, T>> {
        let token = self.lock(key)?;
        Ok(LeaseGuard {
            manager: self,
            token: Some(token),
        })
    }

    /// Polls for the lease on `key` for up to `wait_timeout`.
    ///
    /// At least one attempt is always made, even with a zero timeout. Any store
    /// failure aborts the wait and is returned as-is: the caller never holds a
    /// lease it was not told about.
    #[instrument(level = "debug", skip(self), err(level = "debug"))]
    pub fn try_lock(
        &self,
        key: &str,
        wait_timeout: Duration,
        lease_duration: Duration,
    ) -> Result<LockToken> {
        let started = Instant::now();
        // `None` when the timeout is too large to represent: wait indefinitely.
        let deadline = started.checked_add(wait_timeout);

        loop {
            self.cleanup_expired()?;
            if let Some(token) = self.attempt(key, lease_duration)? {
                return Ok(token);
            }

            let mut pause = self.options.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!(key, waited = ?started.elapsed(), "lock wait timed out");
                    return Err(Error::LockTimeout {
                        key: key.to_owned(),
                        waited: started.elapsed(),
                    });
                }
                pause = pause.min(deadline - now);
            }
            thread::sleep(pause);

            let Some(retries) = self.store.increment_retry_count(key)? else {
                continue;
            };
            trace!(key, retries, "lease contended");
            let max_retry_count = self.options.max_retry_count;
            if self.options.force_release && retries >= max_retry_count {
                if self.store.force_delete_lock(key, max_retry_count)? {
                    warn!(
                        key,
                        retries,
                        max_retry_count,
                        "force-released a lease that exhausted its retry budget"
                    );
                }
                if let Some(token) = self.attempt(key, lease_duration)? {
                    return Ok(token);
                }
            }
        }
    }

    /// Releases the lease if `token` still owns it.
    ///
    /// Returns `false` when the row is gone or belongs to someone else, which
    /// means the lease had already expired and may have been reclaimed. That
    /// is not an error, but the caller's critical section was not protected
    /// for its whole duration.
    pub fn unlock(&self, token: &LockToken) -> Result<bool> {
        let released = self.store.delete_lock(&token.key, &token.value)?;
        if released {
            trace!(key = %token.key, "lease released");
        } else {
            debug!(key = %token.key, "lease was no longer owned at release");
        }
        Ok(released)
    }

    /// The current row for `key`, held or stale.
    pub fn holder(&self, key: &str) -> Result<Option<LockRecord>> {
        Ok(self.store.get_lock(key)?)
    }

    /// Deletes every lease whose expiry has passed.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let removed = self
            .store
            .delete_expired_locks(self.clock.current_millis())?;
        if removed > 0 {
            debug!(removed, "cleared expired leases");
        }
        Ok(removed)
    }

    /// Deletes every lease whose retry budget is exhausted. Does nothing when
    /// force-release is disabled.
    pub fn force_release_stuck(&self) -> Result<Vec<String>> {
        if !self.options.force_release {
            return Ok(Vec::new());
        }
        let forced = self
            .store
            .delete_locks_over_retry_budget(self.options.max_retry_count)?;
        for key in &forced {
            warn!(
                key = %key,
                max_retry_count = self.options.max_retry_count,
                "sweep force-released a lease that exhausted its retry budget"
            );
        }
        Ok(forced)
    }

    /// One round of proactive cleanup: expired leases, then stuck ones.
    pub fn sweep(&self) -> Result<SweepReport> {
        Ok(SweepReport {
            expired: self.cleanup_expired()?,
            forced: self.force_release_stuck()?,
        })
    }

    fn attempt(&self, key: &str, lease_duration: Duration) -> Result<Option<LockToken>> {
        let now = self.clock.current_millis();
        let lease_millis = i64::try_from(lease_duration.as_millis()).unwrap_or(i64::MAX);
        let record = LockRecord {
            lock_key: key.to_owned(),
            lock_value: new_lock_value(),
            holder_info: self.holder_info(),
            created_at: now,
            expires_at: now.saturating_add(lease_millis),
            retry_count: 0,
        };

        match self.store.insert_lock(&record) {
            Ok(true) => {
                debug!(key, expires_at = record.expires_at, "lease acquired");
                Ok(Some(LockToken {
                    key: record.lock_key,
                    value: record.lock_value,
                    expires_at: record.expires_at,
                }))
            }
            Ok(false) => Ok(None),
            Err(err) => {
                // The insert may have landed before the failure was reported.
                if let Err(cleanup) = self.store.delete_lock(key, &record.lock_value) {
                    warn!(key, error = %cleanup, "could not roll back an uncertain lease insert");
                }
                Err(err.into())
            }
        }
    }

    fn holder_info(&self) -> String {
        let thread = thread::current();
        let thread = thread
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:?}", thread.id()));
        match &self.options.holder {
            Some(holder) => format!("{holder}/{thread}"),
            None => format!("pid-{}/{thread}", std::process::id()),
        }
    }
}

/// A random 128-bit token, hex encoded.
fn new_lock_value() -> String {
    format!("{:032x}", rng().random::<u128>())
}

/// A held lease that is released when dropped.
///
/// Prefer [`LeaseGuard::release`], which reports whether the lease was still
/// owned and surfaces store errors; the drop path can only log them.
#[derive(Debug)]
pub struct LeaseGuard<'a, S, T>
where
    S: LockStore,
    T: TimeSource,
{
    manager: &'a LeaseLockManager<S, T>,
    token: Option<LockToken>,
}

impl<S, T> LeaseGuard<'_, S, T>
where
    S: LockStore,
    T: TimeSource,
{
    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    /// Releases the lease now. See [`LeaseLockManager::unlock`].
    pub fn release(mut self) -> Result<bool> {
        match self.token.take() {
            Some(token) => self.manager.unlock(&token),
            None => Ok(false),
        }
    }
}

impl<S, T> Drop for LeaseGuard<'_, S, T>
where
    S: LockStore,
    T: TimeSource,
{
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = self.manager.unlock(&token) {
                warn!(key = %token.key, error = %err, "failed to release lease on drop");
            }
        }
    }
}
