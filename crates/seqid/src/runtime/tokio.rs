use crate::{
    Error, LeaseLockManager, LockStore, Result, SequenceAllocator, SequenceOptions,
    SequenceStore, TimeSource,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    task::{JoinHandle, spawn_blocking},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

/// Extension trait for allocating IDs from async code on the
/// [`tokio`](https://docs.rs/tokio) runtime.
///
/// Allocation blocks on the lease and on store I/O, so each call is moved to
/// tokio's blocking pool instead of stalling a worker thread.
pub trait SequenceAllocatorAsyncTokioExt {
    /// Async counterpart of [`SequenceAllocator::allocate`].
    ///
    /// # Errors
    ///
    /// Everything [`SequenceAllocator::allocate`] can return, plus
    /// [`Error::Task`] if the blocking task panicked or was cancelled.
    fn allocate_async(&self, key: &str) -> impl Future<Output = Result<String>> + Send;

    /// Async counterpart of [`SequenceAllocator::next`].
    ///
    /// # Errors
    ///
    /// See [`Self::allocate_async`].
    fn next_async(
        &self,
        key: &str,
        options: &SequenceOptions,
    ) -> impl Future<Output = Result<String>> + Send;
}

impl<S, T> SequenceAllocatorAsyncTokioExt for Arc<SequenceAllocator<S, T>>
where
    S: LockStore + SequenceStore + Send + Sync + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    fn allocate_async(&self, key: &str) -> impl Future<Output = Result<String>> + Send {
        let allocator = Arc::clone(self);
        let key = key.to_owned();
        run_blocking(move || allocator.allocate(&key))
    }

    fn next_async(
        &self,
        key: &str,
        options: &SequenceOptions,
    ) -> impl Future<Output = Result<String>> + Send {
        let allocator = Arc::clone(self);
        let key = key.to_owned();
        let options = options.clone();
        run_blocking(move || allocator.next(&key, &options))
    }
}

async fn run_blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|err| Error::Task(err.to_string()))?
}

/// Spawns a tokio task that calls [`LeaseLockManager::sweep`] every `period`.
///
/// The task holds only a weak reference and finishes once the manager is
/// dropped. Abort the returned handle to stop it earlier.
pub fn spawn_sweeper<S, T>(manager: &Arc<LeaseLockManager<S, T>>, period: Duration) -> JoinHandle<()>
where
    S: LockStore + Send + Sync + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    let weak_manager = Arc::downgrade(manager);
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(manager) = weak_manager.upgrade() else {
                break;
            };
            match spawn_blocking(move || manager.sweep()).await {
                Ok(Ok(report)) if !report.is_empty() => {
                    debug!(
                        expired = report.expired,
                        forced = report.forced.len(),
                        "lease sweep"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "lease sweep failed"),
                Err(err) => warn!(error = %err, "lease sweep task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LockOptions, LockRecord, ManualClock, MemoryStore};
    use chrono::TimeDelta;
    use std::collections::HashSet;

    const TASKS: usize = 16;
    const IDS_PER_TASK: usize = 64;

    fn allocator() -> Arc<SequenceAllocator<MemoryStore, ManualClock>> {
        let clock = ManualClock::from_rfc3339("2025-06-17T09:00:00+00:00").unwrap();
        let options = LockOptions::default()
            .with_wait_timeout(Duration::from_secs(30))
            .with_poll_interval(Duration::from_millis(1));
        Arc::new(SequenceAllocator::with_lock_options(
            Arc::new(MemoryStore::new()),
            clock,
            options,
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn tasks_never_share_an_id() -> Result<()> {
        let allocator = allocator();
        allocator.register("order", SequenceOptions::new("ORD").with_batch_size(10))?;

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(IDS_PER_TASK);
                    for _ in 0..IDS_PER_TASK {
                        ids.push(allocator.allocate_async("order").await?);
                    }
                    Ok::<_, Error>(ids)
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.map_err(|err| Error::Task(err.to_string()))?? {
                assert!(seen.insert(id), "duplicate id");
            }
        }
        assert_eq!(seen.len(), TASKS * IDS_PER_TASK);
        Ok(())
    }

    #[tokio::test]
    async fn next_async_propagates_errors() {
        let allocator = allocator();
        let err = allocator
            .next_async("order", &SequenceOptions::new("ORD").with_padding_length(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions { .. }));
        assert!(matches!(
            allocator.allocate_async("missing").await,
            Err(Error::UnknownKey(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_task_clears_expired_leases() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::from_rfc3339("2025-06-17T09:00:00+00:00").unwrap();
        let manager = Arc::new(LeaseLockManager::new(Arc::clone(&store), clock.clone()));
        store
            .insert_lock(&LockRecord {
                lock_key: "order".into(),
                lock_value: "abandoned".into(),
                holder_info: "gone".into(),
                created_at: 0,
                expires_at: clock.current_millis() + 1_000,
                retry_count: 0,
            })
            .unwrap();
        clock.advance(TimeDelta::seconds(2));

        let sweeper = spawn_sweeper(&manager, Duration::from_millis(5));
        for _ in 0..1_000 {
            if store.get_lock("order").unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.get_lock("order").unwrap().is_none());

        drop(manager);
        tokio::time::timeout(Duration::from_secs(5), sweeper)
            .await
            .expect("sweeper should stop once the manager is gone")
            .unwrap();
    }
}
