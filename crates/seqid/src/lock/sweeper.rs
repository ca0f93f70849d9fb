use crate::{LeaseLockManager, LockStore, TimeSource};
use core::time::Duration;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    io,
    thread::{self, JoinHandle},
};
use tracing::{debug, warn};

/// A background thread that periodically calls [`LeaseLockManager::sweep`].
///
/// The thread only holds a weak reference to the manager and exits once the
/// manager is dropped, or when this handle is stopped or dropped.
///
/// # Example
///
/// ```
/// use seqid::{LeaseLockManager, LeaseSweeper, MemoryStore, SystemClock};
/// use std::{sync::Arc, time::Duration};
///
/// let locks = Arc::new(LeaseLockManager::new(Arc::new(MemoryStore::new()), SystemClock::utc()));
/// let sweeper = LeaseSweeper::spawn(&locks, Duration::from_secs(1))?;
/// sweeper.stop();
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct LeaseSweeper {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LeaseSweeper {
    /// Starts sweeping `manager` every `interval`. The first sweep runs after
    /// one interval has passed.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the sweeper thread cannot be spawned.
    pub fn spawn<S, T>(
        manager: &Arc<LeaseLockManager<S, T>>,
        interval: Duration,
    ) -> io::Result<Self>
    where
        S: LockStore + Send + Sync + 'static,
        T: TimeSource + Send + Sync + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let weak_manager = Arc::downgrade(manager);
        let stop = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("seqid-lease-sweeper".into())
            .spawn(move || {
                loop {
                    thread::park_timeout(interval);
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(manager) = weak_manager.upgrade() else {
                        break;
                    };
                    match manager.sweep() {
                        Ok(report) if !report.is_empty() => {
                            debug!(
                                expired = report.expired,
                                forced = report.forced.len(),
                                "lease sweep"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "lease sweep failed"),
                    }
                }
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Whether the sweeper thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for LeaseSweeper {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
