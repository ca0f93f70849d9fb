use anyhow::Context;
use seqid::{
    LockStore, SequenceAllocator, SequenceAllocatorAsyncTokioExt, SequenceOptions, SequenceStore,
    SqliteStore, StoreError, SystemClock, TimeSource, lock_key_for, spawn_sweeper,
};
use std::{
    io::{self, Write},
    sync::Arc,
    time::Duration,
};
use tokio::{signal, task::spawn_blocking};
use tracing::info;

pub type Allocator = SequenceAllocator<SqliteStore, SystemClock>;

/// Allocates `count` IDs for `key` and prints one per line.
///
/// Whatever is left of the last batch dies with the process and becomes a gap.
pub async fn next(
    allocator: &Arc<Allocator>,
    key: &str,
    count: usize,
    options: &SequenceOptions,
) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    for _ in 0..count {
        let id = allocator
            .next_async(key, options)
            .await
            .with_context(|| format!("allocating an id for `{key}`"))?;
        writeln!(stdout, "{id}")?;
    }
    Ok(())
}

/// Prints the stored sequence row and lease state for `key`.
pub async fn inspect(allocator: &Arc<Allocator>, key: &str) -> anyhow::Result<()> {
    let store = Arc::clone(allocator.lock_manager().store());
    let now = allocator.lock_manager().clock().current_millis();
    let (sequence, lease) = {
        let key = key.to_owned();
        spawn_blocking(move || -> Result<_, StoreError> {
            Ok((store.load_sequence(&key)?, store.get_lock(&lock_key_for(&key))?))
        })
        .await??
    };

    let mut stdout = io::stdout();
    match sequence {
        Some(config) => {
            writeln!(stdout, "key:                {}", config.key)?;
            writeln!(stdout, "prefix:             {:?}", config.prefix)?;
            writeln!(stdout, "date_format:        {:?}", config.date_format)?;
            writeln!(stdout, "padding_length:     {}", config.padding_length)?;
            writeln!(stdout, "batch_size:         {}", config.batch_size)?;
            writeln!(stdout, "current_cursor:     {}", config.current_cursor)?;
            writeln!(stdout, "overflow_position:  {}", config.overflow_position)?;
            writeln!(stdout, "last_rollover_date: {:?}", config.last_rollover_date)?;
        }
        None => writeln!(stdout, "no sequence stored for `{key}`")?,
    }

    match lease {
        Some(record) if record.is_held(now) => writeln!(
            stdout,
            "lease:              held by {} for another {}ms (retries {})",
            record.holder_info,
            record.expires_at - now,
            record.retry_count
        )?,
        Some(record) => writeln!(
            stdout,
            "lease:              stale since {}ms ago (last holder {})",
            now - record.expires_at,
            record.holder_info
        )?,
        None => writeln!(stdout, "lease:              free")?,
    }
    Ok(())
}

/// Sweeps expired and stuck leases once, or every `interval` until the
/// process is interrupted.
pub async fn sweep(allocator: &Arc<Allocator>, once: bool, interval: Duration) -> anyhow::Result<()> {
    let manager = Arc::clone(allocator.lock_manager());

    if once {
        let report = spawn_blocking(move || manager.sweep()).await??;
        let mut stdout = io::stdout();
        writeln!(stdout, "expired: {}", report.expired)?;
        writeln!(stdout, "forced:  {}", report.forced.join(", "))?;
        return Ok(());
    }

    let sweeper = spawn_sweeper(&manager, interval);
    info!(?interval, "sweeping leases until interrupted");
    let result = shutdown_signal().await;
    sweeper.abort();
    info!("Sweeper shut down");
    result
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C signal");
        },
        _ = terminate.recv() => info!("Received SIGTERM signal"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("Received Ctrl+C signal");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqid::LockOptions;

    fn allocator(dir: &std::path::Path) -> Arc<Allocator> {
        let store = SqliteStore::open(dir.join("cli.db")).unwrap();
        Arc::new(SequenceAllocator::with_lock_options(
            Arc::new(store),
            SystemClock::utc(),
            LockOptions::default(),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn next_inspect_and_sweep_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = allocator(dir.path());
        let options = SequenceOptions::new("CLI").with_batch_size(2);

        next(&allocator, "order", 3, &options).await.unwrap();
        inspect(&allocator, "order").await.unwrap();
        sweep(&allocator, true, Duration::from_millis(10)).await.unwrap();

        let row = allocator
            .lock_manager()
            .store()
            .load_sequence("order")
            .unwrap()
            .unwrap();
        assert_eq!(row.current_cursor, 5);
        assert!(
            allocator
                .lock_manager()
                .store()
                .list_locks()
                .unwrap()
                .is_empty()
        );
    }
}
