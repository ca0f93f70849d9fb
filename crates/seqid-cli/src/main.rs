#![doc = include_str!("../README.md")]

mod app;

use anyhow::Context;
use app::commands;
use app::config::{Action, AppConfig, CliArgs};
use app::telemetry::init_telemetry;
use clap::Parser;
use seqid::{SequenceAllocator, SqliteStore, SystemClock};
use std::sync::Arc;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))?;
    let allocator = Arc::new(SequenceAllocator::with_lock_options(
        Arc::new(store),
        SystemClock::local(),
        config.lock.clone(),
    ));

    match &config.action {
        Action::Next {
            key,
            count,
            options,
        } => commands::next(&allocator, key, *count, options).await,
        Action::Inspect { key } => commands::inspect(&allocator, key).await,
        Action::Sweep { once } => commands::sweep(&allocator, *once, config.sweep_interval).await,
    }
}

fn log_startup_info(config: &AppConfig) {
    if cfg!(debug_assertions) {
        tracing::debug!("Starting seqid with full config: {:#?}", config);
    } else {
        tracing::debug!(database = %config.database.display(), "Starting seqid");
    }
}
