use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use seqid::{LockOptions, SequenceOptions};
use std::{path::PathBuf, time::Duration};

/// Runtime configuration for the `seqid` binary.
///
/// Global options are shared by every subcommand and may also be supplied
/// through environment variables (or a `.env` file). Every process pointing
/// at the same database file coordinates through the lease table inside it.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seqid",
    version,
    about = "Mint and manage lease-locked sequence IDs in a shared SQLite database"
)]
pub struct CliArgs {
    /// Path to the SQLite database file. Created if missing.
    ///
    /// Environment variable: `SEQID_DATABASE`
    #[arg(long, global = true, env = "SEQID_DATABASE", default_value = "seqid.db")]
    pub database: PathBuf,

    /// How long to wait for a contended lease before giving up.
    ///
    /// Environment variable: `SEQID_WAIT_TIMEOUT_MS`
    #[arg(long, global = true, env = "SEQID_WAIT_TIMEOUT_MS", default_value_t = 10_000)]
    pub wait_timeout_ms: u64,

    /// How long a granted lease stays valid. Must comfortably exceed the time
    /// needed to mint and persist one batch.
    ///
    /// Environment variable: `SEQID_LEASE_MS`
    #[arg(long, global = true, env = "SEQID_LEASE_MS", default_value_t = 30_000)]
    pub lease_ms: u64,

    /// Sleep between acquisition attempts while a lease is contended.
    ///
    /// Environment variable: `SEQID_POLL_MS`
    #[arg(long, global = true, env = "SEQID_POLL_MS", default_value_t = 50)]
    pub poll_ms: u64,

    /// Failed attempts against one lease before it is presumed stuck.
    ///
    /// Environment variable: `SEQID_MAX_RETRY_COUNT`
    #[arg(long, global = true, env = "SEQID_MAX_RETRY_COUNT", default_value_t = 600)]
    pub max_retry_count: u32,

    /// Never force-release stuck leases; only expiry frees them.
    ///
    /// Environment variable: `SEQID_NO_FORCE_RELEASE`
    #[arg(long, global = true, env = "SEQID_NO_FORCE_RELEASE", default_value_t = false)]
    pub no_force_release: bool,

    /// Interval between background lease sweeps.
    ///
    /// Environment variable: `SEQID_SWEEP_INTERVAL_MS`
    #[arg(long, global = true, env = "SEQID_SWEEP_INTERVAL_MS", default_value_t = 5_000)]
    pub sweep_interval_ms: u64,

    /// Identity recorded in `holder_info` for leases taken by this process.
    ///
    /// Environment variable: `SEQID_HOLDER`
    #[arg(long, global = true, env = "SEQID_HOLDER")]
    pub holder: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Allocate IDs for a key and print one per line.
    Next(NextArgs),
    /// Show the stored sequence row and current lease for a key.
    Inspect {
        /// Allocation key.
        key: String,
    },
    /// Remove expired and stuck leases.
    Sweep {
        /// Run a single sweep and exit instead of looping until interrupted.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
}

/// Options for `seqid next`. Formatting options only apply when the key's
/// sequence row does not exist yet.
#[derive(Args, Debug, Clone)]
pub struct NextArgs {
    /// Allocation key.
    pub key: String,

    /// Number of IDs to allocate.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Literal prefix of every ID.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Date stamp pattern, e.g. `yyyyMMdd`. Empty disables daily rollover.
    #[arg(long, default_value = "yyyyMMdd")]
    pub date_format: String,

    /// Width of the zero-padded numeric part.
    #[arg(long, default_value_t = 6)]
    pub padding: u32,

    /// IDs reserved per round trip to the database.
    #[arg(long, default_value_t = 100)]
    pub batch_size: u32,
}

/// A validated [`Command`].
#[derive(Debug, Clone)]
pub enum Action {
    Next {
        key: String,
        count: usize,
        options: SequenceOptions,
    },
    Inspect {
        key: String,
    },
    Sweep {
        once: bool,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: PathBuf,
    pub lock: LockOptions,
    pub sweep_interval: Duration,
    pub action: Action,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.lease_ms == 0 {
            bail!("SEQID_LEASE_MS must be greater than 0");
        }
        if args.poll_ms == 0 {
            bail!("SEQID_POLL_MS must be greater than 0");
        }
        if args.sweep_interval_ms == 0 {
            bail!("SEQID_SWEEP_INTERVAL_MS must be greater than 0");
        }
        if args.poll_ms > args.wait_timeout_ms {
            bail!(
                "SEQID_POLL_MS ({}) exceeds SEQID_WAIT_TIMEOUT_MS ({})",
                args.poll_ms,
                args.wait_timeout_ms
            );
        }

        let mut lock = LockOptions::default()
            .with_wait_timeout(Duration::from_millis(args.wait_timeout_ms))
            .with_lease_duration(Duration::from_millis(args.lease_ms))
            .with_poll_interval(Duration::from_millis(args.poll_ms))
            .with_max_retry_count(args.max_retry_count)
            .with_force_release(!args.no_force_release);
        if let Some(holder) = args.holder {
            lock = lock.with_holder(holder);
        }

        let action = match args.command {
            Command::Next(next) => {
                if next.count == 0 {
                    bail!("--count must be greater than 0");
                }
                let options = SequenceOptions::new(next.prefix)
                    .with_date_format(next.date_format)
                    .with_padding_length(next.padding)
                    .with_batch_size(next.batch_size);
                options.validate(&next.key)?;
                Action::Next {
                    key: next.key,
                    count: next.count,
                    options,
                }
            }
            Command::Inspect { key } => Action::Inspect { key },
            Command::Sweep { once } => Action::Sweep { once },
        };

        Ok(Self {
            database: args.database,
            lock,
            sweep_interval: Duration::from_millis(args.sweep_interval_ms),
            action,
        })
    }
}
