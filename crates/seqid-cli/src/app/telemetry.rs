//! Console logging for the `seqid` binary.
//!
//! Log lines go to stderr so that stdout only carries minted IDs and inspect
//! output, which keeps the binary usable in shell pipelines. The filter is
//! read from `RUST_LOG` and defaults to `warn`; use `RUST_LOG=seqid=debug` to
//! see lease acquisition and batch minting.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;

    Ok(())
}
