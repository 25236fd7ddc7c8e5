//! chunk-sink: a readiness-based TCP sink
//!
//! Accepts any number of TCP connections on one thread, collects whatever
//! each peer sends in fixed-size chunks, and when the peer closes its side
//! prints one line listing the size of every chunk received.
//!
//! Features:
//! - mio event loop (epoll on Linux, kqueue on macOS)
//! - One shared 100-byte scratch buffer for all reads
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        listen = %config.listen,
        events = config.events,
        "Starting chunk-sink server"
    );

    runtime::run(config)?;
    Ok(())
}
