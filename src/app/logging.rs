//! Logging configuration and initialization

use anyhow::{anyhow, Result};
use tracing::{debug, trace};
use tracing_subscriber::EnvFilter;

use crate::app::config::AppConfig;

/// Filter from `RUST_LOG` when set, else from the `-v` count
fn env_filter(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level()))
}

/// Install the global subscriber; fails if one is already installed
pub fn init_logging(config: &AppConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(config.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(config.verbose >= 3) // Show line numbers for -vvv
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    debug!(
        "tripreduce started with verbosity level: {}, state dir: {}",
        config.verbose,
        config.settings.state_dir.display()
    );
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
    Ok(())
}
