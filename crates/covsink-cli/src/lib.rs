//! covsink CLI library
//!
//! Argument parsing, logging setup and the run loop behind the `covsink`
//! binary.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod config;
mod error;

pub use commands::Cli;
pub use config::{init_tracing, LogLevel};
pub use error::{CliError, CliResult};

use covsink::{shutdown_signal, CollectorServer};

/// Run the collector until SIGINT/SIGTERM.
///
/// Requests are handled on a single-threaded runtime, one event at a time.
pub fn run(cli: &Cli) -> CliResult<()> {
    let server = CollectorServer::new(cli.collector_config())?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::runtime(format!("Failed to create runtime: {e}")))?;

    rt.block_on(server.run(shutdown_signal()))?;
    Ok(())
}
