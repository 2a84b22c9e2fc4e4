//! covsink: browser coverage collection server
//!
//! ## Usage
//!
//! ```bash
//! covsink                                  # listen on :8081, write .nyc_output/coverage.json
//! PORT=9000 COVERAGE_DIR=/data/cov covsink # env-style configuration
//! covsink --log-level debug --report-on-shutdown
//! ```

use clap::Parser;
use covsink_cli::{init_tracing, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    match covsink_cli::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
