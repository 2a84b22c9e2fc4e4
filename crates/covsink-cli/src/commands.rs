//! CLI definition using clap
//!
//! Every option can also be given through the environment, so the collector
//! can run under a process manager with only env configuration.

use crate::config::LogLevel;
use clap::Parser;
use covsink::CollectorConfig;
use std::path::PathBuf;
use std::time::Duration;

/// covsink: collect browser code coverage over HTTP and persist it for nyc
#[derive(Parser, Debug)]
#[command(name = "covsink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// HTTP port to listen on
    #[arg(short, long, env = "PORT", default_value = "8081")]
    pub port: u16,

    /// Directory for coverage.json (nyc's temp dir)
    #[arg(short = 'd', long, env = "COVERAGE_DIR", default_value = ".nyc_output")]
    pub coverage_dir: PathBuf,

    /// Log level (a RUST_LOG filter takes precedence when set)
    #[arg(long, env = "LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Seconds between background flushes of the coverage map
    #[arg(long, env = "COVERAGE_FLUSH_INTERVAL_SECS", default_value = "300")]
    pub flush_interval_secs: u64,

    /// Report command; `{coverage_dir}` is replaced with the coverage directory
    ///
    /// Defaults to `npx nyc report --reporter=html --reporter=text --reporter=lcov`.
    #[arg(long, env = "COVERAGE_REPORT_COMMAND", value_name = "CMD")]
    pub report_command: Option<String>,

    /// Generate a report after the final save on shutdown
    #[arg(long, env = "COVERAGE_REPORT_ON_SHUTDOWN")]
    pub report_on_shutdown: bool,

    /// Largest accepted request body in MiB
    #[arg(long, env = "COVERAGE_MAX_BODY_MB", default_value = "50")]
    pub max_body_mb: usize,
}

impl Cli {
    /// Collector configuration for these arguments
    #[must_use]
    pub fn collector_config(&self) -> CollectorConfig {
        let mut builder = CollectorConfig::builder()
            .coverage_dir(&self.coverage_dir)
            .port(self.port)
            .flush_interval(Duration::from_secs(self.flush_interval_secs))
            .report_on_shutdown(self.report_on_shutdown)
            .max_body_bytes(self.max_body_mb.saturating_mul(1024 * 1024));

        if let Some(ref command) = self.report_command {
            builder = builder.report_command(command);
        }

        builder.build()
    }
}
