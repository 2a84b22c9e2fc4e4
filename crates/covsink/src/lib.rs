//! covsink: server-side collection of browser code coverage
//!
//! Pages built with Istanbul-style instrumentation post their
//! `window.__coverage__` snapshot to the collector. Snapshots are merged
//! into one cumulative per-file map, written to `coverage.json` and handed
//! to an external report tool (nyc by default) on request.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  POST /api/coverage  ┌────────────────┐   ┌───────────────┐
//! │ Browser    │─────────────────────►│ CollectorServer│──►│ Coverage      │
//! │ (instr.)   │                      │ (axum)         │   │ Accumulator   │
//! └────────────┘                      └───────┬────────┘   └──────┬────────┘
//!                                             │                   ▼
//!                                             │ report      coverage.json
//!                                             ▼                   │
//!                                     ┌────────────────┐          │
//!                                     │ nyc report     │◄─────────┘
//!                                     └────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use covsink::{shutdown_signal, CollectorConfig, CollectorServer};
//!
//! # async fn demo() -> covsink::CovsinkResult<()> {
//! let config = CollectorConfig::builder()
//!     .coverage_dir(".nyc_output")
//!     .port(8081)
//!     .build();
//! CollectorServer::new(config)?.run(shutdown_signal()).await
//! # }
//! ```

#![warn(missing_docs)]

pub mod accumulator;
pub mod coverage;
mod error;
pub mod report;
pub mod server;

pub use accumulator::{CoverageAccumulator, CoverageStats, MergeOutcome, COVERAGE_FILE_NAME};
pub use coverage::{CoverageMap, CoverageRecord, CoverageSubmission};
pub use error::{CovsinkError, CovsinkResult};
pub use report::{ReportGenerator, ReportRun};
pub use server::{
    router, shutdown_signal, ApiResponse, AppState, CollectorConfig, CollectorConfigBuilder,
    CollectorServer, StatsResponse,
};
