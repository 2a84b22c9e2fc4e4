//! Coverage Collection Server
//!
//! HTTP endpoint that instrumented pages post their coverage snapshots to.
//!
//! ## Endpoints
//!
//! | Method  | Path                    | Purpose                          |
//! |---------|-------------------------|----------------------------------|
//! | POST    | `/api/coverage`         | Submit a coverage snapshot       |
//! | GET     | `/api/coverage/stats`   | File count and last write time   |
//! | POST    | `/api/coverage/report`  | Run the external report tool     |
//! | OPTIONS | `*`                     | CORS preflight                   |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CollectorServer                          │
//! │  ┌──────────────┐     ┌──────────────┐                      │
//! │  │ HTTP Router  │────▶│ Accumulator  │◀─── flush timer      │
//! │  │ (port 8081)  │     │ (Mutex)      │◀─── shutdown persist │
//! │  └──────┬───────┘     └──────┬───────┘                      │
//! │         │                    ▼                              │
//! │         ▼             .nyc_output/coverage.json             │
//! │  ┌──────────────┐            │                              │
//! │  │ Report tool  │◀───────────┘                              │
//! │  └──────────────┘                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![allow(clippy::unused_async)]

use crate::accumulator::{CoverageAccumulator, COVERAGE_FILE_NAME};
use crate::coverage::CoverageSubmission;
use crate::error::CovsinkResult;
use crate::report::ReportGenerator;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

/// Smallest accepted flush period
const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// `Access-Control-Allow-Methods` sent on every response
const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// `Access-Control-Allow-Headers` sent on every response
const CORS_ALLOW_HEADERS: &str = "Content-Type";

/// JSON body returned by the submit and report endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    /// Whether the request was handled successfully
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    /// Total files after an accepted submission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
}

impl ApiResponse {
    /// Successful response
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            file_count: None,
        }
    }

    /// Failed response
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            file_count: None,
        }
    }

    /// Attach the cumulative file count
    #[must_use]
    pub const fn with_file_count(mut self, count: usize) -> Self {
        self.file_count = Some(count);
        self
    }

    fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// JSON body returned by `GET /api/coverage/stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Always true
    pub success: bool,
    /// Files in the cumulative map
    pub file_count: usize,
    /// ISO-8601 modification time of the coverage file, null if never written
    pub last_update: Option<String>,
}

/// Coverage collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Directory holding `coverage.json`
    pub coverage_dir: PathBuf,
    /// HTTP port
    pub port: u16,
    /// Period of the background flush
    pub flush_interval: Duration,
    /// Custom report command line; nyc when unset
    pub report_command: Option<String>,
    /// Run the report tool once more after the final persist
    pub report_on_shutdown: bool,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            coverage_dir: PathBuf::from(".nyc_output"),
            port: 8081,
            flush_interval: Duration::from_secs(5 * 60),
            report_command: None,
            report_on_shutdown: false,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

impl CollectorConfig {
    /// Create a builder
    #[must_use]
    pub fn builder() -> CollectorConfigBuilder {
        CollectorConfigBuilder::default()
    }

    /// Path of the persisted coverage map
    #[must_use]
    pub fn coverage_file(&self) -> PathBuf {
        self.coverage_dir.join(COVERAGE_FILE_NAME)
    }

    /// Report generator for this configuration
    pub fn report_generator(&self) -> CovsinkResult<ReportGenerator> {
        match self.report_command {
            Some(ref command) => ReportGenerator::from_command_line(command, self.coverage_file()),
            None => Ok(ReportGenerator::nyc(self.coverage_file())),
        }
    }
}

/// Builder for `CollectorConfig`
#[derive(Debug, Clone, Default)]
pub struct CollectorConfigBuilder {
    config: CollectorConfig,
}

impl CollectorConfigBuilder {
    /// Set the coverage directory
    #[must_use]
    pub fn coverage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.coverage_dir = dir.into();
        self
    }

    /// Set HTTP port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the background flush period
    #[must_use]
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval.max(MIN_FLUSH_INTERVAL);
        self
    }

    /// Use a custom report command line
    #[must_use]
    pub fn report_command(mut self, command: impl Into<String>) -> Self {
        self.config.report_command = Some(command.into());
        self
    }

    /// Generate a report after the final persist on shutdown
    #[must_use]
    pub fn report_on_shutdown(mut self, enabled: bool) -> Self {
        self.config.report_on_shutdown = enabled;
        self
    }

    /// Set the request body limit
    #[must_use]
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> CollectorConfig {
        self.config
    }
}

/// Shared handles passed to request handlers
#[derive(Debug, Clone)]
pub struct AppState {
    accumulator: Arc<Mutex<CoverageAccumulator>>,
    reports: Arc<ReportGenerator>,
}

impl AppState {
    /// Wrap an accumulator and report generator
    #[must_use]
    pub fn new(accumulator: CoverageAccumulator, reports: ReportGenerator) -> Self {
        Self {
            accumulator: Arc::new(Mutex::new(accumulator)),
            reports: Arc::new(reports),
        }
    }

    /// Handle to the accumulator
    #[must_use]
    pub fn accumulator(&self) -> Arc<Mutex<CoverageAccumulator>> {
        Arc::clone(&self.accumulator)
    }

    /// The report generator
    #[must_use]
    pub fn reports(&self) -> &ReportGenerator {
        &self.reports
    }
}

/// Build the HTTP router.
///
/// Unknown paths and unsupported methods on known paths both get 404.
/// `CorsLayer` answers every OPTIONS request before routing.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/coverage", post(submit_coverage).fallback(not_found))
        .route("/api/coverage/stats", get(coverage_stats).fallback(not_found))
        .route(
            "/api/coverage/report",
            post(generate_report).fallback(not_found),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .with_state(state)
}

/// Coverage collector with its accumulator, flush timer and shutdown sequence
#[derive(Debug)]
pub struct CollectorServer {
    config: CollectorConfig,
    state: AppState,
}

impl CollectorServer {
    /// Create the coverage directory, load existing data and prepare the
    /// report generator.
    ///
    /// # Errors
    ///
    /// Fails if the coverage directory cannot be created or the report
    /// command is empty.
    pub fn new(config: CollectorConfig) -> CovsinkResult<Self> {
        if !config.coverage_dir.exists() {
            std::fs::create_dir_all(&config.coverage_dir)?;
            tracing::info!(
                path = %config.coverage_dir.display(),
                "Created coverage directory"
            );
        }

        let accumulator = CoverageAccumulator::load(config.coverage_file());
        let reports = config.report_generator()?;

        Ok(Self {
            state: AppState::new(accumulator, reports),
            config,
        })
    }

    /// Shared state, for tests and embedding
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Server configuration
    #[must_use]
    pub const fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Get the HTTP URL
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://localhost:{}", self.config.port)
    }

    /// Bind on all interfaces and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> CovsinkResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// After `shutdown` resolves the flush timer is stopped, the map is
    /// persisted one last time and, if configured, a final report is run.
    pub async fn serve<F>(
        self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> CovsinkResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(self.state.clone(), self.config.max_body_bytes);
        self.log_banner(&listener);

        let flush = spawn_flush_task(self.state.accumulator(), self.config.flush_interval);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        flush.abort();
        tracing::info!("Shutting down, saving coverage data");
        self.state.accumulator.lock().await.persist();

        if self.config.report_on_shutdown {
            match self.state.reports.generate().await {
                Ok(run) => tracing::info!("Final coverage report:\n{}", run.stdout.trim_end()),
                Err(e) => tracing::warn!(error = %e, "Final coverage report failed"),
            }
        }

        served?;
        tracing::info!("Coverage server stopped");
        Ok(())
    }

    fn log_banner(&self, listener: &tokio::net::TcpListener) {
        let port = listener
            .local_addr()
            .map_or(self.config.port, |addr| addr.port());

        tracing::info!("==========================================");
        tracing::info!("Coverage collection server started");
        tracing::info!("==========================================");
        tracing::info!("Port:          {port}");
        tracing::info!("Coverage dir:  {}", self.config.coverage_dir.display());
        tracing::info!("Coverage file: {}", self.config.coverage_file().display());
        tracing::info!("Report tool:   {}", self.state.reports.command_line());
        tracing::info!("Endpoints:");
        tracing::info!("  POST /api/coverage        - submit coverage data");
        tracing::info!("  GET  /api/coverage/stats  - coverage statistics");
        tracing::info!("  POST /api/coverage/report - generate coverage report");
        tracing::info!("==========================================");
    }
}

/// Persist the map every `period` while it holds data
fn spawn_flush_task(
    accumulator: Arc<Mutex<CoverageAccumulator>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(MIN_FLUSH_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if accumulator.lock().await.flush().is_some() {
                tracing::debug!("Periodic coverage flush");
            }
        }
    })
}

/// Handle `POST /api/coverage`
async fn submit_coverage(State(state): State<AppState>, body: Bytes) -> Response {
    let submission = match CoverageSubmission::from_slice(&body) {
        Ok(submission) => submission,
        Err(e) if e.is_client_error() => {
            tracing::warn!(error = %e, "Rejected invalid coverage submission");
            return ApiResponse::failure(e.to_string()).with_status(StatusCode::BAD_REQUEST);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to process coverage submission");
            return ApiResponse::failure(e.to_string())
                .with_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let received = submission.coverage.len();
    let outcome = state.accumulator.lock().await.merge(submission.coverage);
    if !outcome.accepted {
        tracing::debug!(
            url = submission.url.as_deref().unwrap_or("-"),
            "Received empty coverage data (code may not have run yet)"
        );
        return ApiResponse::ok("Coverage data is empty (code may not have run yet)")
            .with_status(StatusCode::OK);
    }

    tracing::info!(
        received,
        file_count = outcome.file_count,
        url = submission.url.as_deref().unwrap_or("-"),
        timestamp = submission.timestamp.as_deref().unwrap_or("-"),
        "Coverage data received"
    );

    ApiResponse::ok("Coverage data received")
        .with_file_count(outcome.file_count)
        .with_status(StatusCode::OK)
}

/// Handle `GET /api/coverage/stats`
async fn coverage_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.accumulator.lock().await.stats();
    Json(StatsResponse {
        success: true,
        file_count: stats.file_count,
        last_update: stats.last_update(),
    })
}

/// Handle `POST /api/coverage/report`
async fn generate_report(State(state): State<AppState>) -> Response {
    match state.reports.generate().await {
        Ok(run) => {
            tracing::debug!("{}", run.stdout.trim_end());
            ApiResponse::ok("Coverage report generated").with_status(StatusCode::OK)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to generate coverage report");
            ApiResponse::failure(e.to_string()).with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received SIGINT, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received SIGTERM, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
