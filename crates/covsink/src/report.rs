//! Coverage report generation.
//!
//! Turning the raw coverage map into HTML/LCOV/text reports is delegated to
//! an external tool (nyc by default) run as a subprocess.

use crate::error::{CovsinkError, CovsinkResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

/// Placeholder replaced by the coverage directory in custom report commands
pub const COVERAGE_DIR_PLACEHOLDER: &str = "{coverage_dir}";

/// Number of stderr lines carried into a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Output of a successful report run
#[derive(Debug, Clone)]
pub struct ReportRun {
    /// Wall time of the subprocess
    pub duration: Duration,
    /// Captured stdout (nyc's text reporter prints the summary table here)
    pub stdout: String,
}

/// Runs the external report tool against the persisted coverage file
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    coverage_file: PathBuf,
}

impl ReportGenerator {
    /// `npx nyc report` with html, text and lcov reporters reading from the
    /// directory that holds `coverage_file`
    #[must_use]
    pub fn nyc(coverage_file: impl Into<PathBuf>) -> Self {
        let coverage_file = coverage_file.into();
        let temp_dir = coverage_dir_of(&coverage_file);

        Self {
            program: "npx".to_string(),
            args: vec![
                "nyc".to_string(),
                "report".to_string(),
                "--reporter=html".to_string(),
                "--reporter=text".to_string(),
                "--reporter=lcov".to_string(),
                "--temp-dir".to_string(),
                temp_dir.display().to_string(),
            ],
            working_dir: None,
            coverage_file,
        }
    }

    /// Build from a whitespace-separated command line.
    ///
    /// Occurrences of `{coverage_dir}` are replaced with the directory that
    /// holds `coverage_file`.
    pub fn from_command_line(
        command: &str,
        coverage_file: impl Into<PathBuf>,
    ) -> CovsinkResult<Self> {
        let coverage_file = coverage_file.into();
        let dir = coverage_dir_of(&coverage_file).display().to_string();

        let mut parts = command
            .split_whitespace()
            .map(|part| part.replace(COVERAGE_DIR_PLACEHOLDER, &dir));
        let program = parts
            .next()
            .ok_or_else(|| CovsinkError::report("report command is empty"))?;

        Ok(Self {
            program,
            args: parts.collect(),
            working_dir: None,
            coverage_file,
        })
    }

    /// Run the tool from `dir` instead of the current directory
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Program arguments
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Human-readable command line, for logs
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the report tool and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Fails when no coverage has been persisted yet, when the program cannot
    /// be spawned, or when it exits unsuccessfully.
    pub async fn generate(&self) -> CovsinkResult<ReportRun> {
        if !self.coverage_file.exists() {
            return Err(CovsinkError::report(format!(
                "no coverage data at {}; collect coverage first",
                self.coverage_file.display()
            )));
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(command = %self.command_line(), "Generating coverage report");
        let start = Instant::now();

        let output = cmd.output().await.map_err(|e| {
            CovsinkError::report(format!("failed to execute {}: {e}", self.program))
        })?;
        let duration = start.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CovsinkError::report(format!(
                "{} exited with code {:?}: {}",
                self.program,
                output.status.code(),
                tail(&stderr, STDERR_TAIL_LINES)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        tracing::info!(
            duration_ms = duration.as_millis() as u64,
            "Coverage report generated"
        );

        Ok(ReportRun { duration, stdout })
    }
}

fn coverage_dir_of(coverage_file: &Path) -> PathBuf {
    coverage_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
