//! Result and error types for covsink.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for covsink operations
pub type CovsinkResult<T> = Result<T, CovsinkError>;

/// Errors that can occur while collecting coverage
#[derive(Debug, Error)]
pub enum CovsinkError {
    /// Request body was not valid JSON
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Submission parsed but did not carry a coverage object
    #[error("Invalid coverage data: {message}")]
    InvalidSubmission {
        /// Error message
        message: String,
    },

    /// Coverage data file could not be written
    #[error("Failed to write coverage data to {path}: {message}")]
    Storage {
        /// Backing file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Coverage report generation failed
    #[error("Report generation failed: {message}")]
    Report {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CovsinkError {
    /// Create an invalid submission error
    #[must_use]
    pub fn invalid_submission(message: impl Into<String>) -> Self {
        Self::InvalidSubmission {
            message: message.into(),
        }
    }

    /// Create a storage error for the given file
    #[must_use]
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a report generation error
    #[must_use]
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the client rather than the server
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidSubmission { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_submission_error() {
        let err = CovsinkError::invalid_submission("coverage missing");
        assert!(err.to_string().contains("Invalid coverage data"));
        assert!(err.to_string().contains("coverage missing"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_storage_error_names_path() {
        let err = CovsinkError::storage("/tmp/cov/coverage.json", "disk full");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/cov/coverage.json"));
        assert!(msg.contains("disk full"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_report_error() {
        let err = CovsinkError::report("nyc exited with 1");
        assert!(err.to_string().contains("Report generation failed"));
    }

    #[test]
    fn test_json_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: CovsinkError = json_err.into();
        assert!(err.to_string().contains("Invalid JSON"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CovsinkError = io_err.into();
        assert!(err.to_string().contains("I/O"));
    }
}
