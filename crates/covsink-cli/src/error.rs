//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Async runtime could not be started
    #[error("Runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
    },

    /// Collector error
    #[error("{0}")]
    Collector(#[from] covsink::CovsinkError),

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Create a runtime error
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error() {
        let err = CliError::runtime("no reactor");
        assert!(err.to_string().contains("Runtime"));
        assert!(err.to_string().contains("no reactor"));
    }

    #[test]
    fn test_collector_error_passthrough() {
        let err: CliError = covsink::CovsinkError::report("nyc missing").into();
        assert_eq!(err.to_string(), "Report generation failed: nyc missing");
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: CliError = io_err.into();
        assert!(err.to_string().contains("I/O"));
    }
}
