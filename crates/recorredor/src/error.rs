//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// The suite ran and at least one test did not pass
    #[error("{failed} of {total} test(s) did not pass")]
    TestsFailed {
        /// Tests ending as fail or error
        failed: usize,
        /// Tests run
        total: usize,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON rendering error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Recorrido library error
    #[error("Recorrido error: {0}")]
    Recorrido(#[from] recorrido::RecorridoError),
}

impl CliError {
    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Process exit code for this error
    ///
    /// Test failures exit with 1; usage and setup problems with 2.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::TestsFailed { .. } => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument() {
        let err = CliError::invalid_argument("-j 0");
        assert!(err.to_string().contains("-j 0"));
    }

    #[test]
    fn test_tests_failed_exit_code() {
        let err = CliError::TestsFailed { failed: 2, total: 5 };
        assert_eq!(err.to_string(), "2 of 5 test(s) did not pass");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_library_error() {
        let err: CliError =
            recorrido::RecorridoError::config("parallelism must be at least 1").into();
        assert!(matches!(err, CliError::Recorrido(_)));
        assert!(err.to_string().contains("parallelism"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CliError = io.into();
        assert!(err.to_string().contains("I/O error"));
    }
}
