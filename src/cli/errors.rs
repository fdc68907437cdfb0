//! CLI error types
//!
//! Every CLI error ends the command with a non-zero exit status.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::journal::JournalError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Journal(#[from] JournalError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Journal already initialized in {0}")]
    AlreadyInitialized(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl CliError {
    /// Stable error code for JSON error responses
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "JRNL_CLI_CONFIG_ERROR",
            CliError::Journal(e) => e.code().code(),
            CliError::Io(_) => "JRNL_CLI_IO_ERROR",
            CliError::Json(_) => "JRNL_CLI_JSON_ERROR",
            CliError::AlreadyInitialized(_) => "JRNL_CLI_ALREADY_INITIALIZED",
            CliError::BadRequest(_) => "JRNL_CLI_BAD_REQUEST",
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_errors_keep_their_code() {
        let err = CliError::from(JournalError::invalid_argument("bad xid"));
        assert_eq!(err.code_str(), "JRNL_INVALID_ARGUMENT");
        assert!(err.to_string().contains("bad xid"));
    }

    #[test]
    fn test_io_error_code() {
        let err = CliError::from(io::Error::new(io::ErrorKind::Other, "disk"));
        assert_eq!(err.code_str(), "JRNL_CLI_IO_ERROR");
    }
}
