//! Journal error types and write result codes
//!
//! Recoverable conditions are reported as [`IoRes`] values inside `Ok`.
//! Everything the caller must not blindly retry is a [`JournalError`]:
//!
//! - JRNL_JOURNAL_FULL (ERROR severity)
//! - JRNL_OPERATION_IN_PROGRESS (ERROR severity)
//! - JRNL_INVALID_ARGUMENT (ERROR severity)
//! - JRNL_MALFORMED_RECORD (FATAL severity)
//! - JRNL_IO_ERROR (FATAL severity)

use std::fmt;
use std::io;

/// Outcome of a write manager call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoRes {
    /// Record fully written; the page holding its last byte is already submitted
    Success,
    /// Record fully cached; its page has not been submitted yet
    CachedNotSubmitted,
    /// The next ring page still awaits its write. Drain with `get_events`
    /// and call again with the same token.
    PageFull,
    /// Rotation waits on outstanding writes to the next journal file.
    /// Drain with `get_events` and call again with the same token.
    FileFull,
    /// Dequeue queued until the record it references is confirmed
    Deferred,
}

impl IoRes {
    /// Returns the string code for this result
    pub fn as_str(&self) -> &'static str {
        match self {
            IoRes::Success => "SUCCESS",
            IoRes::CachedNotSubmitted => "CACHED_NOT_SUBMITTED",
            IoRes::PageFull => "PAGE_FULL",
            IoRes::FileFull => "FILE_FULL",
            IoRes::Deferred => "DEFERRED",
        }
    }

    /// True when the caller must drain completions and call again
    pub fn needs_retry(&self) -> bool {
        matches!(self, IoRes::PageFull | IoRes::FileFull)
    }
}

impl fmt::Display for IoRes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity levels for journal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// This write fails, the journal continues
    Error,
    /// The journal cannot continue without recovery
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Journal error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalErrorCode {
    /// Every file able to take the next rotation is still occupied
    JournalFull,
    /// An operation of a conflicting kind or token is mid-flight
    OperationInProgress,
    /// Rejected by the pre-write check; nothing was written
    InvalidArgument,
    /// Encoded bytes failed validation
    MalformedRecord,
    /// Underlying write failed
    IoError,
}

impl JournalErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            JournalErrorCode::JournalFull => "JRNL_JOURNAL_FULL",
            JournalErrorCode::OperationInProgress => "JRNL_OPERATION_IN_PROGRESS",
            JournalErrorCode::InvalidArgument => "JRNL_INVALID_ARGUMENT",
            JournalErrorCode::MalformedRecord => "JRNL_MALFORMED_RECORD",
            JournalErrorCode::IoError => "JRNL_IO_ERROR",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            JournalErrorCode::JournalFull => Severity::Error,
            JournalErrorCode::OperationInProgress => Severity::Error,
            JournalErrorCode::InvalidArgument => Severity::Error,
            JournalErrorCode::MalformedRecord => Severity::Fatal,
            JournalErrorCode::IoError => Severity::Fatal,
        }
    }
}

impl fmt::Display for JournalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Journal error with context
#[derive(Debug)]
pub struct JournalError {
    code: JournalErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl JournalError {
    fn new(code: JournalErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Next file in the ring still holds undequeued records
    pub fn journal_full(fid: u16, enqueued: u32) -> Self {
        Self::new(
            JournalErrorCode::JournalFull,
            "next journal file still holds enqueued records",
        )
        .with_details(format!("fid: {}, enqueued: {}", fid, enqueued))
    }

    /// Busy-slot conflict
    pub fn operation_in_progress(message: impl Into<String>) -> Self {
        Self::new(JournalErrorCode::OperationInProgress, message)
    }

    /// Pre-write check rejection
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(JournalErrorCode::InvalidArgument, message)
    }

    /// Codec-level corruption
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(JournalErrorCode::MalformedRecord, message)
    }

    /// Codec-level corruption at a byte offset
    pub fn malformed_at(offset: usize, message: impl Into<String>) -> Self {
        Self::new(JournalErrorCode::MalformedRecord, message)
            .with_details(format!("byte_offset: {}", offset))
    }

    /// Write failure with the underlying cause
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: JournalErrorCode::IoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Write failure without an underlying `io::Error`
    pub fn io_failed(message: impl Into<String>) -> Self {
        Self::new(JournalErrorCode::IoError, message)
    }

    /// Attach a details string
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> JournalErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Whether this error requires journal recovery
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for journal operations
pub type JournalResult<T> = Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(JournalErrorCode::JournalFull.code(), "JRNL_JOURNAL_FULL");
        assert_eq!(
            JournalErrorCode::OperationInProgress.code(),
            "JRNL_OPERATION_IN_PROGRESS"
        );
        assert_eq!(JournalErrorCode::MalformedRecord.code(), "JRNL_MALFORMED_RECORD");
        assert_eq!(JournalErrorCode::IoError.code(), "JRNL_IO_ERROR");
    }

    #[test]
    fn test_io_and_malformed_are_fatal() {
        let err = JournalError::io("write failed", io::Error::new(io::ErrorKind::Other, "eio"));
        assert!(err.is_fatal());
        assert!(JournalError::malformed("bad tail").is_fatal());
        assert!(!JournalError::journal_full(1, 3).is_fatal());
        assert!(!JournalError::operation_in_progress("busy").is_fatal());
    }

    #[test]
    fn test_display_contains_context() {
        let err = JournalError::journal_full(3, 12);
        let display = format!("{}", err);
        assert!(display.contains("JRNL_JOURNAL_FULL"));
        assert!(display.contains("ERROR"));
        assert!(display.contains("fid: 3"));
    }

    #[test]
    fn test_io_error_exposes_source() {
        use std::error::Error;
        let err = JournalError::io("page write", io::Error::new(io::ErrorKind::Other, "eio"));
        assert!(err.source().is_some());
        assert!(format!("{}", err).contains("caused by: eio"));
    }

    #[test]
    fn test_iores_retry_classification() {
        assert!(IoRes::PageFull.needs_retry());
        assert!(IoRes::FileFull.needs_retry());
        assert!(!IoRes::CachedNotSubmitted.needs_retry());
        assert!(!IoRes::Deferred.needs_retry());
        assert_eq!(IoRes::Success.to_string(), "SUCCESS");
    }
}
