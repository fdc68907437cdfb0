//! Observable journal events
//!
//! Events are explicit and typed; each maps to a stable event name used as
//! the `event` field of a log line.

use std::fmt;

use super::logger::Severity;

/// Observable events of the journal write path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Write manager initialized
    JournalInit,
    /// Configuration loaded
    ConfigLoaded,
    /// Page handed to the AIO engine
    PageSubmit,
    /// Page or file header write completed
    AioComplete,
    /// Write failed; journal latched failed
    AioFailure,
    /// Active journal file advanced
    FileRotate,
    /// Rotation refused, next file still occupied
    JournalFull,
    /// Dequeue queued behind an unconfirmed dependency
    DequeueDeferred,
    /// Deferred dequeue dropped, its dependency went away
    DequeueDropped,
    /// Commit/abort of a transaction durable
    TxnSynced,
    /// Shutdown begins
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::JournalInit => "JRNL_INIT",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::PageSubmit => "PAGE_SUBMIT",
            Event::AioComplete => "AIO_COMPLETE",
            Event::AioFailure => "AIO_FAILURE",
            Event::FileRotate => "FILE_ROTATE",
            Event::JournalFull => "JOURNAL_FULL",
            Event::DequeueDeferred => "DEQUEUE_DEFERRED",
            Event::DequeueDropped => "DEQUEUE_DROPPED",
            Event::TxnSynced => "TXN_SYNCED",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::PageSubmit | Event::AioComplete | Event::TxnSynced => Severity::Trace,
            Event::JournalFull | Event::DequeueDropped => Severity::Warn,
            Event::AioFailure => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::AioFailure)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Event; 12] = [
        Event::JournalInit,
        Event::ConfigLoaded,
        Event::PageSubmit,
        Event::AioComplete,
        Event::AioFailure,
        Event::FileRotate,
        Event::JournalFull,
        Event::DequeueDeferred,
        Event::DequeueDropped,
        Event::TxnSynced,
        Event::ShutdownStart,
        Event::ShutdownComplete,
    ];

    #[test]
    fn test_event_names_are_screaming_snake_case() {
        for event in ALL {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'), "{}", s);
        }
    }

    #[test]
    fn test_only_aio_failure_is_fatal() {
        let fatal: Vec<_> = ALL.iter().filter(|e| e.is_fatal()).collect();
        assert_eq!(fatal, vec![&Event::AioFailure]);
        assert_eq!(Event::AioFailure.severity(), Severity::Fatal);
    }
}
