//! Observability for the journal write path
//!
//! - Structured one-line JSON logging
//! - Counter metrics
//! - Typed lifecycle events
//!
//! Observability is read-only: nothing here feeds back into write
//! decisions, and a failed log write is ignored.
//!
//! ```ignore
//! use jrnlstore::observability::{log_event_with_fields, Event, Logger};
//!
//! Logger::info("CONFIG_LOADED", &[("path", "/etc/jrnl.json")]);
//! log_event_with_fields(Event::FileRotate, &[("fid", "1")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
