//! jrnlstore - paged asynchronous journal writer
//!
//! Enqueue, dequeue, commit and abort records are packed into a ring of
//! write pages and written to a fixed ring of preallocated journal files.
//! See [`journal::WriteManager`] for the write protocol.

pub mod cli;
pub mod config;
pub mod crash_point;
pub mod journal;
pub mod observability;
