//! Command-line interface
//!
//! - init: create and preallocate the journal files
//! - write: apply JSON-line write requests from stdin to the journal
//! - inspect: print the header of every journal file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, inspect, run, run_command, write, write_stream, WriteRequest};
pub use errors::{CliError, CliResult};
pub use io::{read_requests, write_error, write_response};
