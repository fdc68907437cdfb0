//! CLI argument definitions using clap
//!
//! Commands:
//! - jrnlstore init --config <path>
//! - jrnlstore write --config <path>
//! - jrnlstore inspect --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// jrnlstore - write path of a disk-backed transactional journal
#[derive(Parser, Debug)]
#[command(name = "jrnlstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and preallocate the journal files
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./jrnl.json")]
        config: PathBuf,
    },

    /// Apply JSON-line write requests read from stdin
    Write {
        /// Path to configuration file
        #[arg(long, default_value = "./jrnl.json")]
        config: PathBuf,
    },

    /// Print the header of every journal file
    Inspect {
        /// Path to configuration file
        #[arg(long, default_value = "./jrnl.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
