//! Journal configuration
//!
//! A single JSON file. Only `journal_dir` is required; every other field
//! has a default.
//!
//! ```json
//! {
//!   "journal_dir": "/var/lib/jrnl",
//!   "num_jfiles": 8,
//!   "jfsize_sblks": 2048,
//!   "wcache_pgsize_sblks": 8,
//!   "wcache_num_pages": 32
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::journal::{WriteManagerParams, SBLK_SIZE};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Journal configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Directory holding the journal files (required)
    pub journal_dir: PathBuf,

    /// Journal file name prefix
    #[serde(default = "default_base_filename")]
    pub base_filename: String,

    /// Number of files in the ring
    #[serde(default = "default_num_jfiles")]
    pub num_jfiles: u16,

    /// Record capacity of each file in sblks, header excluded
    #[serde(default = "default_jfsize_sblks")]
    pub jfsize_sblks: u32,

    /// Page size in sblks
    #[serde(default = "default_wcache_pgsize_sblks")]
    pub wcache_pgsize_sblks: usize,

    /// Number of pages in the write cache
    #[serde(default = "default_wcache_num_pages")]
    pub wcache_num_pages: usize,

    /// Token fragments per page before it is submitted early
    #[serde(default = "default_max_dtokpp")]
    pub max_dtokpp: usize,

    /// Default completion wait in microseconds
    #[serde(default = "default_max_io_wait_us")]
    pub max_io_wait_us: u64,

    /// Largest accepted xid in bytes
    #[serde(default = "default_max_xid_size")]
    pub max_xid_size: usize,

    /// Byte offset in file 0 to resume writing at; 0 starts fresh
    #[serde(default)]
    pub initial_offset: u64,
}

fn default_base_filename() -> String {
    "jrnl".to_string()
}
fn default_num_jfiles() -> u16 {
    8
}
fn default_jfsize_sblks() -> u32 {
    2048
} // 8 MiB per file
fn default_wcache_pgsize_sblks() -> usize {
    8
}
fn default_wcache_num_pages() -> usize {
    32
}
fn default_max_dtokpp() -> usize {
    1024
}
fn default_max_io_wait_us() -> u64 {
    1000
}
fn default_max_xid_size() -> usize {
    256
}

impl JournalConfig {
    /// Configuration with defaults for everything but the directory
    pub fn new(journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            journal_dir: journal_dir.into(),
            base_filename: default_base_filename(),
            num_jfiles: default_num_jfiles(),
            jfsize_sblks: default_jfsize_sblks(),
            wcache_pgsize_sblks: default_wcache_pgsize_sblks(),
            wcache_num_pages: default_wcache_num_pages(),
            max_dtokpp: default_max_dtokpp(),
            max_io_wait_us: default_max_io_wait_us(),
            max_xid_size: default_max_xid_size(),
            initial_offset: 0,
        }
    }

    /// Load and validate configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: JournalConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.journal_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("journal_dir", "must not be empty"));
        }
        if self.base_filename.is_empty() || self.base_filename.contains('/') {
            return Err(ConfigError::invalid(
                "base_filename",
                "must be a non-empty file name",
            ));
        }
        if self.num_jfiles < 2 {
            return Err(ConfigError::invalid("num_jfiles", "must be at least 2"));
        }
        if self.wcache_pgsize_sblks == 0 {
            return Err(ConfigError::invalid("wcache_pgsize_sblks", "must be > 0"));
        }
        if self.jfsize_sblks == 0
            || self.jfsize_sblks as usize % self.wcache_pgsize_sblks != 0
        {
            return Err(ConfigError::invalid(
                "jfsize_sblks",
                format!(
                    "must be a non-zero multiple of wcache_pgsize_sblks ({})",
                    self.wcache_pgsize_sblks
                ),
            ));
        }
        if self.wcache_num_pages < 2 {
            return Err(ConfigError::invalid("wcache_num_pages", "must be at least 2"));
        }
        if self.max_dtokpp == 0 {
            return Err(ConfigError::invalid("max_dtokpp", "must be > 0"));
        }
        if self.max_xid_size == 0 {
            return Err(ConfigError::invalid("max_xid_size", "must be > 0"));
        }
        if self.initial_offset % SBLK_SIZE as u64 != 0 {
            return Err(ConfigError::invalid(
                "initial_offset",
                format!("must be a multiple of {}", SBLK_SIZE),
            ));
        }
        Ok(())
    }

    /// Initialization contract for the write manager
    pub fn write_params(&self) -> WriteManagerParams {
        WriteManagerParams {
            num_jfiles: self.num_jfiles,
            jfsize_sblks: self.jfsize_sblks,
            wcache_pgsize_sblks: self.wcache_pgsize_sblks,
            wcache_num_pages: self.wcache_num_pages,
            max_dtokpp: self.max_dtokpp,
            max_io_wait_us: self.max_io_wait_us,
            max_xid_size: self.max_xid_size,
            initial_offset: self.initial_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("jrnl.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, r#"{"journal_dir": "/tmp/j"}"#);
        let config = JournalConfig::load(&path).unwrap();
        assert_eq!(config, JournalConfig::new("/tmp/j"));
        assert_eq!(config.write_params().wcache_num_pages, 32);
    }

    #[test]
    fn test_missing_journal_dir_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, r#"{"num_jfiles": 4}"#);
        assert!(matches!(
            JournalConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_file_size_must_be_page_multiple() {
        let mut config = JournalConfig::new("/tmp/j");
        config.jfsize_sblks = 12;
        config.wcache_pgsize_sblks = 8;
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "jfsize_sblks"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_single_file_ring_rejected() {
        let mut config = JournalConfig::new("/tmp/j");
        config.num_jfiles = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unaligned_initial_offset_rejected() {
        let mut config = JournalConfig::new("/tmp/j");
        config.initial_offset = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = JournalConfig::load(Path::new("/nonexistent/jrnl.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/jrnl.json"));
    }
}
