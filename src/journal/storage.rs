//! Backing stores for journal files
//!
//! The AIO worker thread owns the store; the write manager never touches it
//! directly. `FileStorage` is the on-disk ring of preallocated files,
//! `MemStorage` keeps the ring in shared memory so tests can inspect written
//! bytes and hold or fail writes on demand.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::errors::{JournalError, JournalResult};
use super::record::{FileHeader, FILE_HEADER_SIZE, SBLK_SIZE};

/// Positional writer over a fixed ring of journal files.
pub trait JournalStorage: Send + 'static {
    /// Writes `buf` at byte `offset` of journal file `fid`.
    fn write_at(&mut self, fid: u16, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Makes previous writes to file `fid` durable.
    fn sync(&mut self, fid: u16) -> io::Result<()>;
}

/// Path of journal file `fid` under `dir`.
pub fn journal_file_path(dir: &Path, base_name: &str, fid: u16) -> PathBuf {
    dir.join(format!("{}.{:04x}.jrnl", base_name, fid))
}

/// Size in bytes of each journal file, header included.
pub fn journal_file_size(jfsize_sblks: u32) -> u64 {
    (u64::from(jfsize_sblks) + 1) * SBLK_SIZE as u64
}

/// Journal files on disk.
pub struct FileStorage {
    dir: PathBuf,
    files: Vec<File>,
}

impl FileStorage {
    /// Creates the journal directory and preallocates `num_jfiles` files.
    ///
    /// Existing files are opened and extended to the configured size; their
    /// contents are left untouched.
    pub fn create(dir: &Path, base_name: &str, num_jfiles: u16, jfsize_sblks: u32) -> JournalResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                JournalError::io(
                    format!("Failed to create journal directory: {}", dir.display()),
                    e,
                )
            })?;
        }

        let size = journal_file_size(jfsize_sblks);
        let mut files = Vec::with_capacity(usize::from(num_jfiles));
        for fid in 0..num_jfiles {
            let path = journal_file_path(dir, base_name, fid);
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| {
                    JournalError::io(format!("Failed to open journal file: {}", path.display()), e)
                })?;
            let current = file
                .metadata()
                .map_err(|e| JournalError::io(format!("Failed to stat {}", path.display()), e))?
                .len();
            if current < size {
                file.set_len(size).map_err(|e| {
                    JournalError::io(format!("Failed to size journal file: {}", path.display()), e)
                })?;
            }
            files.push(file);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    /// Journal directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file(&self, fid: u16) -> io::Result<&File> {
        self.files.get(usize::from(fid)).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("journal file {} out of range", fid),
            )
        })
    }
}

impl JournalStorage for FileStorage {
    fn write_at(&mut self, fid: u16, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file(fid)?.write_all_at(buf, offset)
    }

    fn sync(&mut self, fid: u16) -> io::Result<()> {
        self.file(fid)?.sync_data()
    }
}

/// Reads the file header of every journal file under `dir`.
///
/// A file whose first sblk does not hold a valid header yields an error entry.
pub fn read_file_headers(
    dir: &Path,
    base_name: &str,
    num_jfiles: u16,
) -> Vec<(u16, JournalResult<FileHeader>)> {
    (0..num_jfiles)
        .map(|fid| {
            let path = journal_file_path(dir, base_name, fid);
            let header = File::open(&path)
                .and_then(|file| {
                    let mut buf = vec![0u8; FILE_HEADER_SIZE];
                    file.read_exact_at(&mut buf, 0)?;
                    Ok(buf)
                })
                .map_err(|e| JournalError::io(format!("Failed to read {}", path.display()), e))
                .and_then(|buf| FileHeader::decode(&buf));
            (fid, header)
        })
        .collect()
}

#[derive(Debug, Default)]
struct MemState {
    files: Vec<Vec<u8>>,
    held: bool,
    fail_writes: u32,
    writes: u64,
}

/// In-memory journal files shared between a test and the AIO worker.
///
/// Cloning shares the same files.
#[derive(Debug, Clone)]
pub struct MemStorage {
    inner: Arc<(Mutex<MemState>, Condvar)>,
}

impl MemStorage {
    pub fn new(num_jfiles: u16, jfsize_sblks: u32) -> Self {
        let size = journal_file_size(jfsize_sblks) as usize;
        let state = MemState {
            files: vec![vec![0u8; size]; usize::from(num_jfiles)],
            ..MemState::default()
        };
        Self {
            inner: Arc::new((Mutex::new(state), Condvar::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        // a poisoned lock only means a test thread panicked; the bytes are still valid
        self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Blocks every write until [`MemStorage::release`] is called.
    pub fn hold(&self) {
        self.state().held = true;
    }

    /// Lets held writes proceed.
    pub fn release(&self) {
        self.state().held = false;
        self.inner.1.notify_all();
    }

    /// Makes the next `count` writes fail with an I/O error.
    pub fn fail_next_writes(&self, count: u32) {
        self.state().fail_writes = count;
    }

    /// Snapshot of journal file `fid`.
    pub fn file(&self, fid: u16) -> Vec<u8> {
        self.state()
            .files
            .get(usize::from(fid))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of writes performed so far
    pub fn write_count(&self) -> u64 {
        self.state().writes
    }
}

impl JournalStorage for MemStorage {
    fn write_at(&mut self, fid: u16, offset: u64, buf: &[u8]) -> io::Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap_or_else(|p| p.into_inner());
        while state.held {
            state = cvar.wait(state).unwrap_or_else(|p| p.into_inner());
        }
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let file = state.files.get_mut(usize::from(fid)).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("journal file {} out of range", fid))
        })?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > file.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("write past end of journal file {}", fid),
            ));
        }
        file[start..end].copy_from_slice(buf);
        state.writes += 1;
        Ok(())
    }

    fn sync(&mut self, _fid: u16) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_storage_preallocates_ring() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("jrnl");
        let _storage = FileStorage::create(&dir, "test", 3, 4).unwrap();

        for fid in 0..3 {
            let path = journal_file_path(&dir, "test", fid);
            assert_eq!(fs::metadata(&path).unwrap().len(), 5 * SBLK_SIZE as u64);
        }
    }

    #[test]
    fn test_file_storage_positional_write() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileStorage::create(temp_dir.path(), "test", 2, 2).unwrap();
        storage.write_at(1, SBLK_SIZE as u64, b"QLSe").unwrap();
        storage.sync(1).unwrap();

        let bytes = fs::read(journal_file_path(temp_dir.path(), "test", 1)).unwrap();
        assert_eq!(&bytes[SBLK_SIZE..SBLK_SIZE + 4], b"QLSe");
    }

    #[test]
    fn test_file_storage_rejects_unknown_fid() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileStorage::create(temp_dir.path(), "test", 2, 2).unwrap();
        assert!(storage.write_at(5, 0, b"x").is_err());
    }

    #[test]
    fn test_read_file_headers() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = FileStorage::create(temp_dir.path(), "test", 2, 2).unwrap();
        let fhdr = FileHeader::new(9, 1, 0, 0, FILE_HEADER_SIZE as u64);
        storage.write_at(0, 0, &fhdr.encode()).unwrap();

        let headers = read_file_headers(temp_dir.path(), "test", 2);
        assert_eq!(headers[0].1.as_ref().unwrap(), &fhdr);
        assert!(headers[1].1.is_err());
    }

    #[test]
    fn test_mem_storage_injected_failure() {
        let mut storage = MemStorage::new(1, 1);
        storage.fail_next_writes(1);
        assert!(storage.write_at(0, 0, b"a").is_err());
        assert!(storage.write_at(0, 0, b"a").is_ok());
        assert_eq!(storage.file(0)[0], b'a');
        assert_eq!(storage.write_count(), 1);
    }
}
