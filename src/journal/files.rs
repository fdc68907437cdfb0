//! Journal file rotation
//!
//! The journal is a fixed ring of equally sized files. The active file is
//! filled front to back; when the next record cannot fit, the file is closed
//! and the ring advances. Each newly opened file gets a header write before
//! any of its data pages is submitted.
//!
//! A file may be reopened only when it holds no undequeued records and no
//! writes are in flight to it.

use super::aio::{AioEngine, AioRequest, RequestHandle};
use super::errors::{IoRes, JournalError, JournalResult};
use super::record::{FileHeader, FILE_HEADER_SIZE, SBLK_SIZE};
use super::storage::journal_file_size;

#[derive(Debug, Clone, Default)]
struct FileSlot {
    /// Records enqueued in this file and not yet durably dequeued
    enq_cnt: u32,
    /// Writes (header and pages) in flight to this file
    aio_cnt: u32,
    lid: u16,
    header_pending: bool,
}

/// State of the active file cursor and per-file counters
#[derive(Debug)]
pub struct FileRing {
    slots: Vec<FileSlot>,
    index: u16,
    cursor: u64,
    file_size: u64,
    next_lid: u16,
    rotations: u64,
}

impl FileRing {
    /// Creates the ring with file 0 active at byte `initial_offset`.
    ///
    /// An offset of zero means file 0 is fresh; the caller must then write
    /// its header with [`FileRing::write_file_header`].
    pub fn new(num_jfiles: u16, jfsize_sblks: u32, initial_offset: u64) -> Self {
        let cursor = if initial_offset == 0 {
            FILE_HEADER_SIZE as u64
        } else {
            initial_offset
        };
        Self {
            slots: vec![FileSlot::default(); usize::from(num_jfiles)],
            index: 0,
            cursor,
            file_size: journal_file_size(jfsize_sblks),
            next_lid: 1,
            rotations: 0,
        }
    }

    pub fn num_jfiles(&self) -> u16 {
        self.slots.len() as u16
    }

    /// Ring slot of the active file
    pub fn active_fid(&self) -> u16 {
        self.index
    }

    /// Logical id of the active file
    pub fn active_lid(&self) -> u16 {
        self.slots[usize::from(self.index)].lid
    }

    /// Next byte of the active file not yet assigned to a page
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Total file size in bytes, header included
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes available for records in an empty file
    pub fn data_capacity(&self) -> u64 {
        self.file_size - FILE_HEADER_SIZE as u64
    }

    /// Bytes left in the active file after byte `position`
    pub fn remaining_after(&self, position: u64) -> u64 {
        self.file_size.saturating_sub(position)
    }

    pub fn is_active_full(&self) -> bool {
        self.cursor >= self.file_size
    }

    /// Marks the active file as taking no more data.
    pub fn close_active(&mut self) {
        self.cursor = self.file_size;
    }

    /// Bytes a new page may take from the active file
    pub fn page_capacity(&self, page_size: usize) -> usize {
        let remaining = self.remaining_after(self.cursor) as usize;
        remaining.min(page_size) / SBLK_SIZE * SBLK_SIZE
    }

    /// Accounts a page write of `len` bytes to file `fid`.
    pub fn on_page_submitted(&mut self, fid: u16, len: usize) {
        if fid == self.index {
            self.cursor += len as u64;
        }
        self.slots[usize::from(fid)].aio_cnt += 1;
    }

    /// Accounts the completion of any write to file `fid`.
    pub fn on_write_complete(&mut self, fid: u16, handle: RequestHandle) {
        let slot = &mut self.slots[usize::from(fid)];
        slot.aio_cnt = slot.aio_cnt.saturating_sub(1);
        if matches!(handle, RequestHandle::FileHeader(_)) {
            slot.header_pending = false;
        }
    }

    pub fn incr_enq(&mut self, fid: u16) {
        self.slots[usize::from(fid)].enq_cnt += 1;
    }

    pub fn decr_enq(&mut self, fid: u16) {
        let slot = &mut self.slots[usize::from(fid)];
        slot.enq_cnt = slot.enq_cnt.saturating_sub(1);
    }

    pub fn enq_cnt(&self, fid: u16) -> u32 {
        self.slots[usize::from(fid)].enq_cnt
    }

    pub fn aio_cnt(&self, fid: u16) -> u32 {
        self.slots[usize::from(fid)].aio_cnt
    }

    pub fn header_pending(&self, fid: u16) -> bool {
        self.slots[usize::from(fid)].header_pending
    }

    /// Rotations performed since initialization
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    fn next_fid(&self) -> u16 {
        (self.index + 1) % self.num_jfiles()
    }

    /// Checks whether the ring can advance to the next file without
    /// touching any state.
    ///
    /// Returns `FileFull` while writes to the next file are still in flight,
    /// and `JournalFull` when it still holds undequeued records.
    pub fn check_rotate(&self) -> JournalResult<IoRes> {
        let next = self.next_fid();
        let slot = &self.slots[usize::from(next)];
        if slot.enq_cnt > 0 {
            return Err(JournalError::journal_full(next, slot.enq_cnt));
        }
        if slot.aio_cnt > 0 {
            return Ok(IoRes::FileFull);
        }
        Ok(IoRes::Success)
    }

    /// Advances to the next file in the ring and submits its header.
    ///
    /// Fails the same way as [`FileRing::check_rotate`].
    pub fn rotate_file(&mut self, engine: &mut AioEngine, serial: u64, rid: u64) -> JournalResult<IoRes> {
        if self.check_rotate()? == IoRes::FileFull {
            return Ok(IoRes::FileFull);
        }
        let next = self.next_fid();

        let lid = self.next_lid;
        self.next_lid = self.next_lid.wrapping_add(1);
        self.index = next;
        self.slots[usize::from(next)].lid = lid;
        self.cursor = FILE_HEADER_SIZE as u64;
        self.rotations += 1;

        self.write_file_header(engine, serial, rid, next, lid, FILE_HEADER_SIZE as u64)?;
        Ok(IoRes::Success)
    }

    /// Builds and submits the header of file `fid`.
    pub fn write_file_header(
        &mut self,
        engine: &mut AioEngine,
        serial: u64,
        rid: u64,
        fid: u16,
        lid: u16,
        first_record_offset: u64,
    ) -> JournalResult<()> {
        let buf = FileHeader::new(serial, rid, fid, lid, first_record_offset).encode();
        let len = buf.len();
        engine.submit(AioRequest {
            handle: RequestHandle::FileHeader(fid),
            fid,
            offset: 0,
            buf,
            len,
        })?;
        let slot = &mut self.slots[usize::from(fid)];
        slot.aio_cnt += 1;
        slot.header_pending = true;
        Ok(())
    }
}
