//! Journal write path
//!
//! Records (enqueue, dequeue, commit, abort) are encoded into dblk-aligned
//! binary form, batched into a ring of fixed-size pages and written to a
//! fixed ring of preallocated journal files by an asynchronous write
//! engine. The [`WriteManager`] drives all of it.
//!
//! # Layout
//!
//! - dblk: 128 bytes, unit of record alignment
//! - sblk: 32 dblks (4096 bytes), unit of page and file alignment
//! - each journal file: one header sblk followed by `jfsize_sblks` sblks of
//!   records; records never span files but may span pages
//!
//! # Write protocol
//!
//! 1. Call an operation (`enqueue`, `dequeue`, `commit`, `abort`).
//! 2. `CachedNotSubmitted` / `Success`: the record is in pages.
//! 3. `PageFull` / `FileFull`: drain with `get_events`, call again with the
//!    same token.
//! 4. `flush` submits a partly filled page; `get_events` applies finished
//!    writes and advances token states.

mod aio;
mod checksum;
mod errors;
mod files;
mod index;
mod page_cache;
mod record;
mod storage;
mod token;
mod txn;
mod wmgr;

pub use aio::{AioCompletion, AioEngine, AioRequest, RequestHandle};
pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{IoRes, JournalError, JournalErrorCode, JournalResult, Severity};
pub use files::FileRing;
pub use index::{EnqueueEntry, EnqueueMap, TxnMap, TxnOp};
pub use page_cache::{PageCache, PageEntry, PageState, SubmitPage, WriteFit};
pub use record::{
    decode_records, size_dblks, size_sblks, write_filler, DequeueRecord, EncodedRecord,
    EnqueueRecord, FileHeader, Record, RecordHeader, RecordType, TxnKind, TxnRecord, ABORT_MAGIC,
    COMMIT_MAGIC, DBLK_SIZE, DEQ_MAGIC, ENQ_MAGIC, FHDR_MAGIC, FILE_HEADER_SIZE, FILLER_MAGIC,
    FLAG_EXTERNAL, FLAG_TRANSIENT, RECORD_VERSION, REC_HDR_SIZE, REC_TAIL_SIZE, SBLK_DBLKS,
    SBLK_SIZE,
};
pub use storage::{
    journal_file_path, journal_file_size, read_file_headers, FileStorage, JournalStorage,
    MemStorage,
};
pub use token::{DataToken, OpType, TokenId, TokenMap, TokenRegistry, WriteState};
pub use txn::TxnTracker;
pub use wmgr::{
    BusySlot, NoopCallback, OpState, WriteCallback, WriteManager, WriteManagerParams,
    WriteManagerStatus,
};
