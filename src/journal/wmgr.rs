//! Write manager
//!
//! The public entry point of the journal write path. Each call drives one
//! record (enqueue, dequeue, commit or abort) through the page cache,
//! submitting pages as they fill and rotating journal files when the next
//! record cannot fit. A record that cannot be finished in one call because
//! the next page or file is still busy stays pending; the caller drains
//! completions with [`WriteManager::get_events`] and repeats the call with
//! the same token.
//!
//! # Busy slots
//!
//! Each operation type has a slot that is `Idle` or `InProgress(token)`.
//! At most one record is partially written at any time, so while one slot
//! is busy every other operation is refused with
//! `JRNL_OPERATION_IN_PROGRESS`. Completed records of any type share pages
//! freely; a commit may land in the same page as unrelated enqueues, but
//! never in the middle of another record.
//!
//! # Completion
//!
//! Nothing here blocks on disk I/O except `get_events`, which waits (up to
//! a timeout) for the AIO worker to hand completions back. Completion
//! processing updates page states, the enqueue and transaction indexes,
//! file enqueue counts and token states, then retries deferred dequeues.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::crash_point::{maybe_crash, points};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry, Severity};

use super::aio::{AioCompletion, AioEngine, AioRequest, RequestHandle};
use super::errors::{IoRes, JournalError, JournalResult};
use super::files::FileRing;
use super::index::{EnqueueMap, TxnMap, TxnOp};
use super::page_cache::{PageCache, PageEntry, PageState, WriteFit};
use super::record::{
    DequeueRecord, EncodedRecord, EnqueueRecord, TxnKind, TxnRecord, DBLK_SIZE, FILE_HEADER_SIZE,
    SBLK_SIZE,
};
use super::storage::JournalStorage;
use super::token::{DataToken, OpType, TokenId, TokenRegistry, WriteState};
use super::txn::TxnTracker;

/// Initialization contract of the write manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteManagerParams {
    pub num_jfiles: u16,
    /// Data capacity of each journal file, header excluded
    pub jfsize_sblks: u32,
    pub wcache_pgsize_sblks: usize,
    pub wcache_num_pages: usize,
    /// Token fragments after which a page is submitted at the next record boundary
    pub max_dtokpp: usize,
    /// Default wait of `get_events`
    pub max_io_wait_us: u64,
    pub max_xid_size: usize,
    /// Byte offset in file 0 to resume at; 0 starts a fresh file 0
    pub initial_offset: u64,
}

impl WriteManagerParams {
    fn validate(&self) -> JournalResult<()> {
        if self.num_jfiles < 2 {
            return Err(JournalError::invalid_argument("num_jfiles must be at least 2"));
        }
        if self.wcache_pgsize_sblks == 0 || self.wcache_num_pages < 2 {
            return Err(JournalError::invalid_argument(
                "page cache needs at least 2 pages of at least 1 sblk",
            ));
        }
        if self.jfsize_sblks == 0 {
            return Err(JournalError::invalid_argument("jfsize_sblks must be non-zero"));
        }
        if self.max_dtokpp == 0 {
            return Err(JournalError::invalid_argument("max_dtokpp must be non-zero"));
        }
        if self.initial_offset != 0 {
            let end = FILE_HEADER_SIZE as u64 + u64::from(self.jfsize_sblks) * SBLK_SIZE as u64;
            if self.initial_offset % SBLK_SIZE as u64 != 0
                || self.initial_offset < FILE_HEADER_SIZE as u64
                || self.initial_offset > end
            {
                return Err(JournalError::invalid_argument("initial offset out of range")
                    .with_details(format!("initial_offset: {}", self.initial_offset)));
            }
        }
        Ok(())
    }
}

/// Receives the ids of tokens whose writes finished.
pub trait WriteCallback {
    /// Records of these tokens are durable
    fn write_complete(&mut self, tokens: &[TokenId]);

    /// Writes carrying these tokens failed
    fn write_failed(&mut self, _tokens: &[TokenId]) {}
}

/// Callback that ignores every notification
#[derive(Debug, Default)]
pub struct NoopCallback;

impl WriteCallback for NoopCallback {
    fn write_complete(&mut self, _tokens: &[TokenId]) {}
}

/// State of one operation type's busy slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpState {
    Idle,
    InProgress(TokenId),
}

/// One busy slot in a status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BusySlot {
    pub op: OpType,
    pub state: OpState,
}

/// Structured diagnostic snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteManagerStatus {
    pub busy: Vec<BusySlot>,
    pub page_index: usize,
    pub page_states: Vec<PageState>,
    pub active_fid: u16,
    pub active_lid: u16,
    pub file_offset: u64,
    pub unflushed_dblks: usize,
    pub aio_outstanding: usize,
    pub aio_outstanding_pages: usize,
    pub deferred_dequeues: usize,
    pub pending_txns: usize,
    pub rotations: u64,
    pub failed: bool,
}

#[derive(Debug, Clone, Copy)]
struct TokenSnapshot {
    wstate: WriteState,
    rid: u64,
    dequeue_rid: u64,
}

impl TokenSnapshot {
    fn of(token: &DataToken) -> Self {
        Self {
            wstate: token.wstate,
            rid: token.rid,
            dequeue_rid: token.dequeue_rid,
        }
    }

    fn restore(self, token: &mut DataToken) {
        token.wstate = self.wstate;
        token.rid = self.rid;
        token.dequeue_rid = self.dequeue_rid;
    }
}

/// The record currently being copied into pages
#[derive(Debug)]
struct PendingRecord {
    token: TokenId,
    op: OpType,
    rid: u64,
    xid: Vec<u8>,
    dequeued_rid: u64,
    /// For dequeues, the file holding the dequeued enqueue
    dequeued_fid: u16,
    /// File holding the record header, known once the first byte is cached
    fid: u16,
    record: EncodedRecord,
    prior: TokenSnapshot,
}

enum DequeueTarget {
    Ready(u16),
    Wait,
    Locked,
    Unknown,
}

/// Orchestrates page cache, AIO engine, file ring and transaction state.
pub struct WriteManager {
    engine: AioEngine,
    pages: PageCache,
    files: FileRing,
    txns: TxnTracker,
    enq_map: EnqueueMap,
    txn_map: TxnMap,
    busy: [OpState; 4],
    pending: Option<PendingRecord>,
    deferred: VecDeque<TokenId>,
    /// Deferred dequeue whose retry left its record partly written
    deferred_active: Option<TokenId>,
    callback: Box<dyn WriteCallback>,
    metrics: MetricsRegistry,
    serial: u64,
    next_rid: u64,
    max_dtokpp: usize,
    max_xid_size: usize,
    max_io_wait: Duration,
    failed: bool,
}

impl WriteManager {
    /// Starts the AIO worker over `storage` and prepares the page ring.
    ///
    /// With a zero initial offset the header of file 0 is submitted
    /// immediately; otherwise writing resumes inside file 0 at that offset.
    pub fn initialize<S: JournalStorage>(
        params: WriteManagerParams,
        storage: S,
        callback: Box<dyn WriteCallback>,
    ) -> JournalResult<Self> {
        params.validate()?;

        let engine = AioEngine::start(storage)?;
        let mut wmgr = Self {
            engine,
            pages: PageCache::new(params.wcache_pgsize_sblks, params.wcache_num_pages),
            files: FileRing::new(params.num_jfiles, params.jfsize_sblks, params.initial_offset),
            txns: TxnTracker::new(),
            enq_map: EnqueueMap::new(),
            txn_map: TxnMap::new(),
            busy: [OpState::Idle; 4],
            pending: None,
            deferred: VecDeque::new(),
            deferred_active: None,
            callback,
            metrics: MetricsRegistry::new(),
            serial: rand::random::<u64>(),
            next_rid: 1,
            max_dtokpp: params.max_dtokpp,
            max_xid_size: params.max_xid_size,
            max_io_wait: Duration::from_micros(params.max_io_wait_us),
            failed: false,
        };

        if params.initial_offset == 0 {
            let rid = wmgr.next_rid;
            wmgr.files.write_file_header(
                &mut wmgr.engine,
                wmgr.serial,
                rid,
                0,
                0,
                FILE_HEADER_SIZE as u64,
            )?;
            wmgr.metrics.increment_file_headers();
        }

        log_event_with_fields(
            Event::JournalInit,
            &[
                ("num_jfiles", &params.num_jfiles.to_string()),
                ("jfsize_sblks", &params.jfsize_sblks.to_string()),
                ("pgsize_sblks", &params.wcache_pgsize_sblks.to_string()),
                ("num_pages", &params.wcache_num_pages.to_string()),
                ("offset", &wmgr.files.cursor().to_string()),
            ],
        );
        Ok(wmgr)
    }

    /// Enqueues `data` for `token`, inside transaction `xid` when non-empty.
    ///
    /// An `external` enqueue records only the payload size. Repeating the
    /// call after `PageFull`/`FileFull` continues the pending record; the
    /// data and flags of the repeated call are not looked at again.
    pub fn enqueue(
        &mut self,
        token: &mut DataToken,
        data: &[u8],
        xid: &[u8],
        transient: bool,
        external: bool,
    ) -> JournalResult<IoRes> {
        self.check_failed()?;
        if let Some(res) = self.continue_pending(OpType::Enqueue, token)? {
            return Ok(res);
        }
        match token.wstate {
            WriteState::None => {}
            state if Self::in_flight(state) => {
                return Err(JournalError::operation_in_progress(
                    "token already has a write in flight",
                )
                .with_details(format!("token: {}, state: {:?}", token.id(), state)));
            }
            state => {
                return Err(JournalError::invalid_argument("token cannot be enqueued again")
                    .with_details(format!("token: {}, state: {:?}", token.id(), state)));
            }
        }

        let stored_len = if external { 0 } else { data.len() };
        self.pre_write_check(
            OpType::Enqueue,
            xid,
            EnqueueRecord::encoded_len_for(xid.len(), stored_len),
        )?;

        let prior = TokenSnapshot::of(token);
        let rid = if token.external_rid() {
            token.rid
        } else {
            self.next_rid
        };
        if xid.is_empty() && self.enq_map.contains(rid) {
            return Err(JournalError::invalid_argument("record id already enqueued")
                .with_details(format!("rid: {}", rid)));
        }
        if !token.external_rid() {
            self.alloc_rid();
        }

        let record = if external {
            EnqueueRecord::external(self.serial, rid, xid, data.len() as u64, transient)
        } else {
            EnqueueRecord::new(self.serial, rid, xid, data, transient)
        };
        token.dsize = data.len() as u64;
        self.start_record(token, OpType::Enqueue, rid, xid, 0, 0, record.encode(), prior)
    }

    /// Dequeues the record enqueued by `token` (or, for a token built with
    /// [`DataToken::for_dequeue`], its `dequeue_rid`).
    ///
    /// Returns `Deferred` when the enqueue is not durable yet or belongs to
    /// another open transaction; the dequeue is then retried by `get_events`.
    pub fn dequeue(&mut self, token: &mut DataToken, xid: &[u8]) -> JournalResult<IoRes> {
        self.check_failed()?;
        if let Some(res) = self.continue_pending(OpType::Dequeue, token)? {
            return Ok(res);
        }

        let prior = TokenSnapshot::of(token);
        let (rid, dequeued_rid) = match token.wstate {
            state if state.is_enqueue_state() => (None, token.rid),
            WriteState::None if token.external_rid() => (Some(token.rid), token.dequeue_rid),
            WriteState::DequeueDeferred => {
                self.deferred.retain(|id| *id != token.id());
                (Some(token.rid), token.dequeue_rid)
            }
            state if Self::in_flight(state) => {
                return Err(JournalError::operation_in_progress(
                    "token already has a write in flight",
                )
                .with_details(format!("token: {}, state: {:?}", token.id(), state)));
            }
            state => {
                return Err(JournalError::invalid_argument("token holds no record to dequeue")
                    .with_details(format!("token: {}, state: {:?}", token.id(), state)));
            }
        };

        self.pre_write_check(OpType::Dequeue, xid, DequeueRecord::encoded_len_for(xid.len()))?;

        let dequeued_fid = match self.resolve_dequeue(dequeued_rid, xid) {
            DequeueTarget::Ready(fid) => fid,
            DequeueTarget::Wait => {
                token.rid = rid.unwrap_or_else(|| self.alloc_rid());
                token.dequeue_rid = dequeued_rid;
                token.xid = xid.to_vec();
                token.wstate = WriteState::DequeueDeferred;
                self.deferred.push_back(token.id());
                self.metrics.increment_deferred();
                log_event_with_fields(
                    Event::DequeueDeferred,
                    &[
                        ("token", &token.id().to_string()),
                        ("dequeued_rid", &dequeued_rid.to_string()),
                    ],
                );
                return Ok(IoRes::Deferred);
            }
            DequeueTarget::Locked => {
                Self::drop_deferred(token);
                return Err(JournalError::invalid_argument(
                    "record is already being dequeued by an open transaction",
                )
                .with_details(format!("rid: {}", dequeued_rid)));
            }
            DequeueTarget::Unknown => {
                Self::drop_deferred(token);
                return Err(JournalError::invalid_argument("record id is not enqueued")
                    .with_details(format!("rid: {}", dequeued_rid)));
            }
        };

        let rid = rid.unwrap_or_else(|| self.alloc_rid());
        token.dequeue_rid = dequeued_rid;
        let record = DequeueRecord::new(self.serial, rid, dequeued_rid, xid).encode();
        self.start_record(token, OpType::Dequeue, rid, xid, dequeued_rid, dequeued_fid, record, prior)
    }

    /// Writes the abort record of transaction `xid`.
    pub fn abort(&mut self, token: &mut DataToken, xid: &[u8]) -> JournalResult<IoRes> {
        self.txn_control(OpType::Abort, TxnKind::Abort, token, xid)
    }

    /// Writes the commit record of transaction `xid`.
    pub fn commit(&mut self, token: &mut DataToken, xid: &[u8]) -> JournalResult<IoRes> {
        self.txn_control(OpType::Commit, TxnKind::Commit, token, xid)
    }

    fn txn_control(
        &mut self,
        op: OpType,
        kind: TxnKind,
        token: &mut DataToken,
        xid: &[u8],
    ) -> JournalResult<IoRes> {
        self.check_failed()?;
        if let Some(res) = self.continue_pending(op, token)? {
            return Ok(res);
        }
        match token.wstate {
            state if Self::in_flight(state) || state == WriteState::DequeueDeferred => {
                return Err(JournalError::operation_in_progress(
                    "token already has a write in flight",
                )
                .with_details(format!("token: {}, state: {:?}", token.id(), state)));
            }
            WriteState::Failed => {
                return Err(JournalError::invalid_argument("token write failed earlier")
                    .with_details(format!("token: {}", token.id())));
            }
            _ => {}
        }

        self.pre_write_check(op, xid, TxnRecord::encoded_len_for(xid.len()))?;

        let prior = TokenSnapshot::of(token);
        let rid = if token.external_rid() && token.wstate == WriteState::None {
            token.rid
        } else {
            self.alloc_rid()
        };
        let record = TxnRecord::new(kind, self.serial, rid, xid).encode();
        self.start_record(token, op, rid, xid, 0, 0, record, prior)
    }

    /// Submits the partly filled page, padded to the next sblk.
    ///
    /// Never rotates files. With nothing cached this is a no-op.
    pub fn flush(&mut self) -> JournalResult<IoRes> {
        self.check_failed()?;
        if self.pages.unflushed_amount() == 0 {
            return Ok(IoRes::Success);
        }
        self.pages.round_up_to_sblk();
        self.submit_page()?;
        Ok(IoRes::Success)
    }

    /// Reaps finished writes and applies them.
    ///
    /// Waits up to `timeout` (default `max_io_wait_us`) for at least one
    /// completion, or for all outstanding writes when `force_flush` is set.
    /// Completed pages move to `target`: `Unused` makes them reusable at
    /// once, `WriteComplete` leaves them visible until the next write.
    /// Deferred dequeues whose dependency resolved are retried afterwards.
    ///
    /// Returns the number of completions applied.
    pub fn get_events(
        &mut self,
        tokens: &mut dyn TokenRegistry,
        target: PageState,
        timeout: Option<Duration>,
        force_flush: bool,
    ) -> JournalResult<usize> {
        self.check_failed()?;
        if !matches!(target, PageState::Unused | PageState::WriteComplete) {
            return Err(JournalError::invalid_argument(
                "completed pages can only move to Unused or WriteComplete",
            ));
        }

        let min_events = if force_flush {
            self.engine.outstanding()
        } else {
            1
        };
        let timeout = timeout.unwrap_or(self.max_io_wait);
        let completions = match self.engine.reap(min_events, timeout) {
            Ok(completions) => completions,
            Err(e) => return Err(self.latch(e)),
        };

        let count = completions.len();
        let mut done = Vec::new();
        let mut first_error = None;
        for completion in completions {
            if let Err(e) = self.apply_completion(completion, target, tokens, &mut done) {
                first_error.get_or_insert(e);
            }
        }
        self.metrics.add_completions(count as u64);

        if let Some(e) = first_error {
            if !done.is_empty() {
                self.callback.write_complete(&done);
            }
            return Err(e);
        }

        self.reconcile_submitted(tokens);
        if !done.is_empty() {
            self.callback.write_complete(&done);
        }
        self.retry_deferred(tokens)?;
        Ok(count)
    }

    /// True when every commit/abort and every transactional write of `xid`
    /// is durable. An xid never seen is synced.
    pub fn is_txn_synced(&self, xid: &[u8]) -> bool {
        self.txns.is_synced(xid) && self.txn_map.is_txn_synced(xid)
    }

    /// True while the next page still awaits an earlier write
    pub fn current_page_blocked(&self) -> bool {
        self.pages.current_page_blocked()
    }

    /// Short alias of [`WriteManager::current_page_blocked`]
    pub fn curr_pg_blocked(&self) -> bool {
        self.current_page_blocked()
    }

    /// Dblks cached in the filling page and not yet submitted
    pub fn unflushed_dblks(&self) -> usize {
        self.pages.unflushed_amount() / DBLK_SIZE
    }

    /// One-line diagnostic summary
    pub fn status_str(&self) -> String {
        let mut out = String::with_capacity(128);
        out.push_str("wmgr: busy=[");
        for (i, op) in OpType::ALL.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match self.busy[op.index()] {
                OpState::Idle => {
                    let _ = write!(out, "{}:-", op);
                }
                OpState::InProgress(id) => {
                    let _ = write!(out, "{}:{}", op, id);
                }
            }
        }
        out.push_str("] pages=[");
        for (i, state) in self.pages.states().into_iter().enumerate() {
            if i == self.pages.index() {
                out.push('*');
            }
            out.push(state.code());
        }
        let _ = write!(
            out,
            "] fid={} lid={} offs=0x{:x} unflushed_dblks={} aio_outstanding={} deferred={}",
            self.files.active_fid(),
            self.files.active_lid(),
            self.files.cursor(),
            self.unflushed_dblks(),
            self.engine.outstanding(),
            self.deferred.len(),
        );
        if self.failed {
            out.push_str(" FAILED");
        }
        out
    }

    /// Structured diagnostic snapshot
    pub fn status(&self) -> WriteManagerStatus {
        WriteManagerStatus {
            busy: OpType::ALL
                .iter()
                .map(|op| BusySlot {
                    op: *op,
                    state: self.busy[op.index()],
                })
                .collect(),
            page_index: self.pages.index(),
            page_states: self.pages.states(),
            active_fid: self.files.active_fid(),
            active_lid: self.files.active_lid(),
            file_offset: self.files.cursor(),
            unflushed_dblks: self.unflushed_dblks(),
            aio_outstanding: self.engine.outstanding(),
            aio_outstanding_pages: self.engine.outstanding_pages(),
            deferred_dequeues: self.deferred.len(),
            pending_txns: self.txns.pending_count(),
            rotations: self.files.rotations(),
            failed: self.failed,
        }
    }

    /// Flushes the filling page and waits for every outstanding write.
    ///
    /// Deferred dequeues that become ready while draining are written and
    /// drained too; ones still blocked stay deferred.
    pub fn shutdown(&mut self, tokens: &mut dyn TokenRegistry) -> JournalResult<()> {
        log_event_with_fields(
            Event::ShutdownStart,
            &[("outstanding", &self.engine.outstanding().to_string())],
        );
        loop {
            self.flush()?;
            if self.engine.outstanding() == 0 {
                break;
            }
            self.get_events(tokens, PageState::Unused, None, true)?;
        }
        self.pages.recycle_completed();
        log_event_with_fields(
            Event::ShutdownComplete,
            &[
                ("bytes_submitted", &self.metrics.bytes_submitted().to_string()),
                ("deferred", &self.deferred.len().to_string()),
            ],
        );
        Ok(())
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn enq_map(&self) -> &EnqueueMap {
        &self.enq_map
    }

    pub fn txn_map(&self) -> &TxnMap {
        &self.txn_map
    }

    /// Records enqueued in journal file `fid` and not yet dequeued
    pub fn file_enq_count(&self, fid: u16) -> u32 {
        self.files.enq_cnt(fid)
    }

    /// Serial stamped on every record of this journal instance
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn active_fid(&self) -> u16 {
        self.files.active_fid()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    // ---- write path ----

    fn check_failed(&self) -> JournalResult<()> {
        if self.failed {
            return Err(JournalError::io_failed(
                "journal write failed earlier; re-initialize the journal",
            ));
        }
        Ok(())
    }

    fn latch(&mut self, e: JournalError) -> JournalError {
        if e.is_fatal() {
            self.failed = true;
        }
        e
    }

    fn in_flight(state: WriteState) -> bool {
        state.is_part() || state.is_cached() || state.is_submitted()
    }

    /// A deferred token whose dependency is gone cannot be retried.
    fn drop_deferred(token: &mut DataToken) {
        if token.wstate == WriteState::DequeueDeferred {
            token.wstate = WriteState::Failed;
        }
    }

    fn alloc_rid(&mut self) -> u64 {
        let rid = self.next_rid;
        self.next_rid += 1;
        rid
    }

    /// Returns `rid` to the allocator when it was the last one handed out
    /// and the token did not already own it.
    fn release_rid(&mut self, rid: u64, prior_rid: u64) {
        if rid != prior_rid && rid + 1 == self.next_rid {
            self.next_rid = rid;
        }
    }

    /// Resumes the pending record when it belongs to `op` and `token`.
    ///
    /// Returns `None` when no record is pending.
    fn continue_pending(
        &mut self,
        op: OpType,
        token: &mut DataToken,
    ) -> JournalResult<Option<IoRes>> {
        let (busy_op, busy_token) = match &self.pending {
            None => return Ok(None),
            Some(p) => (p.op, p.token),
        };
        if busy_op == op && busy_token == token.id() {
            return self.write_pending(token).map(Some);
        }
        Err(JournalError::operation_in_progress(format!(
            "{} of {} is partly written",
            busy_op, busy_token
        ))
        .with_details(format!("requested: {} of {}", op, token.id())))
    }

    /// Validates sizes before anything is encoded or cached.
    fn pre_write_check(&self, op: OpType, xid: &[u8], encoded_len: usize) -> JournalResult<()> {
        if xid.len() > self.max_xid_size {
            return Err(JournalError::invalid_argument("xid exceeds maximum size")
                .with_details(format!("xid_size: {}, max: {}", xid.len(), self.max_xid_size)));
        }
        if matches!(op, OpType::Commit | OpType::Abort) && xid.is_empty() {
            return Err(JournalError::invalid_argument(format!(
                "{} requires a non-empty xid",
                op
            )));
        }
        let padded = super::record::size_dblks(encoded_len) * DBLK_SIZE;
        if padded as u64 > self.files.data_capacity() {
            return Err(JournalError::invalid_argument("record larger than a journal file")
                .with_details(format!(
                    "record_size: {}, file_capacity: {}",
                    padded,
                    self.files.data_capacity()
                )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn start_record(
        &mut self,
        token: &mut DataToken,
        op: OpType,
        rid: u64,
        xid: &[u8],
        dequeued_rid: u64,
        dequeued_fid: u16,
        bytes: Vec<u8>,
        prior: TokenSnapshot,
    ) -> JournalResult<IoRes> {
        token.begin_record(op.part_state());
        token.rid = rid;
        token.xid = xid.to_vec();
        self.busy[op.index()] = OpState::InProgress(token.id());
        self.pending = Some(PendingRecord {
            token: token.id(),
            op,
            rid,
            xid: xid.to_vec(),
            dequeued_rid,
            dequeued_fid,
            fid: self.files.active_fid(),
            record: EncodedRecord::new(bytes),
            prior,
        });
        self.write_pending(token)
    }

    fn write_pending(&mut self, token: &mut DataToken) -> JournalResult<IoRes> {
        let mut pending = match self.pending.take() {
            Some(p) => p,
            None => return Err(JournalError::invalid_argument("no record pending")),
        };

        match self.write_record(&mut pending, token) {
            Ok(res) => {
                if pending.record.is_complete() {
                    self.busy[pending.op.index()] = OpState::Idle;
                } else {
                    self.pending = Some(pending);
                }
                Ok(res)
            }
            Err(e) if e.is_fatal() => {
                token.wstate = WriteState::Failed;
                self.busy[pending.op.index()] = OpState::Idle;
                Err(self.latch(e))
            }
            Err(e) => {
                if pending.record.written() == 0 {
                    // nothing cached yet: leave no trace of the attempt
                    self.release_rid(pending.rid, pending.prior.rid);
                    pending.prior.restore(token);
                    self.busy[pending.op.index()] = OpState::Idle;
                } else {
                    self.pending = Some(pending);
                }
                Err(e)
            }
        }
    }

    /// Copies the pending record into pages until it is fully cached or a
    /// busy page or file forces a return.
    fn write_record(
        &mut self,
        pending: &mut PendingRecord,
        token: &mut DataToken,
    ) -> JournalResult<IoRes> {
        let mut last_page_submitted = false;
        loop {
            if self.files.is_active_full() {
                if self.rotate_file(pending.rid)? == IoRes::FileFull {
                    return Ok(IoRes::FileFull);
                }
            }

            if self.pages.current_state() == PageState::WriteComplete {
                self.pages.recycle_completed();
            }
            if self.pages.current_page_blocked() {
                return Ok(IoRes::PageFull);
            }

            let first_chunk = pending.record.written() == 0;
            if first_chunk {
                let position = match self.pages.fill_position() {
                    Some((_, pos)) => pos,
                    None => self.files.cursor(),
                };
                if pending.record.len() as u64 > self.files.remaining_after(position) {
                    // the active file stays open unless the next one can take over
                    if self.check_rotate()? == IoRes::FileFull {
                        return Ok(IoRes::FileFull);
                    }
                    if self.pages.unflushed_amount() > 0 {
                        self.pages.pad_to_capacity();
                        self.submit_page()?;
                    }
                    self.files.close_active();
                    continue;
                }
            }

            if self.pages.current_state() == PageState::Unused {
                let capacity = self.files.page_capacity(self.pages.page_size());
                self.pages
                    .begin_fill(self.files.active_fid(), self.files.cursor(), capacity);
            }
            if first_chunk {
                pending.fid = self.files.active_fid();
                token.fid = pending.fid;
            }

            let offered = pending.record.remaining().len();
            let accepted = match self.pages.write(pending.record.remaining()) {
                WriteFit::Overflow(rest) => offered - rest,
                WriteFit::Fits | WriteFit::FilledExactly => offered,
            };
            pending.record.advance(accepted);
            token.dblks_written += accepted / DBLK_SIZE;
            token.pg_cnt += 1;

            let record_end = pending.record.is_complete();
            let release_fids = if record_end {
                self.on_record_cached(pending)
            } else {
                Vec::new()
            };
            self.pages.add_entry(PageEntry {
                token: pending.token,
                op: pending.op,
                rid: pending.rid,
                record_end,
                xid: pending.xid.clone(),
                release_fids,
            });

            let token_limit = record_end && self.pages.entry_count() >= self.max_dtokpp;
            if self.pages.is_full() || token_limit {
                self.pages.round_up_to_sblk();
                self.submit_page()?;
                last_page_submitted = record_end;
            }

            if record_end {
                return Ok(if last_page_submitted {
                    token.wstate = pending.op.submitted_state();
                    IoRes::Success
                } else {
                    token.wstate = pending.op.cached_state();
                    IoRes::CachedNotSubmitted
                });
            }
        }
    }

    /// Index bookkeeping once the last byte of a record is cached.
    ///
    /// Returns the files whose enqueue count drops when this record is
    /// durable.
    fn on_record_cached(&mut self, pending: &PendingRecord) -> Vec<u16> {
        let xid = pending.xid.as_slice();
        match pending.op {
            OpType::Enqueue => {
                if xid.is_empty() {
                    self.enq_map.insert(pending.rid, pending.fid, false);
                } else {
                    self.txn_map.insert(
                        xid,
                        TxnOp {
                            rid: pending.rid,
                            dequeued_rid: 0,
                            fid: pending.fid,
                            is_enqueue: true,
                            aio_complete: false,
                        },
                    );
                }
                self.files.incr_enq(pending.fid);
                self.metrics.increment_enqueues();
                Vec::new()
            }
            OpType::Dequeue => {
                self.metrics.increment_dequeues();
                if xid.is_empty() {
                    self.enq_map
                        .remove(pending.dequeued_rid)
                        .map(|entry| vec![entry.fid])
                        .unwrap_or_default()
                } else {
                    self.txn_map.insert(
                        xid,
                        TxnOp {
                            rid: pending.rid,
                            dequeued_rid: pending.dequeued_rid,
                            fid: pending.dequeued_fid,
                            is_enqueue: false,
                            aio_complete: false,
                        },
                    );
                    self.enq_map.set_locked(pending.dequeued_rid, true);
                    Vec::new()
                }
            }
            OpType::Commit => {
                self.metrics.increment_commits();
                let ops = self.txn_map.take(xid);
                let mut release = Vec::new();
                for op in ops.iter().filter(|op| op.is_enqueue) {
                    self.enq_map.insert(op.rid, op.fid, op.aio_complete);
                }
                for op in ops.iter().filter(|op| !op.is_enqueue) {
                    self.enq_map.remove(op.dequeued_rid);
                    release.push(op.fid);
                }
                self.txns.mark_pending(xid);
                release
            }
            OpType::Abort => {
                self.metrics.increment_aborts();
                let ops = self.txn_map.take(xid);
                let mut release = Vec::new();
                for op in ops {
                    if op.is_enqueue {
                        release.push(op.fid);
                    } else {
                        self.enq_map.set_locked(op.dequeued_rid, false);
                    }
                }
                self.txns.mark_pending(xid);
                release
            }
        }
    }

    fn submit_page(&mut self) -> JournalResult<()> {
        let page = match self.pages.take_for_submit() {
            Some(page) => page,
            None => return Ok(()),
        };
        maybe_crash(points::WMGR_BEFORE_PAGE_SUBMIT);

        let (index, fid, offset, len) = (page.index, page.fid, page.file_offset, page.len);
        let request = AioRequest {
            handle: RequestHandle::Page(index),
            fid,
            offset,
            buf: page.buf,
            len,
        };
        if let Err(e) = self.engine.submit(request) {
            return Err(self.latch(e));
        }
        self.files.on_page_submitted(fid, len);
        self.metrics.record_page_submit(len as u64);
        if Logger::enabled(Severity::Trace) {
            log_event_with_fields(
                Event::PageSubmit,
                &[
                    ("pg", &index.to_string()),
                    ("fid", &fid.to_string()),
                    ("offs", &offset.to_string()),
                    ("len", &len.to_string()),
                ],
            );
        }
        self.pages.rotate_page();
        Ok(())
    }

    fn check_rotate(&self) -> JournalResult<IoRes> {
        self.files.check_rotate().map_err(|e| {
            log_event_with_fields(Event::JournalFull, &[("details", e.details().unwrap_or(""))]);
            e
        })
    }

    fn rotate_file(&mut self, rid: u64) -> JournalResult<IoRes> {
        if self.check_rotate()? == IoRes::FileFull {
            return Ok(IoRes::FileFull);
        }
        maybe_crash(points::WMGR_BEFORE_ROTATE);
        let closed = self.files.active_fid();
        match self.files.rotate_file(&mut self.engine, self.serial, rid) {
            Ok(IoRes::Success) => {
                maybe_crash(points::WMGR_AFTER_FHDR_SUBMIT);
                self.metrics.increment_rotations();
                self.metrics.increment_file_headers();
                log_event_with_fields(
                    Event::FileRotate,
                    &[
                        ("closed_fid", &closed.to_string()),
                        ("fid", &self.files.active_fid().to_string()),
                        ("lid", &self.files.active_lid().to_string()),
                        ("rid", &rid.to_string()),
                    ],
                );
                Ok(IoRes::Success)
            }
            Ok(other) => Ok(other),
            Err(e) => Err(self.latch(e)),
        }
    }

    // ---- completion path ----

    fn apply_completion(
        &mut self,
        completion: AioCompletion,
        target: PageState,
        tokens: &mut dyn TokenRegistry,
        done: &mut Vec<TokenId>,
    ) -> JournalResult<()> {
        let AioCompletion {
            handle,
            fid,
            offset,
            len,
            buf,
            result,
        } = completion;
        self.files.on_write_complete(fid, handle);

        if let Err(source) = result {
            self.metrics.increment_failures();
            let mut failed_tokens = Vec::new();
            if let RequestHandle::Page(index) = handle {
                for entry in self.pages.fail(index, buf) {
                    if let Some(token) = tokens.token_mut(entry.token) {
                        token.wstate = WriteState::Failed;
                    }
                    if !failed_tokens.contains(&entry.token) {
                        failed_tokens.push(entry.token);
                    }
                }
            }
            log_event_with_fields(
                Event::AioFailure,
                &[
                    ("fid", &fid.to_string()),
                    ("offs", &offset.to_string()),
                    ("len", &len.to_string()),
                    ("error", &source.to_string()),
                ],
            );
            if !failed_tokens.is_empty() {
                self.callback.write_failed(&failed_tokens);
            }
            self.failed = true;
            return Err(JournalError::io("journal write failed", source)
                .with_details(format!("fid: {}, offset: {}, len: {}", fid, offset, len)));
        }

        let index = match handle {
            RequestHandle::Page(index) => index,
            RequestHandle::FileHeader(_) => return Ok(()),
        };
        if Logger::enabled(Severity::Trace) {
            log_event_with_fields(
                Event::AioComplete,
                &[("pg", &index.to_string()), ("fid", &fid.to_string())],
            );
        }

        for entry in self.pages.complete(index, buf, target) {
            if !entry.record_end {
                continue;
            }
            match entry.op {
                OpType::Enqueue => {
                    if !entry.xid.is_empty() {
                        self.txn_map.set_aio_complete(&entry.xid, entry.rid);
                    }
                    self.enq_map.confirm(entry.rid);
                }
                OpType::Dequeue => {
                    if !entry.xid.is_empty() {
                        self.txn_map.set_aio_complete(&entry.xid, entry.rid);
                    }
                }
                OpType::Commit | OpType::Abort => {
                    if self.txns.confirm(&entry.xid) {
                        log_event_with_fields(
                            Event::TxnSynced,
                            &[
                                ("xid", &String::from_utf8_lossy(&entry.xid)),
                                ("outcome", entry.op.as_str()),
                            ],
                        );
                    }
                }
            }
            for release in &entry.release_fids {
                self.files.decr_enq(*release);
            }
            if let Some(token) = tokens.token_mut(entry.token) {
                if token.wstate == entry.op.cached_state()
                    || token.wstate == entry.op.submitted_state()
                {
                    token.wstate = entry.op.complete_state();
                    done.push(entry.token);
                }
            }
        }
        Ok(())
    }

    /// Moves tokens whose last page went out since their call returned
    /// from *Cached* to *Submitted*.
    fn reconcile_submitted(&self, tokens: &mut dyn TokenRegistry) {
        for entry in self.pages.submitted_entries().filter(|e| e.record_end) {
            if let Some(token) = tokens.token_mut(entry.token) {
                if token.wstate == entry.op.cached_state() {
                    token.wstate = entry.op.submitted_state();
                }
            }
        }
    }

    fn resolve_dequeue(&self, dequeued_rid: u64, xid: &[u8]) -> DequeueTarget {
        if let Some(entry) = self.enq_map.get(dequeued_rid) {
            return if entry.locked {
                DequeueTarget::Locked
            } else if !entry.confirmed {
                DequeueTarget::Wait
            } else {
                DequeueTarget::Ready(entry.fid)
            };
        }
        match self.txn_map.find_enqueue(dequeued_rid) {
            Some((owner, fid)) if owner == xid => DequeueTarget::Ready(fid),
            Some(_) => DequeueTarget::Wait,
            None => DequeueTarget::Unknown,
        }
    }

    /// Retries deferred dequeues in arrival order.
    ///
    /// Stops at the first retry that leaves a record partly written; that
    /// record is resumed by the next retry pass.
    fn retry_deferred(&mut self, tokens: &mut dyn TokenRegistry) -> JournalResult<()> {
        if let Some(id) = self.deferred_active.take() {
            let resumable = self.pending.as_ref().map_or(false, |p| p.token == id);
            if resumable {
                let token = match tokens.token_mut(id) {
                    Some(token) => token,
                    None => return Ok(()),
                };
                match self.write_pending(token) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(_) => {
                        if token.wstate == WriteState::DequeueDeferred {
                            self.deferred.push_front(id);
                        }
                        return Ok(());
                    }
                }
                if self.pending.is_some() {
                    self.deferred_active = Some(id);
                    return Ok(());
                }
            }
        }

        let mut rounds = self.deferred.len();
        while rounds > 0 && self.pending.is_none() {
            rounds -= 1;
            let id = match self.deferred.pop_front() {
                Some(id) => id,
                None => break,
            };
            let token = match tokens.token_mut(id) {
                Some(token) if token.wstate == WriteState::DequeueDeferred => token,
                _ => continue,
            };

            let xid = token.xid.clone();
            let dequeued_rid = token.dequeue_rid;
            match self.resolve_dequeue(dequeued_rid, &xid) {
                DequeueTarget::Wait => self.deferred.push_back(id),
                DequeueTarget::Locked | DequeueTarget::Unknown => {
                    token.wstate = WriteState::Failed;
                    self.callback.write_failed(&[id]);
                    log_event_with_fields(
                        Event::DequeueDropped,
                        &[
                            ("token", &id.to_string()),
                            ("dequeued_rid", &dequeued_rid.to_string()),
                        ],
                    );
                }
                DequeueTarget::Ready(fid) => {
                    let prior = TokenSnapshot::of(token);
                    let rid = token.rid;
                    let record = DequeueRecord::new(self.serial, rid, dequeued_rid, &xid).encode();
                    match self.start_record(
                        token,
                        OpType::Dequeue,
                        rid,
                        &xid,
                        dequeued_rid,
                        fid,
                        record,
                        prior,
                    ) {
                        Ok(_) => {
                            if self.pending.is_some() {
                                self.deferred_active = Some(id);
                            }
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            // journal full: stays deferred until space is released
                            Logger::warn(
                                "DEQUEUE_RETRY_FAILED",
                                &[("token", &id.to_string()), ("error", &e.to_string())],
                            );
                            self.deferred.push_front(id);
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for WriteManager {
    fn drop(&mut self) {
        if self.engine.outstanding() > 0 {
            Logger::warn(
                "WMGR_DROPPED_WITH_OUTSTANDING_WRITES",
                &[("outstanding", &self.engine.outstanding().to_string())],
            );
        }
    }
}
