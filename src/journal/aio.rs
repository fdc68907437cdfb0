//! Asynchronous write engine
//!
//! Submission hands an owned buffer to a dedicated I/O worker thread and
//! returns immediately. The worker performs the positional write, syncs the
//! file and posts a completion carrying the buffer back. Completions are
//! only observed when the orchestrator explicitly reaps them; submission
//! never blocks on disk I/O.
//!
//! The worker executes requests strictly in submission order, so a file
//! header submitted before a data page of the same file lands first.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::errors::{JournalError, JournalResult};
use super::storage::JournalStorage;

/// Slot-indexed handle of an outstanding write.
///
/// Each page slot and each file-header slot has at most one write in flight,
/// so the slot index alone identifies the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestHandle {
    Page(usize),
    FileHeader(u16),
}

/// One write handed to the worker
#[derive(Debug)]
pub struct AioRequest {
    pub handle: RequestHandle,
    pub fid: u16,
    pub offset: u64,
    /// Owned buffer; only the first `len` bytes are written
    pub buf: Vec<u8>,
    pub len: usize,
}

/// A finished write, successful or not
#[derive(Debug)]
pub struct AioCompletion {
    pub handle: RequestHandle,
    pub fid: u16,
    pub offset: u64,
    pub len: usize,
    /// The submitted buffer, handed back for reuse
    pub buf: Vec<u8>,
    pub result: io::Result<()>,
}

/// Submission/completion engine around a single I/O worker.
pub struct AioEngine {
    submit_tx: Option<Sender<AioRequest>>,
    completion_rx: Receiver<AioCompletion>,
    worker: Option<JoinHandle<()>>,
    outstanding: usize,
    outstanding_pages: usize,
}

impl AioEngine {
    /// Starts the I/O worker over `storage`.
    pub fn start<S: JournalStorage>(storage: S) -> JournalResult<Self> {
        let (submit_tx, submit_rx) = mpsc::channel::<AioRequest>();
        let (completion_tx, completion_rx) = mpsc::channel::<AioCompletion>();

        let worker = thread::Builder::new()
            .name("jrnl-aio".to_string())
            .spawn(move || run_worker(storage, submit_rx, completion_tx))
            .map_err(|e| JournalError::io("Failed to start AIO worker", e))?;

        Ok(Self {
            submit_tx: Some(submit_tx),
            completion_rx,
            worker: Some(worker),
            outstanding: 0,
            outstanding_pages: 0,
        })
    }

    /// Queues a write. Returns as soon as the request is handed over.
    pub fn submit(&mut self, request: AioRequest) -> JournalResult<RequestHandle> {
        let handle = request.handle;
        let tx = self
            .submit_tx
            .as_ref()
            .ok_or_else(|| JournalError::io_failed("AIO engine is shut down"))?;
        tx.send(request)
            .map_err(|_| JournalError::io_failed("AIO worker terminated"))?;
        self.outstanding += 1;
        if matches!(handle, RequestHandle::Page(_)) {
            self.outstanding_pages += 1;
        }
        Ok(handle)
    }

    /// Collects finished writes.
    ///
    /// Everything already completed is returned; if fewer than `min_events`
    /// are available the call waits up to `timeout` for more. A zero timeout
    /// makes this a pure poll.
    pub fn reap(&mut self, min_events: usize, timeout: Duration) -> JournalResult<Vec<AioCompletion>> {
        let mut completions = Vec::new();
        if self.outstanding == 0 {
            return Ok(completions);
        }

        let min_events = min_events.min(self.outstanding);
        let deadline = Instant::now() + timeout;
        let mut disconnected = false;

        while let Ok(completion) = self.completion_rx.try_recv() {
            completions.push(completion);
        }
        while completions.len() < min_events {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.completion_rx.recv_timeout(deadline - now) {
                Ok(completion) => completions.push(completion),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        for completion in &completions {
            self.outstanding -= 1;
            if matches!(completion.handle, RequestHandle::Page(_)) {
                self.outstanding_pages -= 1;
            }
        }

        if disconnected && completions.is_empty() {
            return Err(JournalError::io_failed(format!(
                "AIO worker terminated with {} writes outstanding",
                self.outstanding
            )));
        }
        Ok(completions)
    }

    /// Writes submitted and not yet reaped
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Page writes submitted and not yet reaped
    pub fn outstanding_pages(&self) -> usize {
        self.outstanding_pages
    }
}

impl Drop for AioEngine {
    fn drop(&mut self) {
        // closing the submission channel ends the worker loop
        self.submit_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker<S: JournalStorage>(
    mut storage: S,
    requests: Receiver<AioRequest>,
    completions: Sender<AioCompletion>,
) {
    while let Ok(request) = requests.recv() {
        let result = storage
            .write_at(request.fid, request.offset, &request.buf[..request.len])
            .and_then(|_| storage.sync(request.fid));
        let completion = AioCompletion {
            handle: request.handle,
            fid: request.fid,
            offset: request.offset,
            len: request.len,
            buf: request.buf,
            result,
        };
        if completions.send(completion).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::storage::MemStorage;

    fn request(handle: RequestHandle, offset: u64, byte: u8) -> AioRequest {
        AioRequest {
            handle,
            fid: 0,
            offset,
            buf: vec![byte; 256],
            len: 128,
        }
    }

    #[test]
    fn test_submit_then_reap() {
        let storage = MemStorage::new(1, 1);
        let mut engine = AioEngine::start(storage.clone()).unwrap();

        engine.submit(request(RequestHandle::Page(0), 0, 7)).unwrap();
        assert_eq!(engine.outstanding(), 1);
        assert_eq!(engine.outstanding_pages(), 1);

        let done = engine.reap(1, Duration::from_secs(5)).unwrap();
        assert_eq!(done.len(), 1);
        assert!(done[0].result.is_ok());
        assert_eq!(done[0].buf.len(), 256);
        assert_eq!(engine.outstanding(), 0);
        assert_eq!(storage.file(0)[..128], [7u8; 128]);
        // only len bytes are written
        assert_eq!(storage.file(0)[128], 0);
    }

    #[test]
    fn test_reap_with_nothing_outstanding_returns_immediately() {
        let mut engine = AioEngine::start(MemStorage::new(1, 1)).unwrap();
        assert!(engine.reap(1, Duration::from_secs(60)).unwrap().is_empty());
    }

    #[test]
    fn test_held_write_is_not_reaped() {
        let storage = MemStorage::new(1, 1);
        let mut engine = AioEngine::start(storage.clone()).unwrap();
        storage.hold();

        engine.submit(request(RequestHandle::FileHeader(0), 0, 1)).unwrap();
        let done = engine.reap(1, Duration::from_millis(20)).unwrap();
        assert!(done.is_empty());
        assert_eq!(engine.outstanding(), 1);
        assert_eq!(engine.outstanding_pages(), 0);

        storage.release();
        let done = engine.reap(1, Duration::from_secs(5)).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].handle, RequestHandle::FileHeader(0));
    }

    #[test]
    fn test_failure_is_reported_in_completion() {
        let storage = MemStorage::new(1, 1);
        storage.fail_next_writes(1);
        let mut engine = AioEngine::start(storage).unwrap();

        engine.submit(request(RequestHandle::Page(1), 0, 1)).unwrap();
        let done = engine.reap(1, Duration::from_secs(5)).unwrap();
        assert!(done[0].result.is_err());
    }

    #[test]
    fn test_requests_complete_in_submission_order() {
        let storage = MemStorage::new(1, 1);
        let mut engine = AioEngine::start(storage).unwrap();
        engine.submit(request(RequestHandle::FileHeader(0), 0, 1)).unwrap();
        engine.submit(request(RequestHandle::Page(0), 128, 2)).unwrap();
        engine.submit(request(RequestHandle::Page(1), 256, 3)).unwrap();

        let mut handles = Vec::new();
        while handles.len() < 3 {
            for c in engine.reap(3, Duration::from_secs(5)).unwrap() {
                handles.push(c.handle);
            }
        }
        assert_eq!(
            handles,
            vec![
                RequestHandle::FileHeader(0),
                RequestHandle::Page(0),
                RequestHandle::Page(1)
            ]
        );
    }
}
