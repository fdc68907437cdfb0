//! Record location indexes
//!
//! `EnqueueMap` resolves a record id to the journal file holding its enqueue
//! and tracks whether that enqueue is durable. `TxnMap` holds the enqueues
//! and dequeues of open transactions until commit or abort resolves them.

use std::collections::HashMap;

/// Location and status of a visible enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueEntry {
    pub fid: u16,
    /// Enqueue write has completed
    pub confirmed: bool,
    /// A transactional dequeue of this record is pending
    pub locked: bool,
}

/// Index of enqueued, not yet dequeued records
#[derive(Debug, Default)]
pub struct EnqueueMap {
    entries: HashMap<u64, EnqueueEntry>,
}

impl EnqueueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rid`. Returns false if it is already present.
    pub fn insert(&mut self, rid: u64, fid: u16, confirmed: bool) -> bool {
        if self.entries.contains_key(&rid) {
            return false;
        }
        self.entries.insert(
            rid,
            EnqueueEntry {
                fid,
                confirmed,
                locked: false,
            },
        );
        true
    }

    pub fn get(&self, rid: u64) -> Option<EnqueueEntry> {
        self.entries.get(&rid).copied()
    }

    pub fn contains(&self, rid: u64) -> bool {
        self.entries.contains_key(&rid)
    }

    /// Marks the enqueue of `rid` durable.
    pub fn confirm(&mut self, rid: u64) {
        if let Some(entry) = self.entries.get_mut(&rid) {
            entry.confirmed = true;
        }
    }

    pub fn set_locked(&mut self, rid: u64, locked: bool) {
        if let Some(entry) = self.entries.get_mut(&rid) {
            entry.locked = locked;
        }
    }

    /// Removes `rid`, returning where its enqueue lives.
    pub fn remove(&mut self, rid: u64) -> Option<EnqueueEntry> {
        self.entries.remove(&rid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One enqueue or dequeue inside an open transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnOp {
    pub rid: u64,
    /// For dequeues, the record being dequeued
    pub dequeued_rid: u64,
    /// File holding the enqueue (for dequeues, the dequeued enqueue)
    pub fid: u16,
    pub is_enqueue: bool,
    pub aio_complete: bool,
}

/// Index of open transactions by xid
#[derive(Debug, Default)]
pub struct TxnMap {
    txns: HashMap<Vec<u8>, Vec<TxnOp>>,
}

impl TxnMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, xid: &[u8], op: TxnOp) {
        self.txns.entry(xid.to_vec()).or_default().push(op);
    }

    /// Removes and returns every operation recorded for `xid`.
    pub fn take(&mut self, xid: &[u8]) -> Vec<TxnOp> {
        self.txns.remove(xid).unwrap_or_default()
    }

    pub fn contains_xid(&self, xid: &[u8]) -> bool {
        self.txns.contains_key(xid)
    }

    /// Marks the write of `rid` within `xid` complete.
    pub fn set_aio_complete(&mut self, xid: &[u8], rid: u64) {
        if let Some(ops) = self.txns.get_mut(xid) {
            for op in ops.iter_mut().filter(|op| op.rid == rid) {
                op.aio_complete = true;
            }
        }
    }

    /// True when every write recorded for `xid` has completed.
    /// Unknown xids are synced.
    pub fn is_txn_synced(&self, xid: &[u8]) -> bool {
        self.txns
            .get(xid)
            .map_or(true, |ops| ops.iter().all(|op| op.aio_complete))
    }

    /// Finds an open transactional enqueue of `rid`, returning its xid and file.
    pub fn find_enqueue(&self, rid: u64) -> Option<(&[u8], u16)> {
        self.txns.iter().find_map(|(xid, ops)| {
            ops.iter()
                .find(|op| op.is_enqueue && op.rid == rid)
                .map(|op| (xid.as_slice(), op.fid))
        })
    }

    pub fn len(&self) -> usize {
        self.txns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }
}
