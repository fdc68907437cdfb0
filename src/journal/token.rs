//! Caller-owned data tokens
//!
//! A token follows one message through the journal: its enqueue, then its
//! dequeue. The write manager never owns tokens. It keeps `TokenId`s in its
//! page lists, busy slots and deferred queue, and looks tokens up through a
//! [`TokenRegistry`] supplied by the caller when draining completions.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Identifier of a caller token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok{}", self.0)
    }
}

/// Kinds of write operation, each with its own busy slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpType {
    Enqueue,
    Dequeue,
    Abort,
    Commit,
}

impl OpType {
    pub const ALL: [OpType; 4] = [OpType::Enqueue, OpType::Dequeue, OpType::Abort, OpType::Commit];

    /// Slot index for per-operation state arrays
    pub fn index(self) -> usize {
        match self {
            OpType::Enqueue => 0,
            OpType::Dequeue => 1,
            OpType::Abort => 2,
            OpType::Commit => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpType::Enqueue => "enqueue",
            OpType::Dequeue => "dequeue",
            OpType::Abort => "abort",
            OpType::Commit => "commit",
        }
    }

    /// State of a token whose record is partly in pages
    pub fn part_state(self) -> WriteState {
        match self {
            OpType::Enqueue => WriteState::EnqueuePart,
            OpType::Dequeue => WriteState::DequeuePart,
            OpType::Abort => WriteState::AbortPart,
            OpType::Commit => WriteState::CommitPart,
        }
    }

    /// State of a token whose record is fully cached
    pub fn cached_state(self) -> WriteState {
        match self {
            OpType::Enqueue => WriteState::EnqueueCached,
            OpType::Dequeue => WriteState::DequeueCached,
            OpType::Abort => WriteState::AbortCached,
            OpType::Commit => WriteState::CommitCached,
        }
    }

    /// State of a token whose last page has been submitted
    pub fn submitted_state(self) -> WriteState {
        match self {
            OpType::Enqueue => WriteState::EnqueueSubmitted,
            OpType::Dequeue => WriteState::DequeueSubmitted,
            OpType::Abort => WriteState::AbortSubmitted,
            OpType::Commit => WriteState::CommitSubmitted,
        }
    }

    /// State of a token whose record is durable
    pub fn complete_state(self) -> WriteState {
        match self {
            OpType::Enqueue => WriteState::Enqueued,
            OpType::Dequeue => WriteState::Dequeued,
            OpType::Abort => WriteState::Aborted,
            OpType::Commit => WriteState::Committed,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Write progress of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteState {
    None,
    EnqueuePart,
    EnqueueCached,
    EnqueueSubmitted,
    Enqueued,
    DequeueDeferred,
    DequeuePart,
    DequeueCached,
    DequeueSubmitted,
    Dequeued,
    AbortPart,
    AbortCached,
    AbortSubmitted,
    Aborted,
    CommitPart,
    CommitCached,
    CommitSubmitted,
    Committed,
    Failed,
}

impl WriteState {
    /// Record fully cached but not yet known to be submitted
    pub fn is_cached(self) -> bool {
        matches!(
            self,
            WriteState::EnqueueCached
                | WriteState::DequeueCached
                | WriteState::AbortCached
                | WriteState::CommitCached
        )
    }

    /// Part of the record is in pages, the rest still to be written
    pub fn is_part(self) -> bool {
        matches!(
            self,
            WriteState::EnqueuePart
                | WriteState::DequeuePart
                | WriteState::AbortPart
                | WriteState::CommitPart
        )
    }

    /// Record submitted, completion not yet reaped
    pub fn is_submitted(self) -> bool {
        matches!(
            self,
            WriteState::EnqueueSubmitted
                | WriteState::DequeueSubmitted
                | WriteState::AbortSubmitted
                | WriteState::CommitSubmitted
        )
    }

    /// Enqueue written or on its way; the message may now be dequeued
    pub fn is_enqueue_state(self) -> bool {
        matches!(
            self,
            WriteState::EnqueueCached | WriteState::EnqueueSubmitted | WriteState::Enqueued
        )
    }
}

/// Descriptor of one in-flight write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataToken {
    id: TokenId,
    pub(crate) rid: u64,
    pub(crate) dequeue_rid: u64,
    pub(crate) wstate: WriteState,
    pub(crate) dsize: u64,
    pub(crate) dblks_written: usize,
    pub(crate) pg_cnt: u32,
    pub(crate) fid: u16,
    pub(crate) xid: Vec<u8>,
    external_rid: bool,
}

impl DataToken {
    /// New token; the write manager assigns record ids
    pub fn new(id: TokenId) -> Self {
        Self {
            id,
            rid: 0,
            dequeue_rid: 0,
            wstate: WriteState::None,
            dsize: 0,
            dblks_written: 0,
            pg_cnt: 0,
            fid: 0,
            xid: Vec::new(),
            external_rid: false,
        }
    }

    /// Token carrying a caller-chosen record id (e.g. replayed after recovery)
    pub fn with_rid(id: TokenId, rid: u64) -> Self {
        Self {
            rid,
            external_rid: true,
            ..Self::new(id)
        }
    }

    /// Token that dequeues a record it did not enqueue itself
    pub fn for_dequeue(id: TokenId, rid: u64, dequeue_rid: u64) -> Self {
        Self {
            dequeue_rid,
            ..Self::with_rid(id, rid)
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn rid(&self) -> u64 {
        self.rid
    }

    pub fn dequeue_rid(&self) -> u64 {
        self.dequeue_rid
    }

    pub fn wstate(&self) -> WriteState {
        self.wstate
    }

    pub fn dsize(&self) -> u64 {
        self.dsize
    }

    pub fn dblks_written(&self) -> usize {
        self.dblks_written
    }

    /// Number of pages the current record touched
    pub fn pg_cnt(&self) -> u32 {
        self.pg_cnt
    }

    /// Journal file holding the record header
    pub fn fid(&self) -> u16 {
        self.fid
    }

    pub fn xid(&self) -> &[u8] {
        &self.xid
    }

    pub fn external_rid(&self) -> bool {
        self.external_rid
    }

    pub(crate) fn begin_record(&mut self, state: WriteState) {
        self.wstate = state;
        self.dblks_written = 0;
        self.pg_cnt = 0;
    }
}

/// Caller-side lookup of tokens by id.
pub trait TokenRegistry {
    fn token_mut(&mut self, id: TokenId) -> Option<&mut DataToken>;
}

/// HashMap-backed token registry
#[derive(Debug, Default)]
pub struct TokenMap {
    tokens: HashMap<TokenId, DataToken>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: DataToken) {
        self.tokens.insert(token.id(), token);
    }

    pub fn get(&self, id: TokenId) -> Option<&DataToken> {
        self.tokens.get(&id)
    }

    pub fn get_mut(&mut self, id: TokenId) -> Option<&mut DataToken> {
        self.tokens.get_mut(&id)
    }

    pub fn remove(&mut self, id: TokenId) -> Option<DataToken> {
        self.tokens.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenRegistry for TokenMap {
    fn token_mut(&mut self, id: TokenId) -> Option<&mut DataToken> {
        self.tokens.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_is_writable() {
        let token = DataToken::new(TokenId(1));
        assert_eq!(token.wstate(), WriteState::None);
        assert!(!token.external_rid());
    }

    #[test]
    fn test_dequeue_token_carries_both_rids() {
        let token = DataToken::for_dequeue(TokenId(2), 90, 17);
        assert!(token.external_rid());
        assert_eq!(token.rid(), 90);
        assert_eq!(token.dequeue_rid(), 17);
    }

    #[test]
    fn test_state_families() {
        for op in OpType::ALL {
            assert!(op.part_state().is_part());
            assert!(op.cached_state().is_cached());
            assert!(op.submitted_state().is_submitted());
            assert!(!op.complete_state().is_submitted());
        }
        assert!(WriteState::EnqueueSubmitted.is_enqueue_state());
        assert!(!WriteState::DequeueCached.is_enqueue_state());
    }

    #[test]
    fn test_token_map_registry() {
        let mut map = TokenMap::new();
        map.insert(DataToken::new(TokenId(5)));
        assert!(map.token_mut(TokenId(5)).is_some());
        assert!(map.token_mut(TokenId(6)).is_none());
        assert_eq!(map.len(), 1);
    }
}
