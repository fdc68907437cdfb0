//! Pending commit/abort tracking
//!
//! An xid is pending from the moment its commit or abort record is cached
//! until the write carrying it completes. Several outcomes for one xid may
//! be pending at once; the xid is synced when the last of them lands.

use std::collections::HashMap;

/// Xids with outstanding commit/abort writes
#[derive(Debug, Default)]
pub struct TxnTracker {
    pending: HashMap<Vec<u8>, u32>,
}

impl TxnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a commit/abort write for `xid`.
    pub fn mark_pending(&mut self, xid: &[u8]) {
        *self.pending.entry(xid.to_vec()).or_insert(0) += 1;
    }

    /// Records completion of one commit/abort write for `xid`.
    ///
    /// Returns true when no write for `xid` remains pending.
    pub fn confirm(&mut self, xid: &[u8]) -> bool {
        match self.pending.get_mut(xid) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.pending.remove(xid);
                true
            }
            None => true,
        }
    }

    /// True unless a commit/abort write for `xid` is outstanding.
    /// An xid never marked pending has nothing to wait for.
    pub fn is_synced(&self, xid: &[u8]) -> bool {
        !self.pending.contains_key(xid)
    }

    /// Number of xids with outstanding writes
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_xid_is_synced() {
        let tracker = TxnTracker::new();
        assert!(tracker.is_synced(b"never-seen"));
    }

    #[test]
    fn test_pending_until_confirmed() {
        let mut tracker = TxnTracker::new();
        tracker.mark_pending(b"tx1");
        assert!(!tracker.is_synced(b"tx1"));
        assert!(tracker.confirm(b"tx1"));
        assert!(tracker.is_synced(b"tx1"));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_multiple_pending_references() {
        let mut tracker = TxnTracker::new();
        tracker.mark_pending(b"tx1");
        tracker.mark_pending(b"tx1");
        assert!(!tracker.confirm(b"tx1"));
        assert!(!tracker.is_synced(b"tx1"));
        assert!(tracker.confirm(b"tx1"));
        assert!(tracker.is_synced(b"tx1"));
    }
}
