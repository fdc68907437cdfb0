//! Write page cache
//!
//! A fixed ring of equally sized pages. Encoded record bytes accumulate in
//! the single page in `Filling` state; a page is submitted as one write when
//! it is full (or explicitly flushed) and only becomes reusable once that
//! write's completion has been reaped.
//!
//! Page lifecycle:
//!
//! ```text
//! Unused -> Filling -> WriteSubmitted -> WriteComplete -> Unused
//!                                    \-> Failed (terminal)
//! ```

use serde::Serialize;

use super::aio::RequestHandle;
use super::record::{write_filler, DBLK_SIZE, SBLK_SIZE};
use super::token::{OpType, TokenId};

/// State of one page slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageState {
    Unused,
    Filling,
    WriteSubmitted,
    WriteComplete,
    Failed,
}

impl PageState {
    /// One-letter code used in status lines
    pub fn code(self) -> char {
        match self {
            PageState::Unused => '-',
            PageState::Filling => 'F',
            PageState::WriteSubmitted => 'S',
            PageState::WriteComplete => 'C',
            PageState::Failed => 'X',
        }
    }
}

/// How much of a write the current page accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFit {
    /// All bytes accepted, space remains
    Fits,
    /// All bytes accepted, page now full
    FilledExactly,
    /// Page filled; this many bytes did not fit
    Overflow(usize),
}

/// A record fragment batched in a page.
///
/// Completion bookkeeping runs only for the entry that holds the end of a
/// record, so a multi-page record is acted on once its last page lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    pub token: TokenId,
    pub op: OpType,
    pub rid: u64,
    pub record_end: bool,
    pub xid: Vec<u8>,
    /// Files whose enqueue count drops once this record is durable
    pub release_fids: Vec<u16>,
}

#[derive(Debug)]
struct Page {
    state: PageState,
    buf: Option<Vec<u8>>,
    len: usize,
    capacity: usize,
    fid: u16,
    file_offset: u64,
    entries: Vec<PageEntry>,
    request: Option<RequestHandle>,
}

/// A page taken out of the cache for submission
#[derive(Debug)]
pub struct SubmitPage {
    pub index: usize,
    pub fid: u16,
    pub file_offset: u64,
    pub buf: Vec<u8>,
    pub len: usize,
}

/// Ring of write pages
#[derive(Debug)]
pub struct PageCache {
    pages: Vec<Page>,
    index: usize,
    page_size: usize,
}

impl PageCache {
    /// Allocates `num_pages` pages of `page_sblks` sblks each.
    pub fn new(page_sblks: usize, num_pages: usize) -> Self {
        let page_size = page_sblks * SBLK_SIZE;
        let pages = (0..num_pages)
            .map(|_| Page {
                state: PageState::Unused,
                buf: Some(vec![0u8; page_size]),
                len: 0,
                capacity: page_size,
                fid: 0,
                file_offset: 0,
                entries: Vec::new(),
                request: None,
            })
            .collect();
        Self {
            pages,
            index: 0,
            page_size,
        }
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Ring index of the page receiving data
    pub fn index(&self) -> usize {
        self.index
    }

    /// True when the page about to receive data is still tied to an
    /// earlier write (or failed). This is the backpressure signal.
    pub fn current_page_blocked(&self) -> bool {
        !matches!(
            self.pages[self.index].state,
            PageState::Unused | PageState::Filling
        )
    }

    pub fn current_state(&self) -> PageState {
        self.pages[self.index].state
    }

    /// Marks the current `Unused` page as filling toward `fid` at
    /// `file_offset`, accepting at most `capacity` bytes.
    pub fn begin_fill(&mut self, fid: u16, file_offset: u64, capacity: usize) {
        let page = &mut self.pages[self.index];
        debug_assert_eq!(page.state, PageState::Unused);
        debug_assert!(capacity % SBLK_SIZE == 0 && capacity > 0);
        page.state = PageState::Filling;
        page.len = 0;
        page.capacity = capacity.min(self.page_size);
        page.fid = fid;
        page.file_offset = file_offset;
        page.entries.clear();
        page.request = None;
    }

    /// Appends as much of `bytes` as fits in the filling page.
    pub fn write(&mut self, bytes: &[u8]) -> WriteFit {
        let page = &mut self.pages[self.index];
        debug_assert_eq!(page.state, PageState::Filling);
        let free = page.capacity - page.len;
        let n = bytes.len().min(free);
        if let Some(buf) = page.buf.as_mut() {
            buf[page.len..page.len + n].copy_from_slice(&bytes[..n]);
        }
        page.len += n;

        if n < bytes.len() {
            WriteFit::Overflow(bytes.len() - n)
        } else if page.len == page.capacity {
            WriteFit::FilledExactly
        } else {
            WriteFit::Fits
        }
    }

    /// Records a token fragment in the filling page.
    pub fn add_entry(&mut self, entry: PageEntry) {
        self.pages[self.index].entries.push(entry);
    }

    /// Number of token fragments batched in the filling page
    pub fn entry_count(&self) -> usize {
        self.pages[self.index].entries.len()
    }

    /// Bytes cached in the filling page and not yet submitted
    pub fn unflushed_amount(&self) -> usize {
        let page = &self.pages[self.index];
        match page.state {
            PageState::Filling => page.len,
            _ => 0,
        }
    }

    /// Free bytes left in the filling page
    pub fn free_space(&self) -> usize {
        let page = &self.pages[self.index];
        match page.state {
            PageState::Filling => page.capacity - page.len,
            _ => 0,
        }
    }

    /// File offset the next cached byte will land at, if a page is filling
    pub fn fill_position(&self) -> Option<(u16, u64)> {
        let page = &self.pages[self.index];
        match page.state {
            PageState::Filling => Some((page.fid, page.file_offset + page.len as u64)),
            _ => None,
        }
    }

    pub fn is_full(&self) -> bool {
        let page = &self.pages[self.index];
        page.state == PageState::Filling && page.len == page.capacity
    }

    /// Pads the filling page with filler dblks up to `target` bytes.
    fn pad_to(&mut self, target: usize) {
        let page = &mut self.pages[self.index];
        let target = target.min(page.capacity);
        if target <= page.len {
            return;
        }
        debug_assert!(page.len % DBLK_SIZE == 0);
        if let Some(buf) = page.buf.as_mut() {
            write_filler(&mut buf[page.len..target]);
        }
        page.len = target;
    }

    /// Rounds the cached data up to the next sblk boundary with filler.
    pub fn round_up_to_sblk(&mut self) {
        let len = self.pages[self.index].len;
        let target = (len + SBLK_SIZE - 1) / SBLK_SIZE * SBLK_SIZE;
        self.pad_to(target);
    }

    /// Fills the rest of the page with filler.
    pub fn pad_to_capacity(&mut self) {
        let capacity = self.pages[self.index].capacity;
        self.pad_to(capacity);
    }

    /// Takes the filling page's buffer for submission and marks it
    /// `WriteSubmitted`. Returns `None` if nothing is cached.
    pub fn take_for_submit(&mut self) -> Option<SubmitPage> {
        let index = self.index;
        let page = &mut self.pages[index];
        if page.state != PageState::Filling || page.len == 0 {
            return None;
        }
        let buf = page.buf.take()?;
        page.state = PageState::WriteSubmitted;
        page.request = Some(RequestHandle::Page(index));
        Some(SubmitPage {
            index,
            fid: page.fid,
            file_offset: page.file_offset,
            buf,
            len: page.len,
        })
    }

    /// Advances the ring to the next page, recycling it if its previous
    /// write is known to be complete.
    pub fn rotate_page(&mut self) {
        self.index = (self.index + 1) % self.pages.len();
        let page = &mut self.pages[self.index];
        if page.state == PageState::WriteComplete {
            page.state = PageState::Unused;
        }
        if page.state == PageState::Unused {
            page.len = 0;
            page.entries.clear();
            page.request = None;
        }
    }

    /// Applies a successful completion to page `index`.
    ///
    /// The page moves to `WriteComplete`, then to `target` (normally
    /// `Unused`). Returns the token fragments it carried.
    pub fn complete(&mut self, index: usize, buf: Vec<u8>, target: PageState) -> Vec<PageEntry> {
        let page = &mut self.pages[index];
        debug_assert_eq!(page.state, PageState::WriteSubmitted);
        page.buf = Some(buf);
        page.request = None;
        page.state = PageState::WriteComplete;
        let entries = std::mem::take(&mut page.entries);
        if target == PageState::Unused {
            page.state = PageState::Unused;
            page.len = 0;
        }
        entries
    }

    /// Applies a failed completion to page `index`; the page becomes
    /// unusable. Returns the token fragments it carried.
    pub fn fail(&mut self, index: usize, buf: Vec<u8>) -> Vec<PageEntry> {
        let page = &mut self.pages[index];
        page.buf = Some(buf);
        page.request = None;
        page.state = PageState::Failed;
        std::mem::take(&mut page.entries)
    }

    /// Moves every `WriteComplete` page back to `Unused`.
    pub fn recycle_completed(&mut self) {
        for page in &mut self.pages {
            if page.state == PageState::WriteComplete {
                page.state = PageState::Unused;
                page.len = 0;
                page.entries.clear();
            }
        }
    }

    /// Number of pages in `state`
    pub fn count_in_state(&self, state: PageState) -> usize {
        self.pages.iter().filter(|p| p.state == state).count()
    }

    /// States of all pages in ring order
    pub fn states(&self) -> Vec<PageState> {
        self.pages.iter().map(|p| p.state).collect()
    }

    /// Token fragments of pages whose write is in flight
    pub fn submitted_entries(&self) -> impl Iterator<Item = &PageEntry> {
        self.pages
            .iter()
            .filter(|p| p.state == PageState::WriteSubmitted)
            .flat_map(|p| p.entries.iter())
    }

    /// Token fragments of the filling page
    pub fn filling_entries(&self) -> &[PageEntry] {
        &self.pages[self.index].entries
    }

    /// Outstanding request handle of page `index`, if any
    pub fn request(&self, index: usize) -> Option<RequestHandle> {
        self.pages[index].request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(token: u64) -> PageEntry {
        PageEntry {
            token: TokenId(token),
            op: OpType::Enqueue,
            rid: token,
            record_end: true,
            xid: Vec::new(),
            release_fids: Vec::new(),
        }
    }

    #[test]
    fn test_write_fits_then_overflows() {
        let mut cache = PageCache::new(1, 2);
        cache.begin_fill(0, 4096, SBLK_SIZE);
        assert_eq!(cache.write(&[1u8; 3 * DBLK_SIZE]), WriteFit::Fits);
        assert_eq!(cache.unflushed_amount(), 3 * DBLK_SIZE);

        let rest = SBLK_SIZE - 3 * DBLK_SIZE;
        assert_eq!(cache.write(&vec![2u8; rest + DBLK_SIZE]), WriteFit::Overflow(DBLK_SIZE));
        assert!(cache.is_full());
    }

    #[test]
    fn test_write_fills_exactly() {
        let mut cache = PageCache::new(1, 2);
        cache.begin_fill(0, 4096, SBLK_SIZE);
        assert_eq!(cache.write(&vec![1u8; SBLK_SIZE]), WriteFit::FilledExactly);
        assert_eq!(cache.free_space(), 0);
    }

    #[test]
    fn test_submitted_page_blocks_ring_slot() {
        let mut cache = PageCache::new(1, 2);
        cache.begin_fill(0, 4096, SBLK_SIZE);
        cache.write(&vec![1u8; SBLK_SIZE]);
        cache.add_entry(entry(1));
        let submit = cache.take_for_submit().unwrap();
        assert_eq!(submit.len, SBLK_SIZE);
        assert_eq!(cache.request(0), Some(RequestHandle::Page(0)));

        cache.rotate_page();
        assert!(!cache.current_page_blocked());
        cache.begin_fill(0, 8192, SBLK_SIZE);
        cache.write(&vec![1u8; SBLK_SIZE]);
        cache.take_for_submit().unwrap();

        // back at page 0, still in flight
        cache.rotate_page();
        assert!(cache.current_page_blocked());
        assert_eq!(cache.count_in_state(PageState::WriteSubmitted), 2);

        let entries = cache.complete(0, submit.buf, PageState::Unused);
        assert_eq!(entries, vec![entry(1)]);
        assert!(!cache.current_page_blocked());
    }

    #[test]
    fn test_complete_can_leave_page_visible() {
        let mut cache = PageCache::new(1, 2);
        cache.begin_fill(0, 4096, SBLK_SIZE);
        cache.write(&[1u8; DBLK_SIZE]);
        let submit = cache.take_for_submit().unwrap();
        cache.complete(submit.index, submit.buf, PageState::WriteComplete);
        assert_eq!(cache.current_state(), PageState::WriteComplete);
        assert!(cache.current_page_blocked());

        cache.recycle_completed();
        assert_eq!(cache.current_state(), PageState::Unused);
    }

    #[test]
    fn test_round_up_to_sblk_uses_filler() {
        let mut cache = PageCache::new(2, 2);
        cache.begin_fill(0, 4096, 2 * SBLK_SIZE);
        cache.write(&[7u8; DBLK_SIZE]);
        cache.round_up_to_sblk();
        assert_eq!(cache.unflushed_amount(), SBLK_SIZE);
        let submit = cache.take_for_submit().unwrap();
        assert_eq!(&submit.buf[DBLK_SIZE..DBLK_SIZE + 4], b"QLSx");
    }

    #[test]
    fn test_capacity_limits_page() {
        let mut cache = PageCache::new(4, 2);
        cache.begin_fill(0, 4096, SBLK_SIZE);
        assert_eq!(cache.free_space(), SBLK_SIZE);
        cache.pad_to_capacity();
        assert!(cache.is_full());
    }

    #[test]
    fn test_failed_page_stays_blocked() {
        let mut cache = PageCache::new(1, 1);
        cache.begin_fill(0, 4096, SBLK_SIZE);
        cache.write(&[1u8; DBLK_SIZE]);
        let submit = cache.take_for_submit().unwrap();
        cache.fail(submit.index, submit.buf);
        cache.rotate_page();
        assert!(cache.current_page_blocked());
        assert_eq!(cache.current_state(), PageState::Failed);
    }
}
