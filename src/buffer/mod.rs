//! Fixed-size buffer pool over the page file.
//!
//! Grounded directly on the original engine's `BufferPoolManager`: a frame
//! array, an extendible-hash page table, a free list, and an LRU replacer.
//! Free-list victims are preferred over LRU victims; dirty victims are
//! written back under the WAL invariant (the log must be flushed past the
//! victim's LSN before its bytes reach disk).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::disk::DiskManager;
use crate::hash::ExtendibleHashTable;
use crate::latch::Latch;
use crate::page::{Page, INVALID_PAGE_ID, PAGE_SIZE};
use crate::wal::LogManager;

/// LRU ordering over unpinned frame indices: victim is the front, the most
/// recently unpinned frame is the back.
struct LruReplacer {
    order: VecDeque<usize>,
}

impl LruReplacer {
    fn new() -> Self {
        LruReplacer {
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, frame: usize) {
        self.erase(frame);
        self.order.push_back(frame);
    }

    fn victim(&mut self) -> Option<usize> {
        self.order.pop_front()
    }

    fn erase(&mut self, frame: usize) {
        if let Some(pos) = self.order.iter().position(|&f| f == frame) {
            self.order.remove(pos);
        }
    }
}

/// Bookkeeping guarded by a single pool-wide latch: the free list, the LRU
/// replacer, and (transitively, through the calls made while holding it)
/// the page table. Holding one latch across a whole fetch/new/unpin/delete
/// call serializes buffer pool structural changes so two concurrent misses
/// on the same page id cannot both select the same victim frame.
struct PoolState {
    free_list: VecDeque<usize>,
    replacer: LruReplacer,
}

/// A fixed pool of page frames backed by a disk file, with pin/unpin
/// accounting, dirty tracking, and LRU victim replacement.
pub struct BufferPoolManager {
    frames: Vec<Arc<Latch<Page>>>,
    page_table: ExtendibleHashTable<i32, usize>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        bucket_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let frames = (0..pool_size)
            .map(|_| Arc::new(Latch::new(Page::new())))
            .collect();
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            free_list.push_back(i);
        }
        BufferPoolManager {
            frames,
            page_table: ExtendibleHashTable::new(bucket_size),
            state: Mutex::new(PoolState {
                free_list,
                replacer: LruReplacer::new(),
            }),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Fetches the page `page_id`, pinning it. Returns `None` if the page
    /// isn't resident and no frame can be freed for it.
    pub fn fetch_page(&self, page_id: i32) -> Option<Arc<Latch<Page>>> {
        let mut state = self.state.lock().unwrap();
        if let Some(frame_idx) = self.page_table.find(&page_id) {
            let frame = Arc::clone(&self.frames[frame_idx]);
            frame.write().pin_count += 1;
            state.replacer.erase(frame_idx);
            return Some(frame);
        }

        let frame_idx = self.victim(&mut state)?;
        self.page_table.remove(&self.evicted_page_id(frame_idx));
        self.page_table.insert(page_id, frame_idx);

        let frame = Arc::clone(&self.frames[frame_idx]);
        {
            let mut p = frame.write();
            p.reset_memory();
            p.page_id = page_id;
            p.pin_count = 1;
            p.is_dirty = false;
            p.lsn = crate::page::INVALID_LSN;
            if let Err(e) = self.disk_manager.read_page(page_id, p.data_mut()) {
                warn!("read_page({}) failed: {}", page_id, e);
            }
        }
        debug!("fetch_page: loaded page {} into frame {}", page_id, frame_idx);
        Some(frame)
    }

    /// Allocates a brand new page, pinning it and returning its id.
    pub fn new_page(&self) -> Option<(i32, Arc<Latch<Page>>)> {
        let mut state = self.state.lock().unwrap();
        let frame_idx = self.victim(&mut state)?;
        self.page_table.remove(&self.evicted_page_id(frame_idx));

        let page_id = self.disk_manager.allocate_page();
        self.page_table.insert(page_id, frame_idx);

        let frame = Arc::clone(&self.frames[frame_idx]);
        {
            let mut p = frame.write();
            p.reset_memory();
            p.page_id = page_id;
            p.pin_count = 1;
            p.is_dirty = false;
            p.lsn = crate::page::INVALID_LSN;
        }
        debug!("new_page: allocated page {} in frame {}", page_id, frame_idx);
        Some((page_id, frame))
    }

    pub fn unpin_page(&self, page_id: i32, is_dirty: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        let frame_idx = match self.page_table.find(&page_id) {
            Some(idx) => idx,
            None => return false,
        };
        let frame = Arc::clone(&self.frames[frame_idx]);
        let mut p = frame.write();
        if p.pin_count == 0 {
            return false;
        }
        if is_dirty {
            p.is_dirty = true;
        }
        p.pin_count -= 1;
        if p.pin_count == 0 {
            state.replacer.insert(frame_idx);
        }
        true
    }

    pub fn flush_page(&self, page_id: i32) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }
        let frame_idx = match self.page_table.find(&page_id) {
            Some(idx) => idx,
            None => return false,
        };
        let frame = Arc::clone(&self.frames[frame_idx]);
        let mut p = frame.write();
        self.write_back(&mut p);
        true
    }

    /// Evicts `page_id` from the pool and deallocates it on disk. The page
    /// must have no outstanding pins.
    pub fn delete_page(&self, page_id: i32) -> bool {
        let mut state = self.state.lock().unwrap();
        let frame_idx = match self.page_table.find(&page_id) {
            Some(idx) => idx,
            None => return false,
        };
        let frame = Arc::clone(&self.frames[frame_idx]);
        {
            let mut p = frame.write();
            if p.pin_count != 0 {
                return false;
            }
            p.reset_memory();
            p.page_id = INVALID_PAGE_ID;
            p.is_dirty = false;
        }
        state.replacer.erase(frame_idx);
        self.page_table.remove(&page_id);
        state.free_list.push_back(frame_idx);
        self.disk_manager.deallocate_page(page_id);
        true
    }

    /// Picks a victim frame: free list first, else the LRU replacer's head.
    /// Writes the victim back to disk (through the WAL invariant) if dirty.
    /// Caller already holds `state`.
    fn victim(&self, state: &mut PoolState) -> Option<usize> {
        if let Some(idx) = state.free_list.pop_front() {
            return Some(idx);
        }
        let idx = state.replacer.victim()?;
        let frame = Arc::clone(&self.frames[idx]);
        let mut p = frame.write();
        self.write_back(&mut p);
        Some(idx)
    }

    fn evicted_page_id(&self, frame_idx: usize) -> i32 {
        self.frames[frame_idx].read().page_id
    }

    /// Writes a frame's content to disk if dirty, forcing the log past the
    /// page's LSN first (write-ahead logging).
    fn write_back(&self, p: &mut Page) {
        if !p.is_dirty || p.page_id == INVALID_PAGE_ID {
            return;
        }
        if let Some(log_manager) = &self.log_manager {
            if p.lsn > log_manager.persistent_lsn() as i64 {
                log_manager.force();
            }
        }
        if let Err(e) = self.disk_manager.write_page(p.page_id, p.data()) {
            warn!("write_page({}) failed: {}", p.page_id, e);
        }
        p.is_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(pool_size: usize) -> BufferPoolManager {
        let dir = tempdir().unwrap();
        let dm = Arc::new(
            DiskManager::new(dir.path().join("db"), dir.path().join("log")).unwrap(),
        );
        // File handles stay valid after the directory entry is gone; leak
        // the guard so it outlives this helper instead of deleting the
        // backing files out from under the open handles.
        std::mem::forget(dir);
        BufferPoolManager::new(pool_size, 4, dm, None)
    }

    #[test]
    fn new_page_then_fetch_round_trips_content() {
        let bpm = pool(3);
        let (pid, frame) = bpm.new_page().unwrap();
        frame.write().data_mut()[0] = 42;
        assert!(bpm.unpin_page(pid, true));
        assert!(bpm.flush_page(pid));

        let frame2 = bpm.fetch_page(pid).unwrap();
        assert_eq!(frame2.read().data()[0], 42);
        assert!(bpm.unpin_page(pid, false));
    }

    #[test]
    fn lru_evicts_least_recently_unpinned() {
        let bpm = pool(3);
        let (p1, _) = bpm.new_page().unwrap();
        let (p2, _) = bpm.new_page().unwrap();
        let (p3, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(p1, false));
        assert!(bpm.unpin_page(p2, false));
        assert!(bpm.unpin_page(p3, false));

        // re-pin p2: removed from the replacer, so it can't be the victim.
        let f2 = bpm.fetch_page(p2).unwrap();
        assert!(bpm.unpin_page(p2, false));
        drop(f2);

        // one free frame remains (none were ever evicted yet), so this
        // allocation comes from the free list, not the replacer.
        let (_p4, _) = bpm.new_page().unwrap();

        // now all frames are in use; the next allocation must evict. p1 was
        // unpinned first among {p1, p3} (p2 was touched again), so it is
        // the LRU victim.
        let (_p5, _) = bpm.new_page().unwrap();
        assert!(bpm.fetch_page(p1).is_some());
    }

    #[test]
    fn pin_accounting_rejects_double_unpin() {
        let bpm = pool(2);
        let (pid, _) = bpm.new_page().unwrap();
        assert!(bpm.unpin_page(pid, false));
        assert!(!bpm.unpin_page(pid, false));
    }

    #[test]
    fn delete_page_requires_zero_pins() {
        let bpm = pool(2);
        let (pid, _frame) = bpm.new_page().unwrap();
        assert!(!bpm.delete_page(pid));
        assert!(bpm.unpin_page(pid, false));
        assert!(bpm.delete_page(pid));
        assert!(bpm.fetch_page(pid).is_some()); // reads back as a zeroed page
    }
}
