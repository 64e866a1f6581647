//! Fixed-size page frame shared by the buffer pool.

/// Size, in bytes, of every page on disk and every in-memory frame.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel meaning "no page".
pub const INVALID_PAGE_ID: i32 = -1;

/// Sentinel meaning "no LSN has touched this page".
pub const INVALID_LSN: i64 = -1;

/// A single buffer pool frame: metadata plus a raw byte payload.
///
/// Callers that need to latch a page's content for concurrent access wrap
/// it in [`crate::latch::Latch`] at the point of use (the buffer pool keeps
/// its frames as `Arc<Latch<Page>>`); `Page` itself carries no latch, since
/// the physical per-page latch and the pool's own bookkeeping latch would
/// otherwise nest needlessly.
pub struct Page {
    pub page_id: i32,
    pub pin_count: u32,
    pub is_dirty: bool,
    pub lsn: i64,
    data: Vec<u8>,
}

impl Page {
    pub fn new() -> Self {
        Page {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
            lsn: INVALID_LSN,
            data: vec![0u8; PAGE_SIZE],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn reset_memory(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new()
    }
}
