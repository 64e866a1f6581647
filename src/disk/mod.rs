//! Block-addressed file I/O for the page file and the log file.
//!
//! Grounded directly on the original engine's `DiskManager`: pages are
//! fixed-size blocks addressed by `page_id * PAGE_SIZE`; page ids are handed
//! out monotonically; deallocation is logical only (no on-disk compaction).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::page::PAGE_SIZE;

/// Owns the on-disk page file and log file for one engine instance.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
    log_path: PathBuf,
}

impl DiskManager {
    pub fn new<P: AsRef<Path>>(db_path: P, log_path: P) -> Result<Self> {
        let db_file = open_rw(db_path.as_ref())?;
        let log_file = open_rw(log_path.as_ref())?;
        let existing_pages = (db_file.metadata()?.len() / PAGE_SIZE as u64) as i32;
        Ok(DiskManager {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicI32::new(existing_pages),
            log_path: log_path.as_ref().to_path_buf(),
        })
    }

    /// Hands out the next page id. Monotonic for the lifetime of the file;
    /// deallocation never recycles an id.
    pub fn allocate_page(&self) -> i32 {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Logical only: the engine does not compact the page file, so this is
    /// a no-op kept for symmetry with `allocate_page` and to mirror the
    /// shape callers (buffer pool `delete_page`) expect to call.
    pub fn deallocate_page(&self, _page_id: i32) {}

    /// Advances the page-id allocator so it never hands out an id that
    /// recovery has already replayed. A no-op if the allocator is already
    /// past `page_id`.
    pub fn note_recovered_page_id(&self, page_id: i32) {
        self.next_page_id.fetch_max(page_id + 1, Ordering::SeqCst);
    }

    pub fn read_page(&self, page_id: i32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut file = self.db_file.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        if file.metadata()?.len() < offset + PAGE_SIZE as u64 {
            // Page never written yet: treat as all-zero, matching a freshly
            // allocated frame.
            buf.iter_mut().for_each(|b| *b = 0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&self, page_id: i32, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let mut file = self.db_file.lock().unwrap();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Appends raw bytes to the log file and returns the file offset they
    /// were written at.
    pub fn append_log(&self, buf: &[u8]) -> Result<u64> {
        let mut file = self.log_file.lock().unwrap();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        file.sync_data()?;
        Ok(offset)
    }

    /// Reads the whole log file from the start. Used by recovery.
    pub fn read_log(&self) -> Result<Vec<u8>> {
        let mut file = self.log_file.lock().unwrap();
        file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Truncates the log file to zero length. Used once at startup when
    /// recovery decides there is nothing left to redo/undo and the log can
    /// restart fresh, matching the lineage's "lazy truncate on first
    /// append" pattern.
    pub fn reset_log(&self) -> Result<()> {
        let file = open_rw(&self.log_path)?;
        file.set_len(0)?;
        *self.log_file.lock().unwrap() = file;
        Ok(())
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(Error::from)
}
