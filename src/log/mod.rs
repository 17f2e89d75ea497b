//! Write-ahead log (C3): undo-only, backward-packed log pages.
//!
//! Each log page keeps a 4-byte "boundary" at offset 0 pointing at the start
//! of the most-recently-appended record. Records are packed backward from
//! the end of the page toward the boundary, so reading forward from the
//! boundary yields records newest-first without needing a reverse cursor —
//! exactly the order recovery and rollback need.

pub mod record;

pub use record::LogRecord;

use crate::common::{BlockId, Lsn};
use crate::error::Result;
use crate::storage::{FileManager, Page};
use parking_lot::Mutex;

struct Inner {
    current_page: Page,
    current_block: BlockId,
    latest_lsn: Lsn,
    last_saved_lsn: Lsn,
}

#[derive(Clone)]
pub struct LogManager {
    file_mgr: FileManager,
    log_file: String,
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl LogManager {
    pub fn new(file_mgr: FileManager, log_file: impl Into<String>) -> Result<Self> {
        let log_file = log_file.into();
        let block_size = file_mgr.block_size();
        let num_blocks = file_mgr.size(&log_file)?;

        let (current_block, current_page) = if num_blocks == 0 {
            let block = file_mgr.append(&log_file)?;
            let mut page = Page::new(block_size);
            page.set_i32(0, block_size as i32)?;
            file_mgr.write(&block, &page)?;
            (block, page)
        } else {
            let block = BlockId::new(log_file.clone(), num_blocks - 1);
            let mut page = Page::new(block_size);
            file_mgr.read(&block, &mut page)?;
            (block, page)
        };

        Ok(Self {
            file_mgr,
            log_file,
            inner: std::sync::Arc::new(Mutex::new(Inner {
                current_page,
                current_block,
                latest_lsn: 0,
                last_saved_lsn: 0,
            })),
        })
    }

    /// Appends a pre-encoded record, returning its assigned LSN. Callers pass
    /// the output of [`LogRecord::encode`]; the manager itself is agnostic to
    /// record shape.
    pub fn append(&self, record: &[u8]) -> Result<Lsn> {
        let mut guard = self.inner.lock();
        let block_size = self.file_mgr.block_size();
        let bytes_needed = record.len() + crate::storage::page::VARLEN_PREFIX_SIZE;

        let mut boundary = guard.current_page.get_i32(0)? as usize;
        if (boundary as i64) - (bytes_needed as i64) < 4 {
            self.flush_current(&mut guard)?;
            let new_block = self.file_mgr.append(&self.log_file)?;
            let mut page = Page::new(block_size);
            page.set_i32(0, block_size as i32)?;
            self.file_mgr.write(&new_block, &page)?;
            guard.current_block = new_block;
            guard.current_page = page;
            boundary = block_size;
        }

        let recpos = boundary - bytes_needed;
        guard.current_page.set_bytes(recpos, record)?;
        guard.current_page.set_i32(0, recpos as i32)?;
        guard.latest_lsn += 1;
        Ok(guard.latest_lsn)
    }

    /// Guarantees every record up to and including `lsn` is durable on disk.
    pub fn flush(&self, lsn: Lsn) -> Result<()> {
        let mut guard = self.inner.lock();
        if lsn > guard.last_saved_lsn {
            self.flush_current(&mut guard)?;
        }
        Ok(())
    }

    fn flush_current(&self, guard: &mut Inner) -> Result<()> {
        self.file_mgr
            .write(&guard.current_block, &guard.current_page)?;
        guard.last_saved_lsn = guard.latest_lsn;
        Ok(())
    }

    /// Flushes the current page and returns a cursor over every record,
    /// newest first, back to the start of the log.
    pub fn iterator(&self) -> Result<LogIterator> {
        let mut guard = self.inner.lock();
        self.flush_current(&mut guard)?;
        LogIterator::new(
            self.file_mgr.clone(),
            self.log_file.clone(),
            guard.current_block.clone(),
        )
    }
}

/// Reverse-chronological cursor over the log, oldest block last.
pub struct LogIterator {
    file_mgr: FileManager,
    log_file: String,
    block_size: usize,
    current_block: BlockId,
    page: Page,
    current_pos: usize,
    boundary: usize,
}

impl LogIterator {
    fn new(file_mgr: FileManager, log_file: String, start_block: BlockId) -> Result<Self> {
        let block_size = file_mgr.block_size();
        let mut it = Self {
            file_mgr,
            log_file,
            block_size,
            current_block: start_block,
            page: Page::new(block_size),
            current_pos: block_size,
            boundary: block_size,
        };
        it.move_to_block(it.current_block.clone())?;
        Ok(it)
    }

    fn move_to_block(&mut self, block: BlockId) -> Result<()> {
        self.file_mgr.read(&block, &mut self.page)?;
        self.boundary = self.page.get_i32(0)? as usize;
        self.current_block = block;
        self.current_pos = self.boundary;
        Ok(())
    }

    fn has_next(&self) -> bool {
        self.current_pos < self.block_size || self.current_block.block_num > 0
    }
}

impl Iterator for LogIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        if self.current_pos == self.block_size {
            let prev = BlockId::new(self.log_file.clone(), self.current_block.block_num - 1);
            if let Err(e) = self.move_to_block(prev) {
                return Some(Err(e));
            }
        }
        let bytes = match self.page.get_bytes(self.current_pos) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        self.current_pos += crate::storage::page::VARLEN_PREFIX_SIZE + bytes.len();
        Some(LogRecord::decode(&bytes))
    }
}
