//! Buffer pool (C2): a fixed number of in-memory frames caching disk blocks.
//!
//! Replacement is intentionally dumb — any unpinned frame, picking the one
//! that has gone longest without being pinned — because the spec's
//! concurrency model bounds the working set with locks, not with a clever
//! eviction policy. A frame is flushed (log-flushed-first, then the page
//! itself) before it is handed to a new block.

use crate::common::{BlockId, Lsn, TransactionId, NO_LSN};
use crate::error::{DbError, Result};
use crate::log::LogManager;
use crate::storage::{FileManager, Page};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Point-in-time counters for observability; not used for any scheduling decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferPoolStats {
    pub pin_hits: u64,
    pub pin_misses: u64,
    pub evictions: u64,
    pub flushes: u64,
}

struct Frame {
    page: Page,
    block: Option<BlockId>,
    pins: u32,
    modified_by: Option<TransactionId>,
    lsn: Lsn,
    /// Monotonic tiebreaker for "longest unpinned" selection.
    last_unpinned_at: u64,
}

impl Frame {
    fn new(page_size: usize) -> Self {
        Self {
            page: Page::new(page_size),
            block: None,
            pins: 0,
            modified_by: None,
            lsn: NO_LSN,
            last_unpinned_at: 0,
        }
    }

    fn is_pinned(&self) -> bool {
        self.pins > 0
    }
}

struct Inner {
    frames: Vec<Frame>,
    clock: u64,
    stats: BufferPoolStats,
}

pub struct BufferPool {
    file_mgr: FileManager,
    log_mgr: LogManager,
    inner: Mutex<Inner>,
    not_full: Condvar,
    max_wait: Duration,
}

impl BufferPool {
    pub fn new(
        file_mgr: FileManager,
        log_mgr: LogManager,
        num_buffers: usize,
        max_wait: Duration,
    ) -> Self {
        let page_size = file_mgr.block_size();
        let frames = (0..num_buffers).map(|_| Frame::new(page_size)).collect();
        Self {
            file_mgr,
            log_mgr,
            inner: Mutex::new(Inner {
                frames,
                clock: 0,
                stats: BufferPoolStats::default(),
            }),
            not_full: Condvar::new(),
            max_wait,
        }
    }

    /// Pins `block`, loading it from disk if it isn't already resident.
    /// Blocks (up to `max_wait`) if every frame is pinned.
    pub fn pin(&self, block: &BlockId) -> Result<usize> {
        let start = Instant::now();
        let mut guard = self.inner.lock();
        loop {
            if let Some(idx) = Self::find_existing(&guard.frames, block) {
                guard.frames[idx].pins += 1;
                guard.stats.pin_hits += 1;
                return Ok(idx);
            }

            if let Some(idx) = Self::find_replaceable(&guard.frames) {
                guard.stats.pin_misses += 1;
                Self::replace(self, &mut guard, idx, block)?;
                guard.frames[idx].pins = 1;
                return Ok(idx);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.max_wait {
                return Err(DbError::BufferExhausted);
            }
            let remaining = self.max_wait - elapsed;
            self.not_full.wait_for(&mut guard, remaining);
        }
    }

    pub fn unpin(&self, idx: usize) {
        let mut guard = self.inner.lock();
        guard.frames[idx].pins -= 1;
        if guard.frames[idx].pins == 0 {
            guard.clock += 1;
            let clock = guard.clock;
            guard.frames[idx].last_unpinned_at = clock;
            self.not_full.notify_one();
        }
    }

    pub fn block_of(&self, idx: usize) -> BlockId {
        self.inner.lock().frames[idx]
            .block
            .clone()
            .expect("frame must hold a block while the caller has it pinned")
    }

    pub fn with_page<R>(&self, idx: usize, f: impl FnOnce(&Page) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard.frames[idx].page)
    }

    pub fn with_page_mut<R>(&self, idx: usize, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard.frames[idx].page)
    }

    /// Marks the frame dirty on behalf of `tx`, recording the LSN of the log
    /// record that justifies the change (write-ahead rule: this LSN must be
    /// flushed to the log before the page itself is flushed).
    pub fn set_modified(&self, idx: usize, tx: TransactionId, lsn: Lsn) {
        let mut guard = self.inner.lock();
        guard.frames[idx].modified_by = Some(tx);
        if lsn >= 0 {
            guard.frames[idx].lsn = lsn;
        }
    }

    /// Flushes every frame last modified by `tx`, honoring the write-ahead rule.
    pub fn flush_all(&self, tx: TransactionId) -> Result<()> {
        let mut guard = self.inner.lock();
        let n = guard.frames.len();
        for idx in 0..n {
            if guard.frames[idx].modified_by == Some(tx) {
                self.flush_frame(&mut guard, idx)?;
            }
        }
        Ok(())
    }

    /// Flushes every dirty frame regardless of owning transaction. Used only
    /// by system-wide recovery, which has no single `tx` to filter on.
    pub fn flush_dirty(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let n = guard.frames.len();
        for idx in 0..n {
            if guard.frames[idx].modified_by.is_some() {
                self.flush_frame(&mut guard, idx)?;
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.inner.lock().stats
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.file_mgr
    }

    pub fn available(&self) -> usize {
        self.inner
            .lock()
            .frames
            .iter()
            .filter(|f| !f.is_pinned())
            .count()
    }

    fn find_existing(frames: &[Frame], block: &BlockId) -> Option<usize> {
        frames
            .iter()
            .position(|f| f.block.as_ref() == Some(block))
    }

    fn find_replaceable(frames: &[Frame]) -> Option<usize> {
        frames
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_pinned())
            .min_by_key(|(_, f)| f.last_unpinned_at)
            .map(|(idx, _)| idx)
    }

    fn replace(&self, guard: &mut Inner, idx: usize, block: &BlockId) -> Result<()> {
        if guard.frames[idx].block.is_some() {
            self.flush_frame(guard, idx)?;
            guard.stats.evictions += 1;
        }
        self.file_mgr.read(block, &mut guard.frames[idx].page)?;
        guard.frames[idx].block = Some(block.clone());
        guard.frames[idx].modified_by = None;
        guard.frames[idx].lsn = NO_LSN;
        tracing::debug!(%block, idx, "buffer pool loaded block into frame");
        Ok(())
    }

    fn flush_frame(&self, guard: &mut Inner, idx: usize) -> Result<()> {
        if guard.frames[idx].modified_by.is_none() {
            return Ok(());
        }
        let lsn = guard.frames[idx].lsn;
        if lsn >= 0 {
            self.log_mgr.flush(lsn)?;
        }
        if let Some(block) = guard.frames[idx].block.clone() {
            self.file_mgr.write(&block, &guard.frames[idx].page)?;
            guard.stats.flushes += 1;
        }
        guard.frames[idx].modified_by = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(num_buffers: usize) -> (tempfile::TempDir, BufferPool) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), 400).unwrap();
        let lm = LogManager::new(fm.clone(), "test.log").unwrap();
        let pool = BufferPool::new(fm, lm, num_buffers, Duration::from_millis(200));
        (dir, pool)
    }

    #[test]
    fn pin_same_block_twice_reuses_frame() {
        let (_dir, pool) = test_pool(2);
        pool.file_mgr.append("a.tbl").unwrap();
        let block = BlockId::new("a.tbl", 0);
        let i1 = pool.pin(&block).unwrap();
        let i2 = pool.pin(&block).unwrap();
        assert_eq!(i1, i2);
        assert_eq!(pool.stats().pin_hits, 1);
    }

    #[test]
    fn pin_blocks_when_pool_exhausted() {
        let (_dir, pool) = test_pool(1);
        pool.file_mgr.append("a.tbl").unwrap();
        pool.file_mgr.append("b.tbl").unwrap();
        let _idx = pool.pin(&BlockId::new("a.tbl", 0)).unwrap();
        let err = pool.pin(&BlockId::new("b.tbl", 0)).unwrap_err();
        assert!(matches!(err, DbError::BufferExhausted));
    }

    #[test]
    fn unpin_frees_frame_for_replacement() {
        let (_dir, pool) = test_pool(1);
        pool.file_mgr.append("a.tbl").unwrap();
        pool.file_mgr.append("b.tbl").unwrap();
        let idx = pool.pin(&BlockId::new("a.tbl", 0)).unwrap();
        pool.unpin(idx);
        let idx2 = pool.pin(&BlockId::new("b.tbl", 0)).unwrap();
        assert_eq!(pool.block_of(idx2), BlockId::new("b.tbl", 0));
    }
}
