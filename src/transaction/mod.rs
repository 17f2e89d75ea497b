//! Transactions (C5): strict two-phase locking over the buffer pool, with
//! commit/rollback delegating to the recovery manager.
//!
//! A transaction pins every block it touches for its own lifetime (SimpleDB's
//! "buffer list" trick) so repeated access doesn't re-pin, and holds every
//! lock it acquires until commit or rollback releases them all at once —
//! that's strict 2PL, not just 2PL, and it's what makes undo-only recovery
//! correct: a block's before-image is only overwritten by a committed write.

pub mod lock_table;
pub mod recovery;

pub use lock_table::LockTable;
pub use recovery::RecoveryManager;

use crate::buffer::BufferPool;
use crate::common::{BlockId, TransactionId};
use crate::error::Result;
use crate::log::record::FixedWidth;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Synthetic block used to serialize `append`/`size` against each other and
/// against any block-level lock a concurrent transaction might already hold
/// on the soon-to-exist last block.
fn end_of_file_marker(file_name: &str) -> BlockId {
    BlockId::new(file_name, u64::MAX)
}

static NEXT_TX_NUM: AtomicI64 = AtomicI64::new(1);

pub fn next_tx_num() -> TransactionId {
    NEXT_TX_NUM.fetch_add(1, Ordering::SeqCst)
}

/// Raises the next transaction id to at least `floor`, used by recovery to
/// make sure a freshly started transaction never reuses an id seen in the log.
pub fn advance_next_tx_num(floor: TransactionId) {
    NEXT_TX_NUM.fetch_max(floor, Ordering::SeqCst);
}

pub struct Transaction {
    tx_num: TransactionId,
    buffer_pool: Arc<BufferPool>,
    lock_table: Arc<LockTable>,
    recovery: Arc<RecoveryManager>,
    /// Block -> frame index, for blocks this transaction currently has pinned.
    pinned: HashMap<BlockId, usize>,
    locked_shared: HashSet<BlockId>,
    locked_exclusive: HashSet<BlockId>,
}

impl Transaction {
    pub fn new(
        buffer_pool: Arc<BufferPool>,
        lock_table: Arc<LockTable>,
        recovery: Arc<RecoveryManager>,
    ) -> Result<Self> {
        let tx_num = next_tx_num();
        recovery.log_start(tx_num)?;
        Ok(Self {
            tx_num,
            buffer_pool,
            lock_table,
            recovery,
            pinned: HashMap::new(),
            locked_shared: HashSet::new(),
            locked_exclusive: HashSet::new(),
        })
    }

    pub fn tx_num(&self) -> TransactionId {
        self.tx_num
    }

    pub fn pin(&mut self, block: &BlockId) -> Result<()> {
        if self.pinned.contains_key(block) {
            return Ok(());
        }
        let idx = self.buffer_pool.pin(block)?;
        self.pinned.insert(block.clone(), idx);
        Ok(())
    }

    pub fn unpin(&mut self, block: &BlockId) {
        if let Some(idx) = self.pinned.remove(block) {
            self.buffer_pool.unpin(idx);
        }
    }

    fn ensure_s_lock(&mut self, block: &BlockId) -> Result<()> {
        if !self.locked_shared.contains(block) && !self.locked_exclusive.contains(block) {
            self.lock_table.s_lock(block)?;
            self.locked_shared.insert(block.clone());
        }
        Ok(())
    }

    fn ensure_x_lock(&mut self, block: &BlockId) -> Result<()> {
        if self.locked_exclusive.contains(block) {
            return Ok(());
        }
        self.ensure_s_lock(block)?;
        self.lock_table.x_lock(block)?;
        self.locked_exclusive.insert(block.clone());
        Ok(())
    }

    fn frame(&self, block: &BlockId) -> usize {
        *self
            .pinned
            .get(block)
            .expect("block must be pinned before being read or written")
    }

    pub fn get_i32(&mut self, block: &BlockId, offset: usize) -> Result<i32> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_i32(offset))
    }

    pub fn get_i16(&mut self, block: &BlockId, offset: usize) -> Result<i16> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_i16(offset))
    }

    pub fn get_u8(&mut self, block: &BlockId, offset: usize) -> Result<u8> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_u8(offset))
    }

    pub fn get_i64(&mut self, block: &BlockId, offset: usize) -> Result<i64> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_i64(offset))
    }

    pub fn get_string(&mut self, block: &BlockId, offset: usize) -> Result<String> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_string(offset))
    }

    pub fn get_bytes(&mut self, block: &BlockId, offset: usize) -> Result<Vec<u8>> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_bytes(offset))
    }

    /// Reads `len` raw bytes with no length-prefix framing (slotted-page
    /// compaction's slot-copy step).
    pub fn get_raw(&mut self, block: &BlockId, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.ensure_s_lock(block)?;
        let idx = self.frame(block);
        self.buffer_pool.with_page(idx, |p| p.get_raw(offset, len))
    }

    pub fn set_i32(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: i32,
        should_log: bool,
    ) -> Result<()> {
        self.ensure_x_lock(block)?;
        let idx = self.frame(block);
        let old = self.buffer_pool.with_page(idx, |p| p.get_i32(offset))?;
        let lsn = if should_log {
            self.recovery
                .log_set_fixed_len(self.tx_num, block, offset, FixedWidth::Int, old as i64)?
        } else {
            crate::common::NO_LSN
        };
        self.buffer_pool
            .with_page_mut(idx, |p| p.set_i32(offset, value))?;
        self.buffer_pool.set_modified(idx, self.tx_num, lsn);
        Ok(())
    }

    pub fn set_i16(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: i16,
        should_log: bool,
    ) -> Result<()> {
        self.ensure_x_lock(block)?;
        let idx = self.frame(block);
        let old = self.buffer_pool.with_page(idx, |p| p.get_i16(offset))?;
        let lsn = if should_log {
            self.recovery
                .log_set_fixed_len(self.tx_num, block, offset, FixedWidth::Short, old as i64)?
        } else {
            crate::common::NO_LSN
        };
        self.buffer_pool
            .with_page_mut(idx, |p| p.set_i16(offset, value))?;
        self.buffer_pool.set_modified(idx, self.tx_num, lsn);
        Ok(())
    }

    pub fn set_u8(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: u8,
        should_log: bool,
    ) -> Result<()> {
        self.ensure_x_lock(block)?;
        let idx = self.frame(block);
        let old = self.buffer_pool.with_page(idx, |p| p.get_u8(offset))?;
        let lsn = if should_log {
            self.recovery
                .log_set_fixed_len(self.tx_num, block, offset, FixedWidth::Byte, old as i64)?
        } else {
            crate::common::NO_LSN
        };
        self.buffer_pool
            .with_page_mut(idx, |p| p.set_u8(offset, value))?;
        self.buffer_pool.set_modified(idx, self.tx_num, lsn);
        Ok(())
    }

    pub fn set_i64(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: i64,
        should_log: bool,
    ) -> Result<()> {
        self.ensure_x_lock(block)?;
        let idx = self.frame(block);
        let old = self.buffer_pool.with_page(idx, |p| p.get_i64(offset))?;
        let lsn = if should_log {
            self.recovery
                .log_set_fixed_len(self.tx_num, block, offset, FixedWidth::Long, old)?
        } else {
            crate::common::NO_LSN
        };
        self.buffer_pool
            .with_page_mut(idx, |p| p.set_i64(offset, value))?;
        self.buffer_pool.set_modified(idx, self.tx_num, lsn);
        Ok(())
    }

    pub fn set_string(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &str,
        should_log: bool,
    ) -> Result<()> {
        self.set_bytes(block, offset, value.as_bytes(), should_log)
    }

    pub fn set_bytes(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &[u8],
        should_log: bool,
    ) -> Result<()> {
        self.ensure_x_lock(block)?;
        let idx = self.frame(block);
        let old = self.buffer_pool.with_page(idx, |p| p.get_bytes(offset))?;
        let lsn = if should_log {
            self.recovery
                .log_set_var_len(self.tx_num, block, offset, &old)?
        } else {
            crate::common::NO_LSN
        };
        self.buffer_pool
            .with_page_mut(idx, |p| p.set_bytes(offset, value))?;
        self.buffer_pool.set_modified(idx, self.tx_num, lsn);
        Ok(())
    }

    /// Raw byte-range overwrite with no length-prefix framing, for slotted
    /// page maintenance (slot directory shifts, record compaction).
    pub fn copy_raw(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &[u8],
        should_log: bool,
    ) -> Result<()> {
        self.ensure_x_lock(block)?;
        let idx = self.frame(block);
        let old = self
            .buffer_pool
            .with_page(idx, |p| p.get_raw(offset, value.len()))?;
        let lsn = if should_log {
            self.recovery
                .log_copy(self.tx_num, block, offset, &old)?
        } else {
            crate::common::NO_LSN
        };
        self.buffer_pool
            .with_page_mut(idx, |p| p.set_raw(offset, value))?;
        self.buffer_pool.set_modified(idx, self.tx_num, lsn);
        Ok(())
    }

    pub fn size(&mut self, file_name: &str) -> Result<u64> {
        let marker = end_of_file_marker(file_name);
        self.ensure_s_lock(&marker)?;
        self.buffer_pool.file_manager().size(file_name)
    }

    pub fn append(&mut self, file_name: &str) -> Result<BlockId> {
        let marker = end_of_file_marker(file_name);
        self.ensure_x_lock(&marker)?;
        self.buffer_pool.file_manager().append(file_name)
    }

    pub fn block_size(&self) -> usize {
        self.buffer_pool.file_manager().block_size()
    }

    pub fn commit(mut self) -> Result<()> {
        self.recovery.commit(self.tx_num)?;
        self.release();
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.recovery.rollback(self.tx_num)?;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        let pinned: Vec<BlockId> = self.pinned.keys().cloned().collect();
        for block in pinned {
            self.unpin(&block);
        }
        for block in self.locked_exclusive.drain() {
            self.lock_table.unlock(&block);
        }
        for block in self.locked_shared.drain() {
            self.lock_table.unlock(&block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogManager;
    use crate::storage::FileManager;
    use std::time::Duration;

    fn harness() -> (
        tempfile::TempDir,
        Arc<BufferPool>,
        Arc<LockTable>,
        Arc<RecoveryManager>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), 400).unwrap();
        let lm = LogManager::new(fm.clone(), "test.log").unwrap();
        let pool = Arc::new(BufferPool::new(fm, lm.clone(), 8, Duration::from_millis(500)));
        let locks = Arc::new(LockTable::new(Duration::from_millis(500)));
        let recovery = Arc::new(RecoveryManager::new(lm, pool.clone()));
        (dir, pool, locks, recovery)
    }

    #[test]
    fn commit_persists_writes() {
        let (_dir, pool, locks, recovery) = harness();
        let mut tx = Transaction::new(pool.clone(), locks.clone(), recovery.clone()).unwrap();
        let block = tx.append("t.tbl").unwrap();
        tx.pin(&block).unwrap();
        tx.set_i32(&block, 0, 42, true).unwrap();
        tx.commit().unwrap();

        let mut tx2 = Transaction::new(pool, locks, recovery).unwrap();
        tx2.pin(&block).unwrap();
        assert_eq!(tx2.get_i32(&block, 0).unwrap(), 42);
    }

    #[test]
    fn rollback_undoes_writes() {
        let (_dir, pool, locks, recovery) = harness();
        let mut setup_tx = Transaction::new(pool.clone(), locks.clone(), recovery.clone()).unwrap();
        let block = setup_tx.append("t.tbl").unwrap();
        setup_tx.pin(&block).unwrap();
        setup_tx.set_i32(&block, 0, 7, true).unwrap();
        setup_tx.commit().unwrap();

        let mut tx = Transaction::new(pool.clone(), locks.clone(), recovery.clone()).unwrap();
        tx.pin(&block).unwrap();
        tx.set_i32(&block, 0, 999, true).unwrap();
        tx.rollback().unwrap();

        let mut tx2 = Transaction::new(pool, locks, recovery).unwrap();
        tx2.pin(&block).unwrap();
        assert_eq!(tx2.get_i32(&block, 0).unwrap(), 7);
    }
}
