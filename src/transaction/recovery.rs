//! Undo-only recovery manager (C5).
//!
//! There is no redo pass: every committed write has already been flushed to
//! its data file (or is about to be, on commit), so the only thing recovery
//! ever does is unwind the before-images of transactions that never reached
//! `Commit` or `Rollback`. This is strictly weaker than ARIES but matches a
//! design with no buffer-pool write-back before commit other than a plain
//! eviction, which `flush_all` makes safe by always flushing the backing log
//! record's LSN first.

use crate::buffer::BufferPool;
use crate::common::{BlockId, Lsn, TransactionId};
use crate::error::Result;
use crate::log::record::{FixedWidth, LogRecord};
use crate::log::LogManager;
use std::collections::HashSet;
use std::sync::Arc;

pub struct RecoveryManager {
    log_mgr: LogManager,
    buffer_pool: Arc<BufferPool>,
}

impl RecoveryManager {
    pub fn new(log_mgr: LogManager, buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            log_mgr,
            buffer_pool,
        }
    }

    pub fn log_start(&self, tx: TransactionId) -> Result<Lsn> {
        self.log_mgr.append(&LogRecord::Start { tx }.encode())
    }

    pub fn log_set_fixed_len(
        &self,
        tx: TransactionId,
        block: &BlockId,
        offset: usize,
        width: FixedWidth,
        old_value: i64,
    ) -> Result<Lsn> {
        self.log_mgr.append(
            &LogRecord::SetFixedLen {
                tx,
                block: block.clone(),
                offset,
                width,
                old_value,
            }
            .encode(),
        )
    }

    pub fn log_set_var_len(
        &self,
        tx: TransactionId,
        block: &BlockId,
        offset: usize,
        old_value: &[u8],
    ) -> Result<Lsn> {
        self.log_mgr.append(
            &LogRecord::SetVarLen {
                tx,
                block: block.clone(),
                offset,
                old_value: old_value.to_vec(),
            }
            .encode(),
        )
    }

    pub fn log_copy(
        &self,
        tx: TransactionId,
        block: &BlockId,
        offset: usize,
        old_bytes: &[u8],
    ) -> Result<Lsn> {
        self.log_mgr.append(
            &LogRecord::Copy {
                tx,
                block: block.clone(),
                offset,
                old_bytes: old_bytes.to_vec(),
            }
            .encode(),
        )
    }

    /// Flushes `tx`'s dirty pages, records its commit, and makes the commit
    /// record itself durable.
    pub fn commit(&self, tx: TransactionId) -> Result<()> {
        self.buffer_pool.flush_all(tx)?;
        let lsn = self.log_mgr.append(&LogRecord::Commit { tx }.encode())?;
        self.log_mgr.flush(lsn)
    }

    /// Undoes every write `tx` made, newest first, back to its `Start` record.
    pub fn rollback(&self, tx: TransactionId) -> Result<()> {
        for record in self.log_mgr.iterator()? {
            let record = record?;
            if record.tx() != Some(tx) {
                continue;
            }
            if matches!(record, LogRecord::Start { .. }) {
                break;
            }
            self.undo(&record)?;
        }
        self.buffer_pool.flush_all(tx)?;
        let lsn = self.log_mgr.append(&LogRecord::Rollback { tx }.encode())?;
        self.log_mgr.flush(lsn)
    }

    /// System-wide startup recovery: undoes every write belonging to a
    /// transaction that never committed or rolled back, scanning backward
    /// until a checkpoint or the start of the log.
    pub fn recover(&self) -> Result<()> {
        let mut finished: HashSet<TransactionId> = HashSet::new();
        let mut max_tx: Option<TransactionId> = None;
        for record in self.log_mgr.iterator()? {
            let record = record?;
            if let Some(tx) = record.tx() {
                max_tx = Some(max_tx.map_or(tx, |m| m.max(tx)));
            }
            match &record {
                LogRecord::Checkpoint => break,
                LogRecord::Commit { tx } | LogRecord::Rollback { tx } => {
                    finished.insert(*tx);
                }
                _ => {
                    if let Some(tx) = record.tx() {
                        if !finished.contains(&tx) {
                            self.undo(&record)?;
                        }
                    }
                }
            }
        }
        if let Some(max_tx) = max_tx {
            crate::transaction::advance_next_tx_num(max_tx + 1);
        }
        self.buffer_pool.flush_dirty()?;
        let lsn = self.log_mgr.append(&LogRecord::Checkpoint.encode())?;
        self.log_mgr.flush(lsn)
    }

    fn undo(&self, record: &LogRecord) -> Result<()> {
        let tx = record.tx().expect("only undoable records reach undo()");
        match record {
            LogRecord::SetFixedLen {
                block,
                offset,
                width,
                old_value,
                ..
            } => {
                let idx = self.buffer_pool.pin(block)?;
                self.buffer_pool.with_page_mut(idx, |p| match width {
                    FixedWidth::Byte => p.set_u8(*offset, *old_value as u8),
                    FixedWidth::Short => p.set_i16(*offset, *old_value as i16),
                    FixedWidth::Int => p.set_i32(*offset, *old_value as i32),
                    FixedWidth::Long => p.set_i64(*offset, *old_value),
                })?;
                self.buffer_pool.set_modified(idx, tx, crate::common::NO_LSN);
                self.buffer_pool.unpin(idx);
            }
            LogRecord::SetVarLen {
                block,
                offset,
                old_value,
                ..
            } => {
                let idx = self.buffer_pool.pin(block)?;
                self.buffer_pool
                    .with_page_mut(idx, |p| p.set_bytes(*offset, old_value))?;
                self.buffer_pool.set_modified(idx, tx, crate::common::NO_LSN);
                self.buffer_pool.unpin(idx);
            }
            LogRecord::Copy {
                block,
                offset,
                old_bytes,
                ..
            } => {
                let idx = self.buffer_pool.pin(block)?;
                self.buffer_pool
                    .with_page_mut(idx, |p| p.set_raw(*offset, old_bytes))?;
                self.buffer_pool.set_modified(idx, tx, crate::common::NO_LSN);
                self.buffer_pool.unpin(idx);
            }
            _ => {}
        }
        Ok(())
    }
}
