//! Per-block shared/exclusive lock table (C4).
//!
//! One table, shared by every transaction in the process. A block's entry is
//! absent when unlocked, a positive count while held shared by that many
//! transactions, or `-1` while held exclusively. `x_lock` assumes the caller
//! already holds (or is about to hold) the block's only shared lock — it
//! waits only for *other* transactions' shared locks to drain, matching how
//! [`super::Transaction`] always upgrades through `s_lock` first.

use crate::common::BlockId;
use crate::error::{DbError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const EXCLUSIVE: i32 = -1;

pub struct LockTable {
    locks: Mutex<HashMap<BlockId, i32>>,
    cond: Condvar,
    max_wait: Duration,
}

impl LockTable {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
            max_wait,
        }
    }

    pub fn s_lock(&self, block: &BlockId) -> Result<()> {
        let start = Instant::now();
        let mut guard = self.locks.lock();
        while Self::value(&guard, block) == EXCLUSIVE {
            self.wait(&mut guard, block, start)?;
        }
        let value = Self::value(&guard, block);
        guard.insert(block.clone(), value + 1);
        Ok(())
    }

    /// Upgrades (or takes fresh) an exclusive lock. Waits for every *other*
    /// shared holder to release; a lock count of 1 is assumed to be the
    /// caller's own prior `s_lock`.
    pub fn x_lock(&self, block: &BlockId) -> Result<()> {
        let start = Instant::now();
        let mut guard = self.locks.lock();
        while Self::value(&guard, block) > 1 {
            self.wait(&mut guard, block, start)?;
        }
        guard.insert(block.clone(), EXCLUSIVE);
        Ok(())
    }

    pub fn unlock(&self, block: &BlockId) {
        let mut guard = self.locks.lock();
        let value = Self::value(&guard, block);
        if value > 1 {
            guard.insert(block.clone(), value - 1);
        } else {
            guard.remove(block);
            self.cond.notify_all();
        }
    }

    fn value(locks: &HashMap<BlockId, i32>, block: &BlockId) -> i32 {
        *locks.get(block).unwrap_or(&0)
    }

    fn wait(
        &self,
        guard: &mut parking_lot::MutexGuard<'_, HashMap<BlockId, i32>>,
        block: &BlockId,
        start: Instant,
    ) -> Result<()> {
        let elapsed = start.elapsed();
        if elapsed >= self.max_wait {
            return Err(DbError::LockTimeout(block.clone()));
        }
        self.cond.wait_for(guard, self.max_wait - elapsed);
        Ok(())
    }
}
