//! Top-level configuration and the `Db` handle wiring C1-C8 together.

use crate::buffer::BufferPool;
use crate::error::{DbError, Result};
use crate::log::LogManager;
use crate::storage::FileManager;
use crate::transaction::{LockTable, RecoveryManager, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// On-disk block size, in bytes. Fixed for the lifetime of a data directory —
/// changing it between runs would misinterpret every existing file.
const DEFAULT_BLOCK_SIZE: usize = 4096;
const DEFAULT_BUFFER_FRAMES: usize = 256;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_BUFFER_TIMEOUT_MS: u64 = 10_000;
const LOG_FILE_NAME: &str = "wal.log";

/// Serializable configuration, loadable from a JSON file so deployments don't
/// need a recompile to change buffer sizing or timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub data_dir: String,
    pub block_size: usize,
    pub buffer_frames: usize,
    pub lock_timeout_ms: u64,
    pub buffer_timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            buffer_timeout_ms: DEFAULT_BUFFER_TIMEOUT_MS,
        }
    }
}

impl DbConfig {
    /// Loads a config from a JSON file, falling back to [`DbConfig::default`]
    /// field values for anything the file omits.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DbError::Serialization(format!("invalid config file: {e}")))
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }
}

/// The engine handle: one `FileManager`/`LogManager`/`BufferPool`/`LockTable`
/// per data directory, shared by every [`Transaction`] started against it.
///
/// Opening a `Db` runs crash recovery once, synchronously, before returning —
/// any transaction started afterward sees a consistent on-disk state.
pub struct Db {
    buffer_pool: Arc<BufferPool>,
    lock_table: Arc<LockTable>,
    recovery: Arc<RecoveryManager>,
}

impl Db {
    pub fn open(config: &DbConfig) -> Result<Self> {
        tracing::info!(data_dir = %config.data_dir, "opening database");
        let file_mgr = FileManager::new(&config.data_dir, config.block_size)?;
        let log_mgr = LogManager::new(file_mgr.clone(), LOG_FILE_NAME)?;
        let buffer_pool = Arc::new(BufferPool::new(
            file_mgr,
            log_mgr.clone(),
            config.buffer_frames,
            config.buffer_timeout(),
        ));
        let lock_table = Arc::new(LockTable::new(config.lock_timeout()));
        let recovery = Arc::new(RecoveryManager::new(log_mgr, buffer_pool.clone()));

        recovery.recover()?;
        tracing::info!("recovery complete");

        Ok(Self {
            buffer_pool,
            lock_table,
            recovery,
        })
    }

    /// Starts a new transaction. Every block it touches is locked and pinned
    /// until `commit`/`rollback` releases them.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        Transaction::new(
            self.buffer_pool.clone(),
            self.lock_table.clone(),
            self.recovery.clone(),
        )
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}
