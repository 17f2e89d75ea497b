//! Paged file store (C1): fixed-size blocks on disk, one file per table or
//! index, addressed only by `(file_name, block_number)`.
//!
//! All operations serialize through a single mutex guarding a cache of open
//! file handles — concurrency above this layer comes entirely from the
//! buffer pool, which only calls down here on a page fault or a flush.

use crate::common::BlockId;
use crate::error::Result;
use crate::storage::page::Page;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Prefix reserved for temporary tables; any file starting with this is
/// reaped when the store opens, since a temp table cannot survive a restart.
pub const TEMP_FILE_PREFIX: &str = "temp";

/// Advisory marker naming the process holding `data_dir` open. Best-effort:
/// it does not prevent a second process from opening the same directory, it
/// only lets one notice and warn about it.
const LOCK_FILE_NAME: &str = "db.lock";

struct Inner {
    data_dir: PathBuf,
    open_files: HashMap<String, File>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = fs::remove_file(self.data_dir.join(LOCK_FILE_NAME));
    }
}

/// The paged file store. Cheap to clone — it's a handle around the shared,
/// mutex-protected file cache.
#[derive(Clone)]
pub struct FileManager {
    block_size: usize,
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl FileManager {
    /// Opens (creating if necessary) the data directory and reaps any
    /// leftover temp files from a previous, uncleanly-shut-down run.
    pub fn new(data_dir: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(TEMP_FILE_PREFIX) {
                    tracing::debug!(file = name, "reaping leftover temp file");
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        let lock_path = data_dir.join(LOCK_FILE_NAME);
        if lock_path.exists() {
            tracing::warn!(
                path = %lock_path.display(),
                "db.lock already present; a previous run may not have shut down cleanly"
            );
        }
        fs::write(&lock_path, std::process::id().to_string())?;

        Ok(Self {
            block_size,
            inner: std::sync::Arc::new(Mutex::new(Inner {
                data_dir,
                open_files: HashMap::new(),
            })),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently in `file_name`. Missing files have zero blocks.
    pub fn size(&self, file_name: &str) -> Result<u64> {
        let mut guard = self.inner.lock();
        let file = Self::open_file(&mut guard, file_name)?;
        let len = file.metadata()?.len();
        Ok(len / self.block_size as u64)
    }

    /// Reads `block` into `page`. Reading past EOF is not an error: the page
    /// keeps whatever it already held (the caller is expected to have zeroed
    /// it, or it's about to be overwritten wholesale).
    pub fn read(&self, block: &BlockId, page: &mut Page) -> Result<()> {
        let mut guard = self.inner.lock();
        let file = Self::open_file(&mut guard, &block.file_name)?;
        let offset = block.block_num * self.block_size as u64;
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let buf = page.as_bytes_mut();
        let to_read = (len - offset).min(buf.len() as u64) as usize;
        file.read_exact(&mut buf[..to_read])?;
        Ok(())
    }

    /// Writes `page` back to `block`'s position in its file.
    pub fn write(&self, block: &BlockId, page: &Page) -> Result<()> {
        let mut guard = self.inner.lock();
        let file = Self::open_file(&mut guard, &block.file_name)?;
        let offset = block.block_num * self.block_size as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(page.as_bytes())?;
        Ok(())
    }

    /// Extends `file_name` by exactly one block of zeros and returns its identity.
    pub fn append(&self, file_name: &str) -> Result<BlockId> {
        let mut guard = self.inner.lock();
        let new_block_num = {
            let file = Self::open_file(&mut guard, file_name)?;
            file.metadata()?.len() / self.block_size as u64
        };
        let block = BlockId::new(file_name, new_block_num);
        let zeros = vec![0u8; self.block_size];
        let file = Self::open_file(&mut guard, file_name)?;
        file.seek(SeekFrom::Start(block.block_num * self.block_size as u64))?;
        file.write_all(&zeros)?;
        Ok(block)
    }

    fn open_file<'a>(inner: &'a mut Inner, file_name: &str) -> Result<&'a mut File> {
        if !inner.open_files.contains_key(file_name) {
            let path = inner.data_dir.join(file_name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;
            inner.open_files.insert(file_name.to_string(), file);
        }
        Ok(inner.open_files.get_mut(file_name).unwrap())
    }
}
