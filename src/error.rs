//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core returns `Result<T>`. There is one error
//! enum for the whole crate rather than one per module: callers at the
//! transaction boundary need to match on `LockTimeout` / `BufferExhausted` /
//! `NoFreeSlot` regardless of which subsystem raised them, since all three
//! carry the same policy (surface to the caller, who rolls back).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Could not acquire a shared or exclusive lock within the configured bound.
    #[error("lock timeout on block {0:?}")]
    LockTimeout(crate::common::BlockId),

    /// Every buffer frame was pinned and none could be freed within the wait bound.
    #[error("buffer pool exhausted")]
    BufferExhausted,

    /// A slotted page could not place a record even after compaction.
    #[error("no free slot for a record of {0} bytes")]
    NoFreeSlot(usize),

    /// The underlying log or data file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A log record or page was malformed on decode.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A field or table name did not resolve against the active schema.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation was asked to do something the data model forbids
    /// (e.g. a key that does not fit the tree's maximum key size).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Recovery or transaction bookkeeping found state it cannot reconcile.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::LockTimeout(b) => DbError::LockTimeout(b.clone()),
            DbError::BufferExhausted => DbError::BufferExhausted,
            DbError::NoFreeSlot(n) => DbError::NoFreeSlot(*n),
            DbError::Io(e) => DbError::Serialization(format!("io error: {e}")),
            DbError::Serialization(s) => DbError::Serialization(s.clone()),
            DbError::NotFound(s) => DbError::NotFound(s.clone()),
            DbError::InvalidArgument(s) => DbError::InvalidArgument(s.clone()),
            DbError::Internal(s) => DbError::Internal(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
