//! Shared identifiers used across every layer of the core.

use std::fmt;

/// A process-wide monotonically increasing transaction identifier.
pub type TransactionId = i64;

/// A log sequence number: monotonically increasing, assigned on append.
pub type Lsn = i64;

/// An LSN value meaning "nothing has been logged yet".
pub const NO_LSN: Lsn = -1;

/// Identifies one fixed-size block within a named file.
///
/// Equality and hashing are by `(file_name, block_num)`, matching the data
/// model's definition of a block as a position within a file, not a handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub file_name: String,
    pub block_num: u64,
}

impl BlockId {
    pub fn new(file_name: impl Into<String>, block_num: u64) -> Self {
        Self {
            file_name: file_name.into(),
            block_num,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[file {}, block {}]", self.file_name, self.block_num)
    }
}

/// Names one record inside a heap file: the block it lives in and its slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub block_num: u64,
    pub slot: u32,
}

impl Rid {
    pub fn new(block_num: u64, slot: u32) -> Self {
        Self { block_num, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[block {}, slot {}]", self.block_num, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_equality_is_by_value() {
        let a = BlockId::new("t.tbl", 3);
        let b = BlockId::new("t.tbl", 3);
        let c = BlockId::new("t.tbl", 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
