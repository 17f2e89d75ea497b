//! In-memory page buffer with bit-exact fixed/variable-length encoding.
//!
//! A [`Page`] owns no block identity and no dirty/pin state — those live on
//! the buffer frame that wraps it (see [`crate::buffer`]). It is purely a
//! fixed-size byte array with typed accessors, mirroring the "small typed
//! buffer abstraction" called for instead of raw pointer arithmetic: callers
//! never see an unaligned read, they call `get_int`/`set_int` and friends.
//!
//! All multi-byte integers are little-endian. Variable-length values are
//! stored as a 4-byte little-endian length prefix followed by the raw bytes.

use crate::error::{DbError, Result};

/// Byte width of the length prefix written before every variable-length value.
pub const VARLEN_PREFIX_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    /// Allocates a new, zero-filled page of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    /// Wraps an existing byte buffer (e.g. just read from disk) as a page.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn check_bounds(&self, offset: usize, width: usize) -> Result<()> {
        if offset + width > self.data.len() {
            return Err(DbError::Internal(format!(
                "page access out of bounds: offset {offset}, width {width}, page size {}",
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&self, offset: usize) -> Result<u8> {
        self.check_bounds(offset, 1)?;
        Ok(self.data[offset])
    }

    pub fn set_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.check_bounds(offset, 1)?;
        self.data[offset] = value;
        Ok(())
    }

    pub fn get_i16(&self, offset: usize) -> Result<i16> {
        self.check_bounds(offset, 2)?;
        let bytes: [u8; 2] = self.data[offset..offset + 2].try_into().unwrap();
        Ok(i16::from_le_bytes(bytes))
    }

    pub fn set_i16(&mut self, offset: usize, value: i16) -> Result<()> {
        self.check_bounds(offset, 2)?;
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn get_i32(&self, offset: usize) -> Result<i32> {
        self.check_bounds(offset, 4)?;
        let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn set_i32(&mut self, offset: usize, value: i32) -> Result<()> {
        self.check_bounds(offset, 4)?;
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn get_i64(&self, offset: usize) -> Result<i64> {
        self.check_bounds(offset, 8)?;
        let bytes: [u8; 8] = self.data[offset..offset + 8].try_into().unwrap();
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn set_i64(&mut self, offset: usize, value: i64) -> Result<()> {
        self.check_bounds(offset, 8)?;
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a length-prefixed byte string starting at `offset`.
    pub fn get_bytes(&self, offset: usize) -> Result<Vec<u8>> {
        let len = self.get_i32(offset)? as usize;
        let start = offset + VARLEN_PREFIX_SIZE;
        self.check_bounds(start, len)?;
        Ok(self.data[start..start + len].to_vec())
    }

    /// Writes a length-prefixed byte string starting at `offset`.
    pub fn set_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.set_i32(offset, bytes.len() as i32)?;
        let start = offset + VARLEN_PREFIX_SIZE;
        self.check_bounds(start, bytes.len())?;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads a length-prefixed UTF-8 string starting at `offset`.
    pub fn get_string(&self, offset: usize) -> Result<String> {
        let bytes = self.get_bytes(offset)?;
        String::from_utf8(bytes).map_err(|e| DbError::Serialization(e.to_string()))
    }

    /// Writes a length-prefixed UTF-8 string starting at `offset`.
    pub fn set_string(&mut self, offset: usize, value: &str) -> Result<()> {
        self.set_bytes(offset, value.as_bytes())
    }

    /// Reads `len` raw bytes with no length prefix, for callers that manage
    /// their own framing (e.g. slotted-page compaction, log record undo).
    pub fn get_raw(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, len)?;
        Ok(self.data[offset..offset + len].to_vec())
    }

    /// Writes raw bytes with no length prefix at `offset`.
    pub fn set_raw(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_bounds(offset, bytes.len())?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Total bytes a variable-length value of `data_len` bytes occupies on page,
    /// including its length prefix. Used by layout computation.
    pub fn max_length_for_bytes(data_len: usize) -> usize {
        VARLEN_PREFIX_SIZE + data_len
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_fixed_width_integers() {
        let mut page = Page::new(64);
        page.set_u8(0, 7).unwrap();
        page.set_i16(1, -300).unwrap();
        page.set_i32(4, 123_456).unwrap();
        page.set_i64(8, -9_000_000_000).unwrap();

        assert_eq!(page.get_u8(0).unwrap(), 7);
        assert_eq!(page.get_i16(1).unwrap(), -300);
        assert_eq!(page.get_i32(4).unwrap(), 123_456);
        assert_eq!(page.get_i64(8).unwrap(), -9_000_000_000);
    }

    #[test]
    fn round_trips_varlen_bytes_and_strings() {
        let mut page = Page::new(64);
        page.set_bytes(0, b"hello").unwrap();
        assert_eq!(page.get_bytes(0).unwrap(), b"hello");

        page.set_string(16, "one").unwrap();
        assert_eq!(page.get_string(16).unwrap(), "one");
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let page = Page::new(8);
        assert!(page.get_i64(4).is_err());
    }
}
