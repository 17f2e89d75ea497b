//! Slotted page (C6): a dense array of fixed-width slots behind a small
//! header, shared by heap-file table records and B+Tree directory/leaf pages.
//!
//! Each slot begins with a 4-byte in-use flag, so deleting a record is a
//! single-word write (a tombstone) rather than an immediate physical shift.
//! Tombstones accumulate until [`SlottedPage::shift_slots_left`] is run as an
//! explicit compaction step, which is what keeps ordinary deletes cheap and
//! single-log-record.

use crate::common::BlockId;
use crate::error::Result;
use crate::record::layout::Layout;
use crate::transaction::Transaction;

const FLAG_OFFSET: usize = 0;
const NUM_SLOTS_OFFSET: usize = 4;
/// Bytes reserved for the page header (flag + slot count) before the slot array.
pub const HEADER_SIZE: usize = 8;

const SLOT_EMPTY: i32 = 0;
const SLOT_IN_USE: i32 = 1;

/// Bytes one slot occupies (flag word + field data), computable without a
/// live page — used by the B+Tree's cross-page split, which copies slot
/// bytes between two different blocks and so can't go through a single
/// [`SlottedPage`] instance.
pub fn slot_byte_size(layout: &Layout) -> usize {
    4 + layout.slot_size()
}

/// Byte offset of `slot` within a page using `layout`.
pub fn slot_byte_offset(slot: i32, layout: &Layout) -> usize {
    HEADER_SIZE + slot as usize * slot_byte_size(layout)
}

pub struct SlottedPage<'a> {
    tx: &'a mut Transaction,
    block: BlockId,
    layout: Layout,
}

impl<'a> SlottedPage<'a> {
    pub fn new(tx: &'a mut Transaction, block: BlockId, layout: Layout) -> Self {
        Self { tx, block, layout }
    }

    /// Initializes a freshly allocated block as an empty slotted page. Not
    /// logged: there is nothing meaningful to undo to on a block nobody has
    /// read yet.
    pub fn format(tx: &mut Transaction, block: &BlockId) -> Result<()> {
        tx.set_i32(block, FLAG_OFFSET, 0, false)?;
        tx.set_i32(block, NUM_SLOTS_OFFSET, 0, false)
    }

    pub fn block(&self) -> &BlockId {
        &self.block
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Worst-case capacity of a page of `block_size` bytes holding slots of
    /// `slot_size` bytes (flag word included).
    pub fn records_fit(block_size: usize, slot_size: usize) -> i32 {
        ((block_size - HEADER_SIZE) / slot_size) as i32
    }

    pub fn slot_size(&self) -> usize {
        4 + self.layout.slot_size()
    }

    fn slot_offset(&self, slot: i32) -> usize {
        HEADER_SIZE + slot as usize * self.slot_size()
    }

    fn field_offset(&self, slot: i32, field: &str) -> Result<usize> {
        Ok(self.slot_offset(slot) + 4 + self.layout.offset(field)?)
    }

    /// The page-level tag, meaning is owner-defined: unused (0) by heap
    /// tables, directory-vs-leaf by the B+Tree.
    pub fn flag(&mut self) -> Result<i32> {
        self.tx.get_i32(&self.block, FLAG_OFFSET)
    }

    pub fn set_flag(&mut self, value: i32) -> Result<()> {
        self.tx.set_i32(&self.block, FLAG_OFFSET, value, true)
    }

    pub fn num_slots(&mut self) -> Result<i32> {
        self.tx.get_i32(&self.block, NUM_SLOTS_OFFSET)
    }

    fn set_num_slots(&mut self, n: i32) -> Result<()> {
        self.tx.set_i32(&self.block, NUM_SLOTS_OFFSET, n, true)
    }

    pub fn is_deleted(&mut self, slot: i32) -> Result<bool> {
        let offset = self.slot_offset(slot);
        Ok(self.tx.get_i32(&self.block, offset)? == SLOT_EMPTY)
    }

    /// First in-use slot strictly after `slot`, or `None` if the page is
    /// exhausted. Passing `-1` starts the scan from the beginning.
    pub fn next_after(&mut self, slot: i32) -> Result<Option<i32>> {
        let num = self.num_slots()?;
        let mut s = slot + 1;
        while s < num {
            if !self.is_deleted(s)? {
                return Ok(Some(s));
            }
            s += 1;
        }
        Ok(None)
    }

    /// Finds the first empty slot after `slot` — reusing a tombstone if one
    /// exists, otherwise appending a fresh slot if the page has room.
    pub fn insert_after(&mut self, slot: i32) -> Result<Option<i32>> {
        let num = self.num_slots()?;
        let mut s = slot + 1;
        while s < num {
            if self.is_deleted(s)? {
                let offset = self.slot_offset(s);
                self.tx.set_i32(&self.block, offset, SLOT_IN_USE, true)?;
                return Ok(Some(s));
            }
            s += 1;
        }

        let capacity = Self::records_fit(self.tx.block_size(), self.slot_size());
        if num >= capacity {
            return Ok(None);
        }
        self.set_num_slots(num + 1)?;
        let offset = self.slot_offset(num);
        self.tx.set_i32(&self.block, offset, SLOT_IN_USE, true)?;
        Ok(Some(num))
    }

    pub fn delete(&mut self, slot: i32) -> Result<()> {
        let offset = self.slot_offset(slot);
        self.tx.set_i32(&self.block, offset, SLOT_EMPTY, true)
    }

    /// Drops the slot count to `new_num_slots`, discarding everything after
    /// it. Used by B+Tree leaf split to cut a page in half.
    pub fn truncate(&mut self, new_num_slots: i32) -> Result<()> {
        self.set_num_slots(new_num_slots)
    }

    /// Physically removes every tombstone at or after `from_slot` by
    /// shifting later in-use slots down to close the gaps. Run as an
    /// explicit maintenance step, not on every delete.
    pub fn shift_slots_left(&mut self, from_slot: i32) -> Result<()> {
        let num = self.num_slots()?;
        let slot_size = self.slot_size();
        let mut write = from_slot;
        let mut read = from_slot;
        while read < num {
            if !self.is_deleted(read)? {
                if write != read {
                    let src = self.slot_offset(read);
                    let dst = self.slot_offset(write);
                    let data = self.tx.get_raw(&self.block, src, slot_size)?;
                    self.tx.copy_raw(&self.block, dst, &data, true)?;
                }
                write += 1;
            }
            read += 1;
        }
        self.set_num_slots(write)
    }

    /// Opens a gap at `slot` by shifting every slot at or after it one
    /// position to the right, growing the slot count by one. Used by the
    /// B+Tree, which keeps its pages fully ordered rather than tombstoned.
    pub fn insert_slot_at(&mut self, slot: i32) -> Result<()> {
        let num = self.num_slots()?;
        let capacity = Self::records_fit(self.tx.block_size(), self.slot_size());
        if num >= capacity {
            return Err(crate::error::DbError::NoFreeSlot(self.slot_size()));
        }
        let slot_size = self.slot_size();
        for i in (slot..num).rev() {
            let src = self.slot_offset(i);
            let dst = self.slot_offset(i + 1);
            let data = self.tx.get_raw(&self.block, src, slot_size)?;
            self.tx.copy_raw(&self.block, dst, &data, true)?;
        }
        self.set_num_slots(num + 1)?;
        let offset = self.slot_offset(slot);
        self.tx.set_i32(&self.block, offset, SLOT_IN_USE, true)?;
        Ok(())
    }

    /// Closes the gap at `slot` by shifting every later slot one position to
    /// the left, shrinking the slot count by one.
    pub fn remove_slot_at(&mut self, slot: i32) -> Result<()> {
        let num = self.num_slots()?;
        let slot_size = self.slot_size();
        for i in slot..num - 1 {
            let src = self.slot_offset(i + 1);
            let dst = self.slot_offset(i);
            let data = self.tx.get_raw(&self.block, src, slot_size)?;
            self.tx.copy_raw(&self.block, dst, &data, true)?;
        }
        self.set_num_slots(num - 1)
    }

    pub fn get_i32(&mut self, slot: i32, field: &str) -> Result<i32> {
        let offset = self.field_offset(slot, field)?;
        self.tx.get_i32(&self.block, offset)
    }

    pub fn set_i32(&mut self, slot: i32, field: &str, value: i32) -> Result<()> {
        let offset = self.field_offset(slot, field)?;
        self.tx.set_i32(&self.block, offset, value, true)
    }

    pub fn get_i16(&mut self, slot: i32, field: &str) -> Result<i16> {
        let offset = self.field_offset(slot, field)?;
        self.tx.get_i16(&self.block, offset)
    }

    pub fn set_i16(&mut self, slot: i32, field: &str, value: i16) -> Result<()> {
        let offset = self.field_offset(slot, field)?;
        self.tx.set_i16(&self.block, offset, value, true)
    }

    pub fn get_u8(&mut self, slot: i32, field: &str) -> Result<u8> {
        let offset = self.field_offset(slot, field)?;
        self.tx.get_u8(&self.block, offset)
    }

    pub fn set_u8(&mut self, slot: i32, field: &str, value: u8) -> Result<()> {
        let offset = self.field_offset(slot, field)?;
        self.tx.set_u8(&self.block, offset, value, true)
    }

    pub fn get_i64(&mut self, slot: i32, field: &str) -> Result<i64> {
        let offset = self.field_offset(slot, field)?;
        self.tx.get_i64(&self.block, offset)
    }

    pub fn set_i64(&mut self, slot: i32, field: &str, value: i64) -> Result<()> {
        let offset = self.field_offset(slot, field)?;
        self.tx.set_i64(&self.block, offset, value, true)
    }

    pub fn get_string(&mut self, slot: i32, field: &str) -> Result<String> {
        let offset = self.field_offset(slot, field)?;
        self.tx.get_string(&self.block, offset)
    }

    pub fn set_string(&mut self, slot: i32, field: &str, value: &str) -> Result<()> {
        let offset = self.field_offset(slot, field)?;
        self.tx.set_string(&self.block, offset, value, true)
    }
}
