//! B+Tree page format (C7): directory and leaf pages share the slotted-page
//! machinery from [`crate::record::slotted_page`], adding typed key access
//! and the split operation both page kinds need.
//!
//! A directory page's `flag` is its level (0 = points at leaf pages, N =
//! points at level-(N-1) directory pages). A leaf page's `flag` is the block
//! number of its overflow chain for duplicates of the page's first key, or
//! `-1` if it has none.

use crate::common::{BlockId, Rid};
use crate::error::Result;
use crate::record::layout::Layout;
use crate::record::schema::{FieldType, Schema};
use crate::record::slotted_page::{slot_byte_offset, slot_byte_size, SlottedPage};
use crate::transaction::Transaction;
use std::cmp::Ordering;

pub const NO_OVERFLOW: i32 = -1;

/// An index key. Index trees are built over exactly one of these shapes —
/// comparing `Int` against `Str` never happens in practice, but `Ord` needs
/// a total order, so variant tag breaks ties first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Int(a), Key::Int(b)) => a.cmp(b),
            (Key::Str(a), Key::Str(b)) => a.cmp(b),
            (Key::Int(_), Key::Str(_)) => Ordering::Less,
            (Key::Str(_), Key::Int(_)) => Ordering::Greater,
        }
    }
}

/// The smallest possible key of `key_type` — used as the phantom first entry
/// of a freshly created root, which must always have at least one entry
/// covering "everything less than the first real key".
pub fn min_key(key_type: FieldType) -> Key {
    match key_type {
        FieldType::VarlenText { .. } | FieldType::Name => Key::Str(String::new()),
        _ => Key::Int(i64::MIN),
    }
}

/// Builds the schema for a directory page over keys of `key_type`.
pub fn dir_schema(key_type: FieldType) -> Schema {
    let mut schema = Schema::new();
    schema.add_field("dataval", key_type);
    schema.add_long("block");
    schema
}

/// Builds the schema for a leaf page over keys of `key_type`.
pub fn leaf_schema(key_type: FieldType) -> Schema {
    let mut schema = Schema::new();
    schema.add_field("dataval", key_type);
    schema.add_long("block");
    schema.add_int("id");
    schema
}

pub struct BTPage<'a> {
    tx: &'a mut Transaction,
    block: BlockId,
    layout: Layout,
}

impl<'a> BTPage<'a> {
    pub fn new(tx: &'a mut Transaction, block: BlockId, layout: Layout) -> Self {
        Self { tx, block, layout }
    }

    pub fn format(tx: &mut Transaction, block: &BlockId, layout: &Layout, flag: i32) -> Result<()> {
        SlottedPage::format(tx, block)?;
        let mut page = SlottedPage::new(tx, block.clone(), layout.clone());
        page.set_flag(flag)
    }

    fn page(&mut self) -> SlottedPage<'_> {
        SlottedPage::new(self.tx, self.block.clone(), self.layout.clone())
    }

    pub fn block(&self) -> &BlockId {
        &self.block
    }

    pub fn flag(&mut self) -> Result<i32> {
        self.page().flag()
    }

    pub fn set_flag(&mut self, value: i32) -> Result<()> {
        self.page().set_flag(value)
    }

    pub fn num_slots(&mut self) -> Result<i32> {
        self.page().num_slots()
    }

    fn is_string_key(&self) -> bool {
        matches!(
            self.layout
                .schema()
                .field_type("dataval")
                .expect("a BTPage layout always defines \"dataval\""),
            FieldType::VarlenText { .. } | FieldType::Name
        )
    }

    pub fn dataval(&mut self, slot: i32) -> Result<Key> {
        if self.is_string_key() {
            Ok(Key::Str(self.page().get_string(slot, "dataval")?))
        } else {
            Ok(Key::Int(self.page().get_i64(slot, "dataval")?))
        }
    }

    pub fn set_dataval(&mut self, slot: i32, key: &Key) -> Result<()> {
        match key {
            Key::Int(v) => self.page().set_i64(slot, "dataval", *v),
            Key::Str(s) => self.page().set_string(slot, "dataval", s),
        }
    }

    pub fn child_block(&mut self, slot: i32) -> Result<u64> {
        Ok(self.page().get_i64(slot, "block")? as u64)
    }

    pub fn set_child_block(&mut self, slot: i32, block_num: u64) -> Result<()> {
        self.page().set_i64(slot, "block", block_num as i64)
    }

    pub fn data_rid(&mut self, slot: i32) -> Result<Rid> {
        let block_num = self.page().get_i64(slot, "block")? as u64;
        let slot_num = self.page().get_i32(slot, "id")? as u32;
        Ok(Rid::new(block_num, slot_num))
    }

    pub fn set_data_rid(&mut self, slot: i32, rid: Rid) -> Result<()> {
        self.page().set_i64(slot, "block", rid.block_num as i64)?;
        self.page().set_i32(slot, "id", rid.slot as i32)
    }

    /// Index of the last slot whose key is strictly less than `key`, or `-1`
    /// if every key is `>= key`. Directory descent follows this slot's child.
    ///
    /// Binary search over the page's ascending key order: `lo` converges on
    /// the first slot whose key is `>= key`, so `lo - 1` is the last one
    /// strictly less.
    pub fn find_slot_before(&mut self, key: &Key) -> Result<i32> {
        let num = self.num_slots()?;
        let mut lo = 0i32;
        let mut hi = num;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.dataval(mid)? < *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo - 1)
    }

    /// Adjusts a candidate split position so it falls on a boundary between
    /// unequal keys — duplicates must travel together, never straddling a
    /// split. Scans outward from `desired`, forward first, then backward.
    pub fn split_boundary(&mut self, desired: i32) -> Result<i32> {
        let num = self.num_slots()?;
        if num <= 1 {
            return Ok(desired);
        }
        let desired = desired.clamp(1, num - 1);
        let mut forward = desired;
        while forward < num {
            if self.dataval(forward)? != self.dataval(forward - 1)? {
                return Ok(forward);
            }
            forward += 1;
        }
        let mut backward = desired;
        while backward > 1 {
            if self.dataval(backward)? != self.dataval(backward - 1)? {
                return Ok(backward);
            }
            backward -= 1;
        }
        Ok(desired)
    }

    pub fn is_full(&mut self) -> Result<bool> {
        let capacity =
            SlottedPage::records_fit(self.tx.block_size(), self.page().slot_size());
        Ok(self.num_slots()? >= capacity)
    }

    pub fn insert_dir(&mut self, slot: i32, key: &Key, child_block: u64) -> Result<()> {
        self.page().insert_slot_at(slot)?;
        self.set_dataval(slot, key)?;
        self.set_child_block(slot, child_block)
    }

    pub fn insert_leaf(&mut self, slot: i32, key: &Key, rid: Rid) -> Result<()> {
        self.page().insert_slot_at(slot)?;
        self.set_dataval(slot, key)?;
        self.set_data_rid(slot, rid)
    }

    pub fn delete_slot(&mut self, slot: i32) -> Result<()> {
        self.page().remove_slot_at(slot)
    }

    /// Sets this page's slot count directly, discarding anything beyond it.
    /// Used to shrink a leaf to zero entries when its whole contents move
    /// into a freshly chained overflow block.
    pub fn truncate(&mut self, num_slots: i32) -> Result<()> {
        self.page().truncate(num_slots)
    }

    /// Splits this page at `split_pos`: everything from `split_pos` onward
    /// moves to a freshly allocated sibling block tagged with `new_flag`,
    /// returning that sibling's block id. Caller keeps the lower half here.
    ///
    /// Copies slot bytes directly through `self.tx` rather than holding two
    /// live [`BTPage`]s at once — both would need `&mut self.tx`
    /// simultaneously, which the borrow checker won't allow since a page
    /// owns its transaction borrow rather than sharing it.
    pub fn split(&mut self, split_pos: i32, new_flag: i32) -> Result<BlockId> {
        let file_name = self.block.file_name.clone();
        let new_block = self.tx.append(&file_name)?;
        self.tx.pin(&new_block)?;
        Self::format(self.tx, &new_block, &self.layout, new_flag)?;

        let num = self.num_slots()?;
        let slot_size = slot_byte_size(&self.layout);
        let mut dest_slot = 0i32;
        for src_slot in split_pos..num {
            let src_off = slot_byte_offset(src_slot, &self.layout);
            let dst_off = slot_byte_offset(dest_slot, &self.layout);
            let bytes = self.tx.get_raw(&self.block, src_off, slot_size)?;
            self.tx.copy_raw(&new_block, dst_off, &bytes, true)?;
            dest_slot += 1;
        }
        {
            let mut dest = SlottedPage::new(self.tx, new_block.clone(), self.layout.clone());
            dest.truncate(dest_slot)?;
        }
        self.truncate(split_pos)?;
        Ok(new_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::log::LogManager;
    use crate::storage::FileManager;
    use crate::transaction::{LockTable, RecoveryManager};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn key_ordering_is_total_and_numeric() {
        assert!(Key::Int(1) < Key::Int(2));
        assert!(Key::Str("a".into()) < Key::Str("b".into()));
    }

    fn harness() -> (tempfile::TempDir, Transaction) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), 400).unwrap();
        let lm = LogManager::new(fm.clone(), "test.log").unwrap();
        let pool = Arc::new(BufferPool::new(fm, lm.clone(), 16, Duration::from_millis(500)));
        let locks = Arc::new(LockTable::new(Duration::from_millis(500)));
        let recovery = Arc::new(RecoveryManager::new(lm, pool.clone()));
        let tx = Transaction::new(pool, locks, recovery).unwrap();
        (dir, tx)
    }

    /// Property 4: binary search and linear scan agree on `find_slot_before`.
    #[test]
    fn find_slot_before_matches_a_linear_scan() {
        let (_dir, mut tx) = harness();
        let layout = Layout::new(leaf_schema(FieldType::Int));
        let block = tx.append("scan_test.idx").unwrap();
        tx.pin(&block).unwrap();
        BTPage::format(&mut tx, &block, &layout, NO_OVERFLOW).unwrap();

        let keys = [1i64, 1, 3, 5, 5, 5, 9];
        {
            let mut page = BTPage::new(&mut tx, block.clone(), layout.clone());
            for (i, k) in keys.iter().enumerate() {
                page.insert_leaf(i as i32, &Key::Int(*k), Rid::new(0, 0))
                    .unwrap();
            }
        }

        for probe in [0i64, 1, 2, 3, 4, 5, 6, 9, 10] {
            let linear = keys.iter().filter(|k| **k < probe).count() as i32 - 1;
            let mut page = BTPage::new(&mut tx, block.clone(), layout.clone());
            let binary = page.find_slot_before(&Key::Int(probe)).unwrap();
            assert_eq!(binary, linear, "probe {probe}");
        }
    }

    #[test]
    fn split_boundary_never_separates_equal_keys() {
        let (_dir, mut tx) = harness();
        let layout = Layout::new(leaf_schema(FieldType::Int));
        let block = tx.append("split_test.idx").unwrap();
        tx.pin(&block).unwrap();
        BTPage::format(&mut tx, &block, &layout, NO_OVERFLOW).unwrap();

        // Midpoint (index 3) falls inside the run of 5s; the boundary must
        // move off it.
        let keys = [1i64, 2, 5, 5, 5, 5, 9];
        {
            let mut page = BTPage::new(&mut tx, block.clone(), layout.clone());
            for (i, k) in keys.iter().enumerate() {
                page.insert_leaf(i as i32, &Key::Int(*k), Rid::new(0, 0))
                    .unwrap();
            }
        }

        let mut page = BTPage::new(&mut tx, block, layout);
        let pos = page.split_boundary(keys.len() as i32 / 2).unwrap();
        assert_ne!(keys[pos as usize - 1], keys[pos as usize]);
    }
}
