//! Heap-file table cursor (C8): walks a table's blocks as [`SlottedPage`]s,
//! presenting the familiar `before_first`/`next`/field-accessor/`insert`/
//! `delete` cursor shape used by both ad hoc scans and index-build passes.

use crate::common::{BlockId, Rid};
use crate::error::Result;
use crate::record::layout::Layout;
use crate::record::slotted_page::SlottedPage;
use crate::transaction::Transaction;

pub struct TableScan<'a> {
    tx: &'a mut Transaction,
    file_name: String,
    layout: Layout,
    current_block: u64,
    current_slot: i32,
}

impl<'a> TableScan<'a> {
    pub fn new(tx: &'a mut Transaction, file_name: impl Into<String>, layout: Layout) -> Result<Self> {
        let file_name = file_name.into();
        if tx.size(&file_name)? == 0 {
            let block = tx.append(&file_name)?;
            tx.pin(&block)?;
            SlottedPage::format(tx, &block)?;
            tx.unpin(&block);
        }
        let mut scan = Self {
            tx,
            file_name,
            layout,
            current_block: 0,
            current_slot: -1,
        };
        scan.move_to_block(0)?;
        Ok(scan)
    }

    fn block_id(&self) -> BlockId {
        BlockId::new(self.file_name.clone(), self.current_block)
    }

    pub fn before_first(&mut self) -> Result<()> {
        self.move_to_block(0)
    }

    fn move_to_block(&mut self, block_num: u64) -> Result<()> {
        let old = self.block_id();
        self.tx.unpin(&old);
        self.current_block = block_num;
        let block = self.block_id();
        self.tx.pin(&block)?;
        self.current_slot = -1;
        Ok(())
    }

    fn move_to_new_block(&mut self) -> Result<()> {
        let old = self.block_id();
        self.tx.unpin(&old);
        let block = self.tx.append(&self.file_name)?;
        self.tx.pin(&block)?;
        SlottedPage::format(self.tx, &block)?;
        self.current_block = block.block_num;
        self.current_slot = -1;
        Ok(())
    }

    fn at_last_block(&mut self) -> Result<bool> {
        Ok(self.current_block + 1 >= self.tx.size(&self.file_name)?)
    }

    pub fn next(&mut self) -> Result<bool> {
        loop {
            let block = self.block_id();
            let next_slot = {
                let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
                page.next_after(self.current_slot)?
            };
            match next_slot {
                Some(slot) => {
                    self.current_slot = slot;
                    return Ok(true);
                }
                None => {
                    if self.at_last_block()? {
                        return Ok(false);
                    }
                    self.move_to_block(self.current_block + 1)?;
                }
            }
        }
    }

    pub fn insert(&mut self) -> Result<()> {
        loop {
            let block = self.block_id();
            let new_slot = {
                let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
                page.insert_after(self.current_slot)?
            };
            match new_slot {
                Some(slot) => {
                    self.current_slot = slot;
                    return Ok(());
                }
                None => {
                    if self.at_last_block()? {
                        self.move_to_new_block()?;
                    } else {
                        self.move_to_block(self.current_block + 1)?;
                    }
                }
            }
        }
    }

    pub fn delete(&mut self) -> Result<()> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.delete(self.current_slot)
    }

    /// Deletes the current record and inserts a fresh one in its place,
    /// leaving the cursor positioned on the new slot. There is no separate
    /// record-size parameter to pass: every slot in this table already
    /// reserves its field's worst-case width, so the new record always fits
    /// wherever `insert` puts it.
    pub fn update(&mut self) -> Result<()> {
        self.delete()?;
        self.insert()
    }

    pub fn get_i32(&mut self, field: &str) -> Result<i32> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.get_i32(self.current_slot, field)
    }

    pub fn set_i32(&mut self, field: &str, value: i32) -> Result<()> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.set_i32(self.current_slot, field, value)
    }

    pub fn get_i64(&mut self, field: &str) -> Result<i64> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.get_i64(self.current_slot, field)
    }

    pub fn set_i64(&mut self, field: &str, value: i64) -> Result<()> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.set_i64(self.current_slot, field, value)
    }

    pub fn get_string(&mut self, field: &str) -> Result<String> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.get_string(self.current_slot, field)
    }

    pub fn set_string(&mut self, field: &str, value: &str) -> Result<()> {
        let block = self.block_id();
        let mut page = SlottedPage::new(self.tx, block, self.layout.clone());
        page.set_string(self.current_slot, field, value)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.layout.schema().has_field(field)
    }

    pub fn rid(&self) -> Rid {
        Rid::new(self.current_block, self.current_slot as u32)
    }

    pub fn move_to_rid(&mut self, rid: Rid) -> Result<()> {
        let old = self.block_id();
        self.tx.unpin(&old);
        self.current_block = rid.block_num;
        let block = self.block_id();
        self.tx.pin(&block)?;
        self.current_slot = rid.slot as i32;
        Ok(())
    }

    pub fn close(&mut self) {
        let block = self.block_id();
        self.tx.unpin(&block);
    }
}

impl Drop for TableScan<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Snapshot of a table's size, used by query planning. Non-authoritative —
/// `distinct_values_estimate` is a placeholder pending a real statistics
/// subsystem (out of scope here).
#[derive(Debug, Clone, Copy)]
pub struct TableStats {
    pub num_blocks: u64,
    pub num_records: u64,
    pub distinct_values_estimate: u64,
}

pub fn table_stats(tx: &mut Transaction, file_name: &str, layout: Layout) -> Result<TableStats> {
    let num_blocks = tx.size(file_name)?;
    let mut num_records = 0u64;
    {
        let mut scan = TableScan::new(tx, file_name, layout)?;
        while scan.next()? {
            num_records += 1;
        }
    }
    Ok(TableStats {
        num_blocks,
        num_records,
        distinct_values_estimate: num_records / 3,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::log::LogManager;
    use crate::record::schema::Schema;
    use crate::storage::FileManager;
    use crate::transaction::{LockTable, RecoveryManager};
    use std::sync::Arc;
    use std::time::Duration;

    fn harness() -> (tempfile::TempDir, Transaction) {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileManager::new(dir.path(), 400).unwrap();
        let lm = LogManager::new(fm.clone(), "test.log").unwrap();
        let pool = Arc::new(BufferPool::new(fm, lm.clone(), 8, Duration::from_millis(500)));
        let locks = Arc::new(LockTable::new(Duration::from_millis(500)));
        let recovery = Arc::new(RecoveryManager::new(lm, pool.clone()));
        let tx = Transaction::new(pool, locks, recovery).unwrap();
        (dir, tx)
    }

    fn layout() -> Layout {
        let mut schema = Schema::new();
        schema.add_int("id");
        schema.add_name("name");
        Layout::new(schema)
    }

    #[test]
    fn insert_and_scan_round_trips_across_many_blocks() {
        let (_dir, mut tx) = harness();
        {
            let mut scan = TableScan::new(&mut tx, "people.tbl", layout()).unwrap();
            for i in 0..50 {
                scan.insert().unwrap();
                scan.set_i32("id", i).unwrap();
                scan.set_string("name", &format!("name{i}")).unwrap();
            }
        }

        let mut scan = TableScan::new(&mut tx, "people.tbl", layout()).unwrap();
        let mut seen = 0;
        while scan.next().unwrap() {
            assert_eq!(scan.get_i32("id").unwrap(), seen);
            seen += 1;
        }
        assert_eq!(seen, 50);
    }

    #[test]
    fn delete_then_rescan_skips_tombstone() {
        let (_dir, mut tx) = harness();
        {
            let mut scan = TableScan::new(&mut tx, "t.tbl", layout()).unwrap();
            scan.insert().unwrap();
            scan.set_i32("id", 1).unwrap();
            scan.insert().unwrap();
            scan.set_i32("id", 2).unwrap();
        }
        {
            let mut scan = TableScan::new(&mut tx, "t.tbl", layout()).unwrap();
            scan.next().unwrap();
            scan.delete().unwrap();
        }
        let mut scan = TableScan::new(&mut tx, "t.tbl", layout()).unwrap();
        assert!(scan.next().unwrap());
        assert_eq!(scan.get_i32("id").unwrap(), 2);
        assert!(!scan.next().unwrap());
    }

    #[test]
    fn update_replaces_the_current_record_and_repositions_the_cursor() {
        let (_dir, mut tx) = harness();
        {
            let mut scan = TableScan::new(&mut tx, "t.tbl", layout()).unwrap();
            scan.insert().unwrap();
            scan.set_i32("id", 1).unwrap();
            scan.set_string("name", "alice").unwrap();
            scan.insert().unwrap();
            scan.set_i32("id", 2).unwrap();
            scan.set_string("name", "bob").unwrap();
        }
        {
            let mut scan = TableScan::new(&mut tx, "t.tbl", layout()).unwrap();
            scan.next().unwrap();
            scan.update().unwrap();
            scan.set_i32("id", 99).unwrap();
            scan.set_string("name", "carol").unwrap();
        }

        let mut scan = TableScan::new(&mut tx, "t.tbl", layout()).unwrap();
        let mut seen = Vec::new();
        while scan.next().unwrap() {
            seen.push((scan.get_i32("id").unwrap(), scan.get_string("name").unwrap()));
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![(2, "bob".to_string()), (99, "carol".to_string())]
        );
    }
}
