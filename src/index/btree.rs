//! Disk-resident B+Tree (C7).
//!
//! Two files back one index: `<name>_leaf.idx` holds leaf pages, one chained
//! overflow block per run of duplicate minimum keys; `<name>_dir.idx` holds
//! directory pages, with the root always pinned at block 0 so the tree never
//! needs to tell callers where it lives. Splits propagate upward along the
//! search path collected on the way down; when the root itself would split,
//! its content is pushed into a fresh block and the root becomes a new,
//! one-level-taller two-entry page — the tree only ever grows from the top.

use crate::common::{BlockId, Rid};
use crate::error::{DbError, Result};
use crate::index::btree_page::{dir_schema, leaf_schema, min_key, BTPage, Key, NO_OVERFLOW};
use crate::record::layout::Layout;
use crate::record::schema::FieldType;
use crate::transaction::Transaction;

pub struct BTreeIndex<'a> {
    tx: &'a mut Transaction,
    dir_file: String,
    leaf_file: String,
    dir_layout: Layout,
    leaf_layout: Layout,
    leaf_block: Option<BlockId>,
    current_slot: i32,
    search_key: Option<Key>,
}

impl<'a> BTreeIndex<'a> {
    pub fn new(tx: &'a mut Transaction, idx_name: &str, key_type: FieldType) -> Result<Self> {
        let leaf_file = format!("{idx_name}_leaf.idx");
        let dir_file = format!("{idx_name}_dir.idx");
        let leaf_layout = Layout::new(leaf_schema(key_type));
        let dir_layout = Layout::new(dir_schema(key_type));

        if tx.size(&leaf_file)? == 0 {
            let block = tx.append(&leaf_file)?;
            tx.pin(&block)?;
            BTPage::format(tx, &block, &leaf_layout, NO_OVERFLOW)?;
            tx.unpin(&block);
        }
        if tx.size(&dir_file)? == 0 {
            let root = tx.append(&dir_file)?;
            debug_assert_eq!(root.block_num, 0, "the directory root must be block 0");
            tx.pin(&root)?;
            BTPage::format(tx, &root, &dir_layout, 0)?;
            let mut page = BTPage::new(tx, root.clone(), dir_layout.clone());
            page.insert_dir(0, &min_key(key_type), 0)?;
            tx.unpin(&root);
        }

        Ok(Self {
            tx,
            dir_file,
            leaf_file,
            dir_layout,
            leaf_layout,
            leaf_block: None,
            current_slot: -1,
            search_key: None,
        })
    }

    fn root_block(&self) -> BlockId {
        BlockId::new(self.dir_file.clone(), 0)
    }

    /// Top-down directory descent, collecting `(block_num, level)` for every
    /// directory page visited, so an eventual leaf split can propagate back
    /// up without re-searching.
    fn search_path(&mut self, key: &Key) -> Result<(Vec<(u64, i32)>, BlockId)> {
        let mut path = Vec::new();
        let mut block = self.root_block();
        loop {
            self.tx.pin(&block)?;
            let mut page = BTPage::new(self.tx, block.clone(), self.dir_layout.clone());
            let level = page.flag()?;
            let num = page.num_slots()?;
            let mut slot = page.find_slot_before(key)?.max(0);
            // An exact key match routes to the record's own child rather than
            // its left neighbor, so duplicates descend consistently.
            if slot + 1 < num && page.dataval(slot + 1)? == *key {
                slot += 1;
            }
            let child = page.child_block(slot)?;
            path.push((block.block_num, level));
            self.tx.unpin(&block);
            if level == 0 {
                return Ok((path, BlockId::new(self.leaf_file.clone(), child)));
            }
            block = BlockId::new(self.dir_file.clone(), child);
        }
    }

    pub fn before_first(&mut self, key: &Key) -> Result<()> {
        self.close();
        self.search_key = Some(key.clone());
        let (_, leaf_block) = self.search_path(key)?;
        self.tx.pin(&leaf_block)?;
        let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
        self.current_slot = leaf.find_slot_before(key)?;
        self.leaf_block = Some(leaf_block);
        Ok(())
    }

    pub fn next(&mut self) -> Result<bool> {
        let search_key = self
            .search_key
            .clone()
            .expect("next() requires before_first() first");
        loop {
            self.current_slot += 1;
            let leaf_block = self
                .leaf_block
                .clone()
                .expect("next() requires before_first() first");
            let num = {
                let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
                leaf.num_slots()?
            };
            if self.current_slot >= num {
                let overflow = {
                    let mut leaf =
                        BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
                    leaf.flag()?
                };
                if overflow < 0 {
                    return Ok(false);
                }
                self.tx.unpin(&leaf_block);
                let next_block = BlockId::new(self.leaf_file.clone(), overflow as u64);
                self.tx.pin(&next_block)?;
                self.leaf_block = Some(next_block);
                self.current_slot = -1;
                continue;
            }
            let value = {
                let mut leaf = BTPage::new(self.tx, leaf_block, self.leaf_layout.clone());
                leaf.dataval(self.current_slot)?
            };
            if value == search_key {
                return Ok(true);
            } else if value > search_key {
                return Ok(false);
            }
        }
    }

    pub fn data_rid(&mut self) -> Result<Rid> {
        let leaf_block = self
            .leaf_block
            .clone()
            .expect("data_rid() requires a positioned cursor");
        let mut leaf = BTPage::new(self.tx, leaf_block, self.leaf_layout.clone());
        leaf.data_rid(self.current_slot)
    }

    pub fn close(&mut self) {
        if let Some(block) = self.leaf_block.take() {
            self.tx.unpin(&block);
        }
        self.current_slot = -1;
    }

    /// Inserts `(key, rid)`, splitting and/or chaining an overflow block as
    /// needed, propagating any resulting directory split up to the root.
    pub fn insert(&mut self, key: &Key, rid: Rid) -> Result<()> {
        let (path, leaf_block) = self.search_path(key)?;
        self.tx.pin(&leaf_block)?;

        let (flag, first_key) = {
            let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
            let flag = leaf.flag()?;
            let first_key = if leaf.num_slots()? > 0 {
                Some(leaf.dataval(0)?)
            } else {
                None
            };
            (flag, first_key)
        };
        let belongs_before_overflowing_first =
            flag != NO_OVERFLOW && first_key.is_some_and(|first| *key < first);

        let propagate = if belongs_before_overflowing_first {
            Some(self.overflow_before_first(leaf_block.clone(), key, rid)?)
        } else {
            let (slot, is_full, all_duplicates) = {
                let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
                let slot = leaf.find_slot_before(key)? + 1;
                let is_full = leaf.is_full()?;
                let all_duplicates = is_full && leaf.num_slots()? > 0 && leaf.dataval(0)? == *key;
                (slot, is_full, all_duplicates)
            };

            if !is_full {
                let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
                leaf.insert_leaf(slot, key, rid)?;
                None
            } else if all_duplicates {
                self.overflow_leaf(leaf_block.clone(), key, rid)?;
                None
            } else {
                Some(self.split_leaf(leaf_block.clone(), slot, key, rid)?)
            }
        };
        self.tx.unpin(&leaf_block);

        if let Some((split_key, split_block)) = propagate {
            self.propagate_split(path, split_key, split_block)?;
        }
        Ok(())
    }

    /// The insert key belongs before an already-overflowing leaf's first key:
    /// move the leaf's entire current content (including its overflow chain,
    /// whose block number stays `flag`) into a new block, then clear the
    /// surviving leaf's flag and give it just the new record at slot 0.
    fn overflow_before_first(
        &mut self,
        leaf_block: BlockId,
        key: &Key,
        rid: Rid,
    ) -> Result<(Key, u64)> {
        let (old_first, new_block) = {
            let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
            let old_first = leaf.dataval(0)?;
            let old_flag = leaf.flag()?;
            let new_block = leaf.split(0, old_flag)?;
            (old_first, new_block)
        };
        {
            let mut leaf = BTPage::new(self.tx, leaf_block, self.leaf_layout.clone());
            leaf.set_flag(NO_OVERFLOW)?;
            leaf.insert_leaf(0, key, rid)?;
        }
        self.tx.unpin(&new_block);
        Ok((old_first, new_block.block_num))
    }

    /// The leaf is entirely duplicates of `key` and has no room: chain a new
    /// overflow block and move the whole run into it.
    fn overflow_leaf(&mut self, leaf_block: BlockId, key: &Key, rid: Rid) -> Result<()> {
        let (num, old_flag) = {
            let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
            (leaf.num_slots()?, leaf.flag()?)
        };

        // Chained by `flag`, not by position: a leaf that overflows more than
        // once appends a fresh block wherever the file currently ends, and
        // `next()` follows the flag value directly, so there is no adjacency
        // requirement to maintain here.
        let new_block = self.tx.append(&self.leaf_file)?;
        self.tx.pin(&new_block)?;
        BTPage::format(self.tx, &new_block, &self.leaf_layout, old_flag)?;

        for i in 0..num {
            let r = {
                let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
                leaf.data_rid(i)?
            };
            let mut overflow = BTPage::new(self.tx, new_block.clone(), self.leaf_layout.clone());
            overflow.insert_leaf(i, key, r)?;
        }

        let mut leaf = BTPage::new(self.tx, leaf_block, self.leaf_layout.clone());
        leaf.truncate(0)?;
        leaf.set_flag(new_block.block_num as i32)?;
        leaf.insert_leaf(0, key, rid)?;
        self.tx.unpin(&new_block);
        Ok(())
    }

    /// The leaf is full of non-duplicate keys: split it and insert the new
    /// record on whichever half it belongs to. Returns the directory entry
    /// the caller must propagate upward.
    fn split_leaf(
        &mut self,
        leaf_block: BlockId,
        slot: i32,
        key: &Key,
        rid: Rid,
    ) -> Result<(Key, u64)> {
        let new_block = {
            let mut leaf = BTPage::new(self.tx, leaf_block.clone(), self.leaf_layout.clone());
            let desired = leaf.num_slots()? / 2;
            let split_pos = leaf.split_boundary(desired)?;
            leaf.split(split_pos, NO_OVERFLOW)?
        };
        let new_first = {
            let mut new_page = BTPage::new(self.tx, new_block.clone(), self.leaf_layout.clone());
            new_page.dataval(0)?
        };

        if *key < new_first {
            let mut leaf = BTPage::new(self.tx, leaf_block, self.leaf_layout.clone());
            leaf.insert_leaf(slot, key, rid)?;
        } else {
            let mut new_page = BTPage::new(self.tx, new_block.clone(), self.leaf_layout.clone());
            let s = new_page.find_slot_before(key)? + 1;
            new_page.insert_leaf(s, key, rid)?;
        }
        self.tx.unpin(&new_block);
        Ok((new_first, new_block.block_num))
    }

    /// Inserts `(split_key, split_block)` into the directory page identified
    /// by the last entry of `path`, splitting (and recursing up `path`) as
    /// needed; grows a new root if the propagation outlives the path.
    fn propagate_split(
        &mut self,
        path: Vec<(u64, i32)>,
        mut split_key: Key,
        mut split_block: u64,
    ) -> Result<()> {
        for (block_num, level) in path.into_iter().rev() {
            let block = BlockId::new(self.dir_file.clone(), block_num);
            self.tx.pin(&block)?;

            let (slot, is_full) = {
                let mut page = BTPage::new(self.tx, block.clone(), self.dir_layout.clone());
                let slot = page.find_slot_before(&split_key)? + 1;
                (slot, page.is_full()?)
            };

            let resolved = if !is_full {
                let mut page = BTPage::new(self.tx, block.clone(), self.dir_layout.clone());
                page.insert_dir(slot, &split_key, split_block)?;
                true
            } else {
                let new_block = {
                    let mut page = BTPage::new(self.tx, block.clone(), self.dir_layout.clone());
                    let desired = page.num_slots()? / 2;
                    let split_pos = page.split_boundary(desired)?;
                    page.split(split_pos, level)?
                };
                let new_first = {
                    let mut new_page = BTPage::new(self.tx, new_block.clone(), self.dir_layout.clone());
                    new_page.dataval(0)?
                };
                if split_key < new_first {
                    let mut page = BTPage::new(self.tx, block.clone(), self.dir_layout.clone());
                    page.insert_dir(slot, &split_key, split_block)?;
                } else {
                    let mut new_page =
                        BTPage::new(self.tx, new_block.clone(), self.dir_layout.clone());
                    let s = new_page.find_slot_before(&split_key)? + 1;
                    new_page.insert_dir(s, &split_key, split_block)?;
                }
                self.tx.unpin(&new_block);
                split_key = new_first;
                split_block = new_block.block_num;
                false
            };
            self.tx.unpin(&block);
            if resolved {
                return Ok(());
            }
        }
        self.grow_root(split_key, split_block)
    }

    /// The root itself split: move its content into a fresh block and turn
    /// the root into a new two-entry page one level taller.
    fn grow_root(&mut self, split_key: Key, split_block: u64) -> Result<()> {
        let root = self.root_block();
        self.tx.pin(&root)?;
        let old_level = {
            let mut page = BTPage::new(self.tx, root.clone(), self.dir_layout.clone());
            page.flag()?
        };
        let moved_block = {
            let mut page = BTPage::new(self.tx, root.clone(), self.dir_layout.clone());
            page.split(0, old_level)?
        };

        let key_type = match self
            .dir_layout
            .schema()
            .field_type("dataval")
            .expect("a BTree directory layout always defines \"dataval\"")
        {
            FieldType::VarlenText { .. } | FieldType::Name => FieldType::VarlenText { max_len: 0 },
            other => other,
        };
        let mut page = BTPage::new(self.tx, root.clone(), self.dir_layout.clone());
        page.set_flag(old_level + 1)?;
        page.insert_dir(0, &min_key(key_type), moved_block.block_num)?;
        page.insert_dir(1, &split_key, split_block)?;
        self.tx.unpin(&moved_block);
        self.tx.unpin(&root);
        Ok(())
    }

    /// Removes the `(key, rid)` entry, if present.
    pub fn delete(&mut self, key: &Key, rid: Rid) -> Result<()> {
        self.before_first(key)?;
        while self.next()? {
            if self.data_rid()? == rid {
                let leaf_block = self.leaf_block.clone().unwrap();
                let mut leaf = BTPage::new(self.tx, leaf_block, self.leaf_layout.clone());
                leaf.delete_slot(self.current_slot)?;
                self.close();
                return Ok(());
            }
        }
        self.close();
        Err(DbError::NotFound(format!(
            "index entry for rid {rid} not found"
        )))
    }
}

impl Drop for BTreeIndex<'_> {
    fn drop(&mut self) {
        self.close();
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

    #[test]
    fn insert_and_find_single_key() {
        let (_dir, mut tx) = harness();
        let mut idx = BTreeIndex::new(&mut tx, "people", FieldType::Int).unwrap();
        idx.insert(&Key::Int(5), Rid::new(0, 0)).unwrap();
        idx.before_first(&Key::Int(5)).unwrap();
        assert!(idx.next().unwrap());
        assert_eq!(idx.data_rid().unwrap(), Rid::new(0, 0));
        assert!(!idx.next().unwrap());
    }

    #[test]
    fn insert_many_keys_triggers_splits_and_all_are_findable() {
        let (_dir, mut tx) = harness();
        let mut idx = BTreeIndex::new(&mut tx, "people", FieldType::Int).unwrap();
        for i in 0..200i64 {
            idx.insert(&Key::Int(i), Rid::new(i as u64, 0)).unwrap();
        }
        for i in 0..200i64 {
            idx.before_first(&Key::Int(i)).unwrap();
            assert!(idx.next().unwrap(), "missing key {i}");
            assert_eq!(idx.data_rid().unwrap(), Rid::new(i as u64, 0));
        }
    }

    #[test]
    fn duplicate_keys_chain_into_overflow_blocks() {
        let (_dir, mut tx) = harness();
        let mut idx = BTreeIndex::new(&mut tx, "people", FieldType::Int).unwrap();
        for i in 0..60u64 {
            idx.insert(&Key::Int(1), Rid::new(i, 0)).unwrap();
        }
        idx.before_first(&Key::Int(1)).unwrap();
        let mut count = 0;
        while idx.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 60);
    }

    #[test]
    fn insert_smaller_than_overflowing_leafs_first_key_preserves_both_runs() {
        let (_dir, mut tx) = harness();
        let mut idx = BTreeIndex::new(&mut tx, "people", FieldType::Int).unwrap();
        for i in 0..60u64 {
            idx.insert(&Key::Int(10), Rid::new(i, 0)).unwrap();
        }
        // The leaf for key 10 now overflows. A key smaller than 10 must land
        // in front of it without disturbing the run of 10s.
        idx.insert(&Key::Int(3), Rid::new(999, 0)).unwrap();

        idx.before_first(&Key::Int(3)).unwrap();
        assert!(idx.next().unwrap());
        assert_eq!(idx.data_rid().unwrap(), Rid::new(999, 0));
        assert!(!idx.next().unwrap());

        idx.before_first(&Key::Int(10)).unwrap();
        let mut count = 0;
        while idx.next().unwrap() {
            count += 1;
        }
        assert_eq!(count, 60);
    }

    #[test]
    fn delete_removes_exactly_one_matching_entry() {
        let (_dir, mut tx) = harness();
        let mut idx = BTreeIndex::new(&mut tx, "people", FieldType::Int).unwrap();
        idx.insert(&Key::Int(1), Rid::new(0, 0)).unwrap();
        idx.insert(&Key::Int(1), Rid::new(1, 0)).unwrap();
        idx.delete(&Key::Int(1), Rid::new(0, 0)).unwrap();

        idx.before_first(&Key::Int(1)).unwrap();
        assert!(idx.next().unwrap());
        assert_eq!(idx.data_rid().unwrap(), Rid::new(1, 0));
        assert!(!idx.next().unwrap());
    }
}
