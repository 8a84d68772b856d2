//! Keyed B-tree over fixed-size pages (§4.6): leaf/internal nodes with overflow-free
//! variable-length cells, byte-size-based splitting, underflow borrow/merge, forward
//! cursors, and bulk loading. Used both for table storage (keyed by rowid) and for indexes
//! (keyed by a hashed/derived key) through the same module.

mod bulk;
mod cursor;
mod delete;
mod insert;
mod node;

pub use cursor::Cursor;
pub use node::{KIND_INTERNAL, KIND_LEAF};

use crate::pager::Pager;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("a single cell does not fit on an empty page even after overflow normalization")]
    LeafOverflow,
    #[error(transparent)]
    Pager(#[from] crate::pager::Error),
    #[error(transparent)]
    Record(#[from] crate::record::Error),
    #[error("btree corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Create an empty leaf page and return its page id, for use as a fresh table/index root.
pub fn create_empty(pager: &mut Pager) -> Result<u32> {
    let root = pager.allocate_page()?;
    pager.write_page(root, &node::pad_to_page(node::encode_leaf_page(&[], 0)))?;
    Ok(root)
}

/// Exact-key point lookup. Returns the live value bytes, or `None` if absent/tombstoned.
pub fn find(pager: &mut Pager, root_page_id: u32, key: u64) -> Result<Option<Vec<u8>>> {
    let mut page_id = root_page_id;
    loop {
        let buf = pager.read_page_ro(page_id)?;
        match buf[0] {
            node::KIND_LEAF => {
                let (cells, _) = node::decode_leaf_page(&buf);
                return Ok(node::find_leaf_cell(&cells, key).filter(|c| !c.tombstone).map(|c| c.value.clone()));
            }
            node::KIND_INTERNAL => {
                let (entries, rightmost) = node::decode_internal_page(&buf);
                let idx = node::find_child_index(&entries, key);
                page_id = if idx < entries.len() { entries[idx].child } else { rightmost };
            }
            k => return Err(Error::Corruption(format!("unknown page kind {k}"))),
        }
    }
}

/// Insert or overwrite `key -> value`. Returns the (possibly unchanged) root page id, since
/// a root split allocates a brand new root page.
pub fn insert(pager: &mut Pager, root_page_id: u32, key: u64, value: Vec<u8>) -> Result<u32> {
    match insert::insert(pager, root_page_id, key, value, false)? {
        insert::InsertOutcome::Done => Ok(root_page_id),
        insert::InsertOutcome::Split { separator_key, new_right_page } => {
            insert::grow_new_root(pager, root_page_id, separator_key, new_right_page)
        }
    }
}

/// Like [`insert`] but marks the cell as a logical tombstone instead of storing live data;
/// used where physical removal isn't safe to do eagerly (e.g. while a read snapshot might
/// still reference the value through an index).
pub fn insert_tombstone(pager: &mut Pager, root_page_id: u32, key: u64) -> Result<u32> {
    match insert::insert(pager, root_page_id, key, Vec::new(), true)? {
        insert::InsertOutcome::Done => Ok(root_page_id),
        insert::InsertOutcome::Split { separator_key, new_right_page } => {
            insert::grow_new_root(pager, root_page_id, separator_key, new_right_page)
        }
    }
}

pub fn delete(pager: &mut Pager, root_page_id: u32, key: u64) -> Result<()> {
    delete::delete(pager, root_page_id, key)
}

pub fn delete_key_value(pager: &mut Pager, root_page_id: u32, key: u64, expected_value: &[u8]) -> Result<bool> {
    delete::delete_key_value(pager, root_page_id, key, expected_value)
}

pub fn bulk_build_from_sorted(pager: &mut Pager, items: Vec<(u64, Vec<u8>)>) -> Result<u32> {
    bulk::bulk_build_from_sorted(pager, items)
}

pub fn open_cursor(pager: &mut Pager, root_page_id: u32) -> Result<Cursor> {
    Cursor::open(pager, root_page_id)
}

pub fn open_cursor_at(pager: &mut Pager, root_page_id: u32, start_key: u64) -> Result<Cursor> {
    Cursor::open_at(pager, root_page_id, start_key)
}

/// Fraction of `PAGE_SIZE` occupied by live (encoded) content, for vacuum/diagnostics.
pub fn calculate_page_utilization(pager: &mut Pager, page_id: u32) -> Result<f64> {
    let buf = pager.read_page_ro(page_id)?;
    let encoded_len = match buf[0] {
        node::KIND_LEAF => {
            let (cells, next) = node::decode_leaf_page(&buf);
            node::encode_leaf_page(&cells, next).len()
        }
        node::KIND_INTERNAL => {
            let (entries, rightmost) = node::decode_internal_page(&buf);
            node::encode_internal_page(&entries, rightmost).len()
        }
        k => return Err(Error::Corruption(format!("unknown page kind {k}"))),
    };
    Ok(encoded_len as f64 / crate::config::PAGE_SIZE as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;
    use std::rc::Rc;

    fn temp_pager(name: &str) -> Pager {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_btree_test_{}_{}", std::process::id(), name));
        std::fs::remove_file(&p).ok();
        std::fs::remove_file(crate::wal::wal_path_for(&p)).ok();
        Pager::open(Rc::new(OsVfs), &p).unwrap()
    }

    #[test]
    fn insert_and_find_roundtrip() {
        let mut pager = temp_pager("insert_find");
        pager.begin_write().unwrap();
        let mut root = create_empty(&mut pager).unwrap();
        for i in 0..50u64 {
            root = insert(&mut pager, root, i, format!("value-{i}").into_bytes()).unwrap();
        }
        pager.commit().unwrap();
        for i in 0..50u64 {
            let v = find(&mut pager, root, i).unwrap().unwrap();
            assert_eq!(v, format!("value-{i}").into_bytes());
        }
        assert!(find(&mut pager, root, 999).unwrap().is_none());
    }

    #[test]
    fn insert_forces_leaf_split() {
        let mut pager = temp_pager("split");
        pager.begin_write().unwrap();
        let mut root = create_empty(&mut pager).unwrap();
        // values large enough that a few hundred force at least one split
        for i in 0..400u64 {
            root = insert(&mut pager, root, i, vec![b'x'; 32]).unwrap();
        }
        pager.commit().unwrap();
        for i in 0..400u64 {
            assert!(find(&mut pager, root, i).unwrap().is_some());
        }
    }

    #[test]
    fn cursor_iterates_in_key_order() {
        let mut pager = temp_pager("cursor");
        pager.begin_write().unwrap();
        let mut root = create_empty(&mut pager).unwrap();
        for i in [5u64, 1, 3, 2, 4] {
            root = insert(&mut pager, root, i, vec![i as u8]).unwrap();
        }
        pager.commit().unwrap();
        let mut cursor = open_cursor(&mut pager, root).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.next(&mut pager).unwrap() {
            seen.push(k);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn delete_removes_key() {
        let mut pager = temp_pager("delete");
        pager.begin_write().unwrap();
        let mut root = create_empty(&mut pager).unwrap();
        for i in 0..10u64 {
            root = insert(&mut pager, root, i, vec![i as u8]).unwrap();
        }
        pager.commit().unwrap();
        pager.begin_write().unwrap();
        delete(&mut pager, root, 5).unwrap();
        pager.commit().unwrap();
        assert!(find(&mut pager, root, 5).unwrap().is_none());
        assert!(find(&mut pager, root, 4).unwrap().is_some());
    }

    #[test]
    fn bulk_build_then_find() {
        let mut pager = temp_pager("bulk");
        pager.begin_write().unwrap();
        let items: Vec<(u64, Vec<u8>)> = (0..200u64).map(|i| (i, vec![b'z'; 20])).collect();
        let root = bulk_build_from_sorted(&mut pager, items).unwrap();
        pager.commit().unwrap();
        for i in 0..200u64 {
            assert!(find(&mut pager, root, i).unwrap().is_some());
        }
    }
}
