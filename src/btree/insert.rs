//! Insert/upsert with byte-size-based leaf and internal splitting (§4.6).

use crate::config::{BTREE_PAGE_HEADER_BYTES, CELL_POINTER_BYTES, PAGE_SIZE};
use crate::pager::Pager;

use super::node::{
    decode_internal_page, decode_leaf_page, encode_internal_page, encode_leaf_page, find_child_index, pad_to_page,
    InternalCell, LeafCell, KIND_INTERNAL, KIND_LEAF,
};
use super::Error;

/// Usable bytes in a page body, after the fixed header. Pointer-array bytes are no longer
/// spent once pages are re-encoded wholesale, but the budget still reserves `CELL_POINTER_BYTES`
/// per cell so growth stays proportional to what an in-place pointer array would have cost.
fn page_budget(num_cells: usize) -> usize {
    PAGE_SIZE - BTREE_PAGE_HEADER_BYTES - num_cells * CELL_POINTER_BYTES
}

pub enum InsertOutcome {
    Done,
    /// The child split; parent must link in `(separator_key, new_right_page)`.
    Split { separator_key: u64, new_right_page: u32 },
}

pub fn insert(pager: &mut Pager, page_id: u32, key: u64, value: Vec<u8>, tombstone: bool) -> super::Result<InsertOutcome> {
    let buf = pager.read_page_ro(page_id)?;
    match buf[0] {
        KIND_LEAF => insert_leaf(pager, page_id, &buf, key, value, tombstone),
        KIND_INTERNAL => insert_internal(pager, page_id, &buf, key, value, tombstone),
        k => Err(Error::Corruption(format!("unknown page kind {k}"))),
    }
}

fn insert_leaf(
    pager: &mut Pager,
    page_id: u32,
    buf: &[u8],
    key: u64,
    value: Vec<u8>,
    tombstone: bool,
) -> super::Result<InsertOutcome> {
    let (mut cells, next_leaf) = decode_leaf_page(buf);
    match cells.binary_search_by_key(&key, |c| c.key) {
        Ok(i) => cells[i] = LeafCell { key, tombstone, value },
        Err(i) => cells.insert(i, LeafCell { key, tombstone, value }),
    }

    let encoded = encode_leaf_page(&cells, next_leaf);
    if encoded.len() <= page_budget(cells.len()) + BTREE_PAGE_HEADER_BYTES {
        pager.write_page(page_id, &pad_to_page(encoded))?;
        return Ok(InsertOutcome::Done);
    }

    let split_at = split_point(&cells, |c| {
        let mut tmp = Vec::new();
        crate::varint::write_uvarint(c.key, &mut tmp);
        tmp.push(0);
        crate::varint::write_uvarint(c.value.len() as u64, &mut tmp);
        tmp.len() + c.value.len()
    });
    let right_cells = cells.split_off(split_at);
    let separator_key = right_cells[0].key;

    let new_right_page = pager.allocate_page()?;
    let left_encoded = pad_to_page(encode_leaf_page(&cells, new_right_page));
    let right_encoded = pad_to_page(encode_leaf_page(&right_cells, next_leaf));
    pager.write_page(page_id, &left_encoded)?;
    pager.write_page(new_right_page, &right_encoded)?;

    Ok(InsertOutcome::Split { separator_key, new_right_page })
}

fn insert_internal(
    pager: &mut Pager,
    page_id: u32,
    buf: &[u8],
    key: u64,
    value: Vec<u8>,
    tombstone: bool,
) -> super::Result<InsertOutcome> {
    let (mut entries, mut rightmost) = decode_internal_page(buf);
    let idx = find_child_index(&entries, key);
    let child = if idx < entries.len() { entries[idx].child } else { rightmost };

    match insert(pager, child, key, value, tombstone)? {
        InsertOutcome::Done => Ok(InsertOutcome::Done),
        InsertOutcome::Split { separator_key, new_right_page } => {
            if idx < entries.len() {
                let old_boundary = entries[idx].boundary_key;
                entries[idx] = InternalCell { boundary_key: separator_key, child };
                entries.insert(idx + 1, InternalCell { boundary_key: old_boundary, child: new_right_page });
            } else {
                entries.push(InternalCell { boundary_key: separator_key, child });
                rightmost = new_right_page;
            }

            let encoded = encode_internal_page(&entries, rightmost);
            if encoded.len() <= page_budget(entries.len()) + BTREE_PAGE_HEADER_BYTES {
                pager.write_page(page_id, &pad_to_page(encoded))?;
                return Ok(InsertOutcome::Done);
            }

            let split_at = split_point(&entries, |_| {
                let mut tmp = Vec::new();
                crate::varint::write_uvarint(0, &mut tmp);
                tmp.len() + 4
            });
            let mut right_entries = entries.split_off(split_at);
            let promoted = right_entries.remove(0);
            let new_right_page = pager.allocate_page()?;
            let left_encoded = pad_to_page(encode_internal_page(&entries, promoted.child));
            let right_encoded = pad_to_page(encode_internal_page(&right_entries, rightmost));
            pager.write_page(page_id, &left_encoded)?;
            pager.write_page(new_right_page, &right_encoded)?;
            Ok(InsertOutcome::Split { separator_key: promoted.boundary_key, new_right_page: new_right_page })
        }
    }
}

/// Choose a split index roughly balancing encoded byte size between the two halves, not
/// just cell count, so a handful of huge cells next to many tiny ones still splits sanely.
fn split_point<T>(items: &[T], size_of: impl Fn(&T) -> usize) -> usize {
    let total: usize = items.iter().map(&size_of).sum();
    let half = total / 2;
    let mut running = 0;
    for (i, item) in items.iter().enumerate() {
        running += size_of(item);
        if running >= half {
            return (i + 1).min(items.len() - 1).max(1);
        }
    }
    (items.len() / 2).max(1)
}

/// Allocates a fresh root page wrapping the old root as its sole child, linking in a split
/// that propagated all the way up. Returns the new root page id.
pub fn grow_new_root(pager: &mut Pager, old_root: u32, separator_key: u64, new_right_page: u32) -> super::Result<u32> {
    let new_root = pager.allocate_page()?;
    let entries = vec![InternalCell { boundary_key: separator_key, child: old_root }];
    let encoded = pad_to_page(encode_internal_page(&entries, new_right_page));
    pager.write_page(new_root, &encoded)?;
    Ok(new_root)
}
