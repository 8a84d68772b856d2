//! Key deletion with cascading underflow borrow/merge (§4.6).
//!
//! Deletion descends the tree recording the path taken, removes the key from its leaf, and
//! if that leaf drops below `MIN_FILL_FRACTION` asks its immediate parent to borrow a cell
//! from, or merge with, the next sibling. A merge removes an entry from the parent, which can
//! itself underflow; `delete` walks back up the recorded path, repeating the borrow/merge at
//! each internal level for as long as a merge keeps shrinking the next ancestor. The root is
//! exempt from the fill-factor check (it has no parent to borrow from or merge into), so a
//! root that ends up sparse is expected, not a bug.

use crate::config::{BTREE_PAGE_HEADER_BYTES, MIN_FILL_FRACTION, PAGE_SIZE};
use crate::pager::Pager;

use super::node::{
    decode_internal_page, decode_leaf_page, encode_internal_page, encode_leaf_page, find_child_index, pad_to_page, InternalCell, KIND_LEAF,
};

enum PathStep {
    /// Index into the parent's `entries`, or `entries.len()` to mean "rightmost".
    Internal { page_id: u32, child_index: usize },
}

pub fn delete(pager: &mut Pager, root_page_id: u32, key: u64) -> super::Result<()> {
    let mut path: Vec<PathStep> = Vec::new();
    let mut page_id = root_page_id;
    loop {
        let buf = pager.read_page_ro(page_id)?;
        match buf[0] {
            KIND_LEAF => break,
            _ => {
                let (entries, rightmost) = decode_internal_page(&buf);
                let idx = find_child_index(&entries, key);
                let child = if idx < entries.len() { entries[idx].child } else { rightmost };
                path.push(PathStep::Internal { page_id, child_index: idx });
                page_id = child;
            }
        }
    }

    let leaf_page_id = page_id;
    let buf = pager.read_page_ro(leaf_page_id)?;
    let (mut cells, next_leaf) = decode_leaf_page(&buf);
    let before = cells.len();
    cells.retain(|c| c.key != key);
    if cells.len() == before {
        return Ok(()); // key absent: no-op, matches "delete of a missing key is not an error"
    }
    let encoded = encode_leaf_page(&cells, next_leaf);
    pager.write_page(leaf_page_id, &pad_to_page(encoded))?;

    let underflowed = (encoded.len() as f64) < (PAGE_SIZE as f64) * MIN_FILL_FRACTION;
    if underflowed && !path.is_empty() {
        let mut level = path.len() - 1;
        let (parent_id, child_index) = match &path[level] {
            PathStep::Internal { page_id, child_index } => (*page_id, *child_index),
        };
        let mut merged = rebalance_leaf(pager, parent_id, child_index, leaf_page_id)?;
        let mut shrunk_page_id = parent_id;
        while merged && level > 0 {
            let buf = pager.read_page_ro(shrunk_page_id)?;
            let (entries, rightmost) = decode_internal_page(&buf);
            let still_underflowed = (encode_internal_page(&entries, rightmost).len() as f64) < (PAGE_SIZE as f64) * MIN_FILL_FRACTION;
            if !still_underflowed {
                break;
            }
            level -= 1;
            let (grandparent_id, gp_child_index) = match &path[level] {
                PathStep::Internal { page_id, child_index } => (*page_id, *child_index),
            };
            merged = rebalance_internal(pager, grandparent_id, gp_child_index, shrunk_page_id)?;
            shrunk_page_id = grandparent_id;
        }
    }
    Ok(())
}

/// Attempt to borrow a cell from, or merge with, the leaf's right sibling via the parent's
/// next entry. No-ops (and returns `false`) if the leaf has no right sibling under this
/// parent (it is the rightmost child). Returns `true` iff a merge removed an entry from the
/// parent, since only a merge can itself cause the parent to underflow.
fn rebalance_leaf(pager: &mut Pager, parent_id: u32, child_index: usize, leaf_page_id: u32) -> super::Result<bool> {
    let parent_buf = pager.read_page_ro(parent_id)?;
    let (mut entries, rightmost) = decode_internal_page(&parent_buf);

    let sibling_page_id = if child_index < entries.len() {
        if child_index + 1 < entries.len() {
            entries[child_index + 1].child
        } else {
            rightmost
        }
    } else {
        return Ok(false); // leaf was the rightmost child; no right sibling to borrow from under this parent
    };

    let leaf_buf = pager.read_page_ro(leaf_page_id)?;
    let (mut leaf_cells, leaf_next) = decode_leaf_page(&leaf_buf);
    let sibling_buf = pager.read_page_ro(sibling_page_id)?;
    let (mut sibling_cells, sibling_next) = decode_leaf_page(&sibling_buf);

    let combined_len = encode_leaf_page(&leaf_cells, leaf_next).len() + encode_leaf_page(&sibling_cells, sibling_next).len()
        - 2 * BTREE_PAGE_HEADER_BYTES;

    if combined_len <= PAGE_SIZE - BTREE_PAGE_HEADER_BYTES {
        // Merge: fold sibling into leaf, drop the parent's entry for it.
        leaf_cells.append(&mut sibling_cells);
        let merged = pad_to_page(encode_leaf_page(&leaf_cells, sibling_next));
        pager.write_page(leaf_page_id, &merged)?;
        pager.free_page(sibling_page_id)?;
        entries.remove(child_index);
        let encoded = pad_to_page(encode_internal_page(&entries, rightmost));
        pager.write_page(parent_id, &encoded)?;
        return Ok(true);
    }
    if !sibling_cells.is_empty() {
        // Borrow the sibling's smallest cell to top up the underflowed leaf.
        let borrowed = sibling_cells.remove(0);
        let new_boundary = sibling_cells.first().map(|c| c.key).unwrap_or(borrowed.key + 1);
        leaf_cells.push(borrowed);
        leaf_cells.sort_by_key(|c| c.key);
        pager.write_page(leaf_page_id, &pad_to_page(encode_leaf_page(&leaf_cells, leaf_next)))?;
        pager.write_page(sibling_page_id, &pad_to_page(encode_leaf_page(&sibling_cells, sibling_next)))?;
        if child_index < entries.len() {
            entries[child_index].boundary_key = new_boundary;
        }
        pager.write_page(parent_id, &pad_to_page(encode_internal_page(&entries, rightmost)))?;
    }
    Ok(false)
}

/// Internal-page counterpart of [`rebalance_leaf`]: merges `page_id` with its right sibling
/// under `parent_id` when the combined entries (with the parent's separator pulled down
/// between them) fit in one page. Only merges, never borrows; an internal page left
/// underflowed because no merge fit just stays "not maximally compact", not incorrect.
/// Returns `true` iff a merge removed an entry from `parent_id`.
fn rebalance_internal(pager: &mut Pager, parent_id: u32, child_index: usize, page_id: u32) -> super::Result<bool> {
    let parent_buf = pager.read_page_ro(parent_id)?;
    let (mut entries, rightmost) = decode_internal_page(&parent_buf);

    let sibling_page_id = if child_index < entries.len() {
        if child_index + 1 < entries.len() {
            entries[child_index + 1].child
        } else {
            rightmost
        }
    } else {
        return Ok(false); // page_id was the rightmost child; no right sibling to merge with
    };

    let separator = entries[child_index].boundary_key;
    let page_buf = pager.read_page_ro(page_id)?;
    let (page_entries, page_rightmost) = decode_internal_page(&page_buf);
    let sibling_buf = pager.read_page_ro(sibling_page_id)?;
    let (sibling_entries, sibling_rightmost) = decode_internal_page(&sibling_buf);

    // Pull the parent's separator down as the boundary between `page_id`'s own entries and
    // the sibling's, the standard B-tree internal-node merge.
    let mut merged_entries = page_entries;
    merged_entries.push(InternalCell { boundary_key: separator, child: page_rightmost });
    merged_entries.extend(sibling_entries);

    let merged_encoded = encode_internal_page(&merged_entries, sibling_rightmost);
    if merged_encoded.len() > PAGE_SIZE {
        return Ok(false);
    }
    pager.write_page(page_id, &pad_to_page(merged_encoded))?;
    pager.free_page(sibling_page_id)?;
    entries.remove(child_index);
    pager.write_page(parent_id, &pad_to_page(encode_internal_page(&entries, rightmost)))?;
    Ok(true)
}

/// Delete `key` only if its current value equals `expected_value` (optimistic concurrency
/// for callers like unique-index maintenance that must not blow away a concurrent writer).
pub fn delete_key_value(pager: &mut Pager, root_page_id: u32, key: u64, expected_value: &[u8]) -> super::Result<bool> {
    let found = super::find(pager, root_page_id, key)?;
    if found.as_deref() != Some(expected_value) {
        return Ok(false);
    }
    delete(pager, root_page_id, key)?;
    Ok(true)
}
