//! Bulk-build a btree from an already key-sorted sequence (§4.6 `bulkBuildFromSorted`),
//! used by index rebuilds and initial table loads: packs leaves left-to-right instead of
//! inserting one key at a time, which avoids the O(n log n) splitting a naive insert loop
//! would pay.

use crate::config::{BTREE_PAGE_HEADER_BYTES, CELL_POINTER_BYTES, PAGE_SIZE};
use crate::pager::Pager;

use super::node::{encode_internal_page, encode_leaf_page, pad_to_page, InternalCell, LeafCell};

/// Build a complete btree from sorted `(key, value)` pairs and return its root page id.
/// `items` must already be sorted ascending by key with no duplicate keys.
pub fn bulk_build_from_sorted(pager: &mut Pager, items: Vec<(u64, Vec<u8>)>) -> super::Result<u32> {
    if items.is_empty() {
        let root = pager.allocate_page()?;
        pager.write_page(root, &pad_to_page(encode_leaf_page(&[], 0)))?;
        return Ok(root);
    }

    let mut leaf_page_ids = Vec::new();
    let mut first_keys = Vec::new();
    let mut batch: Vec<LeafCell> = Vec::new();
    let mut batch_bytes = BTREE_PAGE_HEADER_BYTES;

    let mut pending: Vec<(u32, Vec<LeafCell>)> = Vec::new();
    for (key, value) in items {
        let cell_bytes = varint_len(key) + 1 + varint_len(value.len() as u64) + value.len() + CELL_POINTER_BYTES;
        if batch_bytes + cell_bytes > PAGE_SIZE && !batch.is_empty() {
            let page_id = pager.allocate_page()?;
            first_keys.push(batch[0].key);
            pending.push((page_id, std::mem::take(&mut batch)));
            batch_bytes = BTREE_PAGE_HEADER_BYTES;
        }
        batch_bytes += cell_bytes;
        batch.push(LeafCell { key, tombstone: false, value });
    }
    if !batch.is_empty() {
        let page_id = pager.allocate_page()?;
        first_keys.push(batch[0].key);
        pending.push((page_id, batch));
    }

    for (i, (page_id, cells)) in pending.iter().enumerate() {
        let next_leaf = pending.get(i + 1).map(|(id, _)| *id).unwrap_or(0);
        pager.write_page(*page_id, &pad_to_page(encode_leaf_page(cells, next_leaf)))?;
        leaf_page_ids.push(*page_id);
    }

    if leaf_page_ids.len() == 1 {
        return Ok(leaf_page_ids[0]);
    }

    // Build one internal level over the leaves. Assumes leaf count is small enough that a
    // single internal page holds all the boundary entries; callers needing multi-level
    // trees beyond that should insert incrementally instead.
    let rightmost = *leaf_page_ids.last().unwrap();
    let entries: Vec<InternalCell> = leaf_page_ids[..leaf_page_ids.len() - 1]
        .iter()
        .zip(first_keys[1..].iter())
        .map(|(&child, &boundary_key)| InternalCell { boundary_key, child })
        .collect();
    let root = pager.allocate_page()?;
    pager.write_page(root, &pad_to_page(encode_internal_page(&entries, rightmost)))?;
    Ok(root)
}

fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}
