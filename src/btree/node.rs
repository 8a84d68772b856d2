//! On-disk page layout for leaf and internal B-tree nodes (§4.6).
//!
//! Every page starts with a fixed header (kind, flags, cell count, a "right" pointer that
//! means next-leaf-in-key-order on a leaf page and the rightmost child on an internal page)
//! followed by variable-length cells. Rather than maintain an in-place cell-pointer array,
//! nodes are decoded into plain `Vec<Cell>` for mutation and re-encoded wholesale; the
//! encoded byte length is what split/merge decisions are based on, since a page's capacity
//! is byte-sized rather than a fixed fanout.

use crate::config::{BTREE_PAGE_HEADER_BYTES, PAGE_SIZE};

pub const KIND_LEAF: u8 = 0;
pub const KIND_INTERNAL: u8 = 1;

const TOMBSTONE_FLAG: u8 = 0x01;

#[derive(Debug, Clone, PartialEq)]
pub struct LeafCell {
    pub key: u64,
    pub tombstone: bool,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalCell {
    /// Keys strictly less than `boundary_key` live in `child`.
    pub boundary_key: u64,
    pub child: u32,
}

pub fn page_kind(buf: &[u8]) -> u8 {
    buf[0]
}

/// Every byte in the leaf-cell encoding: `varint(key) || flags:u8 || varint(len) || value`.
fn encode_leaf_cell(cell: &LeafCell, out: &mut Vec<u8>) {
    crate::varint::write_uvarint(cell.key, out);
    out.push(if cell.tombstone { TOMBSTONE_FLAG } else { 0 });
    crate::varint::write_uvarint(cell.value.len() as u64, out);
    out.extend_from_slice(&cell.value);
}

fn decode_leaf_cell(data: &[u8]) -> Option<(LeafCell, usize)> {
    let (key, n1) = crate::varint::read_uvarint(data).ok()?;
    let mut off = n1;
    let flags = *data.get(off)?;
    off += 1;
    let (len, n2) = crate::varint::read_uvarint(&data[off..]).ok()?;
    off += n2;
    let len = len as usize;
    if data.len() < off + len {
        return None;
    }
    let value = data[off..off + len].to_vec();
    off += len;
    Some((LeafCell { key, tombstone: flags & TOMBSTONE_FLAG != 0, value }, off))
}

/// `varint(boundary_key) || child:u32`.
fn encode_internal_cell(cell: &InternalCell, out: &mut Vec<u8>) {
    crate::varint::write_uvarint(cell.boundary_key, out);
    out.extend_from_slice(&cell.child.to_le_bytes());
}

fn decode_internal_cell(data: &[u8]) -> Option<(InternalCell, usize)> {
    let (boundary_key, n1) = crate::varint::read_uvarint(data).ok()?;
    let mut off = n1;
    if data.len() < off + 4 {
        return None;
    }
    let child = u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
    off += 4;
    Some((InternalCell { boundary_key, child }, off))
}

/// Decode a leaf page's cells and its next-leaf pointer (0 if this is the rightmost leaf).
pub fn decode_leaf_page(buf: &[u8]) -> (Vec<LeafCell>, u32) {
    let next_leaf = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let num_cells = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let mut cells = Vec::with_capacity(num_cells);
    let mut off = BTREE_PAGE_HEADER_BYTES;
    for _ in 0..num_cells {
        let Some((cell, n)) = decode_leaf_cell(&buf[off..]) else { break };
        off += n;
        cells.push(cell);
    }
    (cells, next_leaf)
}

/// Encode a leaf page. The result is always returned padded/truncated to exactly `PAGE_SIZE`
/// by the caller; this only returns the logical content length so callers can detect overflow.
pub fn encode_leaf_page(cells: &[LeafCell], next_leaf: u32) -> Vec<u8> {
    let mut out = vec![0u8; BTREE_PAGE_HEADER_BYTES];
    out[0] = KIND_LEAF;
    out[2..4].copy_from_slice(&(cells.len() as u16).to_le_bytes());
    out[4..8].copy_from_slice(&next_leaf.to_le_bytes());
    for cell in cells {
        encode_leaf_cell(cell, &mut out);
    }
    out
}

pub fn decode_internal_page(buf: &[u8]) -> (Vec<InternalCell>, u32) {
    let rightmost = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let num_cells = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let mut cells = Vec::with_capacity(num_cells);
    let mut off = BTREE_PAGE_HEADER_BYTES;
    for _ in 0..num_cells {
        let Some((cell, n)) = decode_internal_cell(&buf[off..]) else { break };
        off += n;
        cells.push(cell);
    }
    (cells, rightmost)
}

pub fn encode_internal_page(cells: &[InternalCell], rightmost: u32) -> Vec<u8> {
    let mut out = vec![0u8; BTREE_PAGE_HEADER_BYTES];
    out[0] = KIND_INTERNAL;
    out[2..4].copy_from_slice(&(cells.len() as u16).to_le_bytes());
    out[4..8].copy_from_slice(&rightmost.to_le_bytes());
    for cell in cells {
        encode_internal_cell(cell, &mut out);
    }
    out
}

/// Pads (or rejects, if caller failed to split first) an encoded page out to `PAGE_SIZE`.
pub fn pad_to_page(mut encoded: Vec<u8>) -> Vec<u8> {
    assert!(encoded.len() <= PAGE_SIZE, "page content {} exceeds PAGE_SIZE, caller must split first", encoded.len());
    encoded.resize(PAGE_SIZE, 0);
    encoded
}

/// Returns the child subtree index whose domain contains `key`, and `true` if that is the
/// rightmost (last) entry rather than a numbered cell.
pub fn find_child_index(entries: &[InternalCell], key: u64) -> usize {
    entries.iter().position(|e| key < e.boundary_key).unwrap_or(entries.len())
}

/// Binary search a leaf's cells (already sorted ascending by key) for an exact key match.
pub fn find_leaf_cell<'a>(cells: &'a [LeafCell], key: u64) -> Option<&'a LeafCell> {
    cells.binary_search_by_key(&key, |c| c.key).ok().map(|i| &cells[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_page_roundtrip() {
        let cells = vec![
            LeafCell { key: 1, tombstone: false, value: b"a".to_vec() },
            LeafCell { key: 5, tombstone: false, value: b"bbbb".to_vec() },
            LeafCell { key: 9, tombstone: true, value: vec![] },
        ];
        let encoded = encode_leaf_page(&cells, 42);
        let (decoded, next) = decode_leaf_page(&pad_to_page(encoded));
        assert_eq!(decoded, cells);
        assert_eq!(next, 42);
    }

    #[test]
    fn internal_page_roundtrip() {
        let cells = vec![
            InternalCell { boundary_key: 10, child: 2 },
            InternalCell { boundary_key: 20, child: 3 },
        ];
        let encoded = encode_internal_page(&cells, 4);
        let (decoded, rightmost) = decode_internal_page(&pad_to_page(encoded));
        assert_eq!(decoded, cells);
        assert_eq!(rightmost, 4);
    }

    #[test]
    fn find_child_index_picks_rightmost_for_large_key() {
        let entries = vec![InternalCell { boundary_key: 10, child: 1 }, InternalCell { boundary_key: 20, child: 2 }];
        assert_eq!(find_child_index(&entries, 5), 0);
        assert_eq!(find_child_index(&entries, 15), 1);
        assert_eq!(find_child_index(&entries, 25), 2);
    }
}
