//! Forward cursors over a btree's leaves in key order (§4.6 `openCursor`/`openCursorAt`/`cursorNext`).

use crate::pager::Pager;

use super::node::{decode_leaf_page, LeafCell, KIND_INTERNAL};
use super::Error;

pub struct Cursor {
    leaf_page_id: u32,
    cells: Vec<LeafCell>,
    index: usize,
    next_leaf: u32,
}

impl Cursor {
    /// Position at the first leaf cell of the whole tree.
    pub fn open(pager: &mut Pager, root_page_id: u32) -> super::Result<Self> {
        Self::open_at(pager, root_page_id, 0)
    }

    /// Position at the first leaf cell with `key >= start_key`.
    pub fn open_at(pager: &mut Pager, root_page_id: u32, start_key: u64) -> super::Result<Self> {
        let mut page_id = root_page_id;
        loop {
            let buf = pager.read_page_ro(page_id)?;
            if buf[0] != KIND_INTERNAL {
                break;
            }
            let (entries, rightmost) = super::node::decode_internal_page(&buf);
            let idx = super::node::find_child_index(&entries, start_key);
            page_id = if idx < entries.len() { entries[idx].child } else { rightmost };
        }
        let buf = pager.read_page_ro(page_id)?;
        if buf[0] != 0 {
            return Err(Error::Corruption("expected leaf page at bottom of descent".to_string()));
        }
        let (cells, next_leaf) = decode_leaf_page(&buf);
        let index = cells.iter().position(|c| c.key >= start_key).unwrap_or(cells.len());
        Ok(Self { leaf_page_id: page_id, cells, index, next_leaf })
    }

    /// Advance to, and return, the next live (non-tombstone) cell.
    pub fn next(&mut self, pager: &mut Pager) -> super::Result<Option<(u64, Vec<u8>)>> {
        loop {
            if self.index >= self.cells.len() {
                if self.next_leaf == 0 {
                    return Ok(None);
                }
                let buf = pager.read_page_ro(self.next_leaf)?;
                let (cells, next_leaf) = decode_leaf_page(&buf);
                self.leaf_page_id = self.next_leaf;
                self.cells = cells;
                self.index = 0;
                self.next_leaf = next_leaf;
                continue;
            }
            let cell = self.cells[self.index].clone();
            self.index += 1;
            if !cell.tombstone {
                return Ok(Some((cell.key, cell.value)));
            }
        }
    }

    pub fn current_leaf_page_id(&self) -> u32 {
        self.leaf_page_id
    }
}
