//! Buffer pool / pager (§4.4): the cache of fixed-size pages backing every higher layer.
//!
//! Pages are located in a fixed-capacity, open-addressed cache keyed by `splitmix64(page_id)`
//! with linear probing, loaded on demand and evicted under a CLOCK approximation, with a
//! freelist and a write path through the [`crate::wal::Wal`]. Structural code
//! (btree, catalog, storage) always sees the latest committed state through [`Pager::pin`];
//! read-only SQL queries instead go through [`Pager::read_page_snapshot`], which consults the
//! WAL for a fixed LSN and never touches the cache, so a long-lived reader cannot be starved
//! by cache eviction of pages a concurrent writer has since changed.

use std::path::Path;
use std::rc::Rc;

use crate::config::{DEFAULT_CACHE_CAPACITY, HEADER_PAGE_ID, PAGE_SIZE};
use crate::dbheader::DbHeader;
use crate::vfs::{Handle, Vfs};
use crate::wal::{wal_path_for, Wal};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("buffer pool has no evictable page (every page is pinned)")]
    NoEvictablePage,
    #[error("page {pn} is out of bounds (max allocated {max})")]
    PageOutOfBounds { pn: u32, max: u32 },
    #[error("reader transaction was aborted")]
    ReaderAborted,
    #[error(transparent)]
    Io(#[from] crate::vfs::Error),
    #[error(transparent)]
    Header(#[from] crate::dbheader::Error),
    #[error(transparent)]
    Wal(#[from] crate::wal::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct CacheSlot {
    page_id: u32,
    data: Vec<u8>,
    dirty: bool,
    pin_count: u32,
    clock_bit: bool,
}

pub struct Pager {
    vfs: Rc<dyn Vfs>,
    handle: Handle,
    wal: Wal,
    cache: Vec<Option<CacheSlot>>,
    capacity: usize,
    clock_hand: usize,
    header: DbHeader,
    writer_active: bool,
    next_new_page: u32,
}

/// RAII handle to a cached page; drops the pin automatically.
pub struct PinnedPage<'p> {
    pager: &'p mut Pager,
    page_id: u32,
}

impl<'p> PinnedPage<'p> {
    pub fn data(&self) -> &[u8] {
        self.pager.slot(self.page_id).data.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let slot = self.pager.slot_mut(self.page_id);
        slot.dirty = true;
        slot.data.as_mut_slice()
    }
}

impl<'p> Drop for PinnedPage<'p> {
    fn drop(&mut self) {
        self.pager.unpin(self.page_id);
    }
}

/// RAII handle to a reader transaction's snapshot; ends the reader automatically.
pub struct ReadTxnGuard {
    pager: std::sync::Arc<std::sync::Mutex<Pager>>,
    reader_id: u64,
    pub snapshot_lsn: u64,
}

impl Drop for ReadTxnGuard {
    fn drop(&mut self) {
        if let Ok(mut p) = self.pager.lock() {
            let _ = p.end_read(self.reader_id);
        }
    }
}

pub fn begin_read(pager: &std::sync::Arc<std::sync::Mutex<Pager>>) -> ReadTxnGuard {
    let (reader_id, snapshot_lsn) = pager.lock().unwrap().wal.begin_reader();
    ReadTxnGuard { pager: pager.clone(), reader_id, snapshot_lsn }
}

impl Pager {
    pub fn open(vfs: Rc<dyn Vfs>, path: &Path) -> Result<Self> {
        let existed = path.exists();
        let mut handle = vfs.open(path, true)?;
        let file_len = vfs.len(&mut handle)?;
        let wal = Wal::open(vfs.clone(), &wal_path_for(path))?;

        let header = if file_len >= PAGE_SIZE as u64 {
            let mut buf = vec![0u8; PAGE_SIZE];
            vfs.read_at(&mut handle, 0, &mut buf)?;
            DbHeader::decode(&buf)?
        } else {
            DbHeader::new_empty(2)
        };

        let capacity = DEFAULT_CACHE_CAPACITY;
        let next_new_page = ((file_len as usize / PAGE_SIZE).max(2) + 1) as u32;

        let mut pager = Self {
            vfs,
            handle,
            wal,
            cache: (0..capacity).map(|_| None).collect(),
            capacity,
            clock_hand: 0,
            header,
            writer_active: false,
            next_new_page,
        };

        if !existed || file_len < PAGE_SIZE as u64 {
            pager.begin_write()?;
            pager.persist_header()?;
            let root = vec![0u8; PAGE_SIZE];
            pager.write_page(2, &root)?;
            pager.next_new_page = 3;
            pager.commit()?;
        }
        Ok(pager)
    }

    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut DbHeader {
        &mut self.header
    }

    /// Writes the in-memory header into page 1 of the cache. Call before `commit`.
    pub fn persist_header(&mut self) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.header.encode_into(&mut buf);
        self.write_page(HEADER_PAGE_ID, &buf)
    }

    fn slot_index(&self, page_id: u32) -> usize {
        (splitmix64(page_id as u64) as usize) % self.capacity
    }

    fn find_slot(&self, page_id: u32) -> Option<usize> {
        let start = self.slot_index(page_id);
        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            match &self.cache[idx] {
                Some(slot) if slot.page_id == page_id => return Some(idx),
                None => return None,
                _ => continue,
            }
        }
        None
    }

    fn slot(&self, page_id: u32) -> &CacheSlot {
        let idx = self.find_slot(page_id).expect("page must be pinned and resident");
        self.cache[idx].as_ref().unwrap()
    }

    fn slot_mut(&mut self, page_id: u32) -> &mut CacheSlot {
        let idx = self.find_slot(page_id).expect("page must be pinned and resident");
        self.cache[idx].as_mut().unwrap()
    }

    fn load_from_disk(&mut self, page_id: u32) -> Result<Vec<u8>> {
        let lsn = self.wal.latest_lsn();
        if let Some(data) = self.wal.read_page(page_id, lsn)? {
            return Ok(data);
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        self.vfs.read_at(&mut self.handle, (page_id as u64 - 1) * PAGE_SIZE as u64, &mut buf)?;
        Ok(buf)
    }

    /// Evict one unpinned slot using CLOCK (mark-and-compact): a second-chance bit is
    /// cleared on the first pass and the slot is only evicted once already cleared.
    fn evict_one(&mut self) -> Result<usize> {
        let mut scanned = 0;
        loop {
            if scanned >= 2 * self.capacity {
                return Err(Error::NoEvictablePage);
            }
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % self.capacity;
            scanned += 1;
            let Some(slot) = &mut self.cache[idx] else { continue };
            if slot.pin_count > 0 {
                continue;
            }
            if slot.clock_bit {
                slot.clock_bit = false;
                continue;
            }
            if slot.dirty {
                let page_id = slot.page_id;
                let data = slot.data.clone();
                self.flush_dirty_page(page_id, &data)?;
            }
            return Ok(idx);
        }
    }

    /// Buffers a dirty evicted page as a WAL frame so it is not lost before the next commit.
    fn flush_dirty_page(&mut self, page_id: u32, data: &[u8]) -> Result<()> {
        if !self.writer_active {
            self.wal.begin_writer()?;
            self.writer_active = true;
        }
        self.wal.write_page(page_id, data)?;
        Ok(())
    }

    fn place_in_cache(&mut self, page_id: u32, data: Vec<u8>) -> Result<usize> {
        let start = self.slot_index(page_id);
        let mut target = None;
        for i in 0..self.capacity {
            let idx = (start + i) % self.capacity;
            if self.cache[idx].is_none() {
                target = Some(idx);
                break;
            }
        }
        let idx = match target {
            Some(idx) => idx,
            None => self.evict_one()?,
        };
        self.cache[idx] = Some(CacheSlot { page_id, data, dirty: false, pin_count: 0, clock_bit: true });
        Ok(idx)
    }

    pub fn pin(&mut self, page_id: u32) -> Result<PinnedPage<'_>> {
        if self.find_slot(page_id).is_none() {
            let data = self.load_from_disk(page_id)?;
            self.place_in_cache(page_id, data)?;
        }
        let slot = self.slot_mut(page_id);
        slot.pin_count += 1;
        slot.clock_bit = true;
        Ok(PinnedPage { pager: self, page_id })
    }

    fn unpin(&mut self, page_id: u32) {
        if let Some(idx) = self.find_slot(page_id) {
            if let Some(slot) = &mut self.cache[idx] {
                slot.pin_count = slot.pin_count.saturating_sub(1);
            }
        }
    }

    pub fn read_page_ro(&mut self, page_id: u32) -> Result<Vec<u8>> {
        let pinned = self.pin(page_id)?;
        Ok(pinned.data().to_vec())
    }

    pub fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<()> {
        let mut pinned = self.pin(page_id)?;
        pinned.data_mut().copy_from_slice(data);
        Ok(())
    }

    /// Reads `page_id` as of a reader transaction's fixed snapshot, bypassing the cache.
    pub fn read_page_snapshot(&mut self, page_id: u32, snapshot_lsn: u64) -> Result<Vec<u8>> {
        if let Some(data) = self.wal.read_page(page_id, snapshot_lsn)? {
            return Ok(data);
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        self.vfs.read_at(&mut self.handle, (page_id as u64 - 1) * PAGE_SIZE as u64, &mut buf)?;
        Ok(buf)
    }

    /// Allocates a page: reuses the freelist head if non-empty, otherwise grows the file.
    pub fn allocate_page(&mut self) -> Result<u32> {
        if self.header.freelist_head != 0 {
            let page_id = self.header.freelist_head;
            let data = self.read_page_ro(page_id)?;
            let next = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            self.header.freelist_head = next;
            self.header.freelist_count = self.header.freelist_count.saturating_sub(1);
            self.persist_header()?;
            let zeroed = vec![0u8; PAGE_SIZE];
            self.write_page(page_id, &zeroed)?;
            return Ok(page_id);
        }
        let page_id = self.next_new_page;
        self.next_new_page += 1;
        let zeroed = vec![0u8; PAGE_SIZE];
        self.write_page(page_id, &zeroed)?;
        Ok(page_id)
    }

    /// Pushes `page_id` onto the freelist as a singly-linked chain (`next:u32` in the
    /// first four bytes, rest zero/ignored).
    pub fn free_page(&mut self, page_id: u32) -> Result<()> {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0..4].copy_from_slice(&self.header.freelist_head.to_le_bytes());
        self.write_page(page_id, &data)?;
        self.header.freelist_head = page_id;
        self.header.freelist_count += 1;
        self.persist_header()
    }

    pub fn begin_write(&mut self) -> Result<()> {
        if !self.writer_active {
            self.wal.begin_writer()?;
            self.writer_active = true;
        }
        Ok(())
    }

    /// Flushes every dirty cache slot as a WAL frame and commits them under one LSN.
    pub fn commit(&mut self) -> Result<u64> {
        if !self.writer_active {
            self.begin_write()?;
        }
        let dirty: Vec<(u32, Vec<u8>)> = self
            .cache
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .filter(|s| s.dirty)
            .map(|s| {
                s.dirty = false;
                (s.page_id, s.data.clone())
            })
            .collect();
        for (page_id, data) in &dirty {
            self.wal.write_page(*page_id, data)?;
        }
        let lsn = self.wal.commit_writer()?;
        self.writer_active = false;
        Ok(lsn)
    }

    pub fn rollback(&mut self) -> Result<()> {
        for slot in self.cache.iter_mut().filter_map(|s| s.as_mut()) {
            slot.dirty = false;
        }
        if self.writer_active {
            self.wal.rollback_writer()?;
            self.writer_active = false;
        }
        Ok(())
    }

    pub fn end_read(&mut self, reader_id: u64) -> Result<()> {
        Ok(self.wal.end_reader(reader_id)?)
    }

    /// Runs a WAL checkpoint (§4.5 steps 1-5) and records the checkpoint LSN in the header.
    pub fn checkpoint(&mut self) -> Result<usize> {
        let safe_lsn_before = self.wal.latest_lsn();
        let pages = self.wal.checkpoint(self.vfs.as_ref(), &mut self.handle)?;
        self.header.last_checkpoint_lsn = safe_lsn_before;
        self.begin_write()?;
        self.persist_header()?;
        self.commit()?;
        Ok(pages)
    }

    pub fn active_reader_count(&self) -> usize {
        self.wal.active_reader_count()
    }

    pub fn fail_next_checkpoint(&mut self) {
        self.wal.fail_next_checkpoint = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;

    fn temp_db(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_pager_test_{}_{}", std::process::id(), name));
        p
    }

    fn cleanup(path: &Path) {
        std::fs::remove_file(path).ok();
        std::fs::remove_file(wal_path_for(path)).ok();
    }

    #[test]
    fn allocate_write_read_roundtrip() {
        let path = temp_db("alloc");
        cleanup(&path);
        let mut pager = Pager::open(Rc::new(OsVfs), &path).unwrap();
        pager.begin_write().unwrap();
        let page_id = pager.allocate_page().unwrap();
        pager.write_page(page_id, &vec![42u8; PAGE_SIZE]).unwrap();
        pager.commit().unwrap();
        let data = pager.read_page_ro(page_id).unwrap();
        assert_eq!(data[0], 42);
        cleanup(&path);
    }

    #[test]
    fn freed_page_is_reused() {
        let path = temp_db("freelist");
        cleanup(&path);
        let mut pager = Pager::open(Rc::new(OsVfs), &path).unwrap();
        pager.begin_write().unwrap();
        let a = pager.allocate_page().unwrap();
        pager.commit().unwrap();
        pager.begin_write().unwrap();
        pager.free_page(a).unwrap();
        pager.commit().unwrap();
        pager.begin_write().unwrap();
        let b = pager.allocate_page().unwrap();
        pager.commit().unwrap();
        assert_eq!(a, b);
        cleanup(&path);
    }

    #[test]
    fn reader_snapshot_survives_later_write() {
        let path = temp_db("snapshot");
        cleanup(&path);
        let pager = std::sync::Arc::new(std::sync::Mutex::new(Pager::open(Rc::new(OsVfs), &path).unwrap()));
        let page_id = {
            let mut p = pager.lock().unwrap();
            p.begin_write().unwrap();
            let id = p.allocate_page().unwrap();
            p.write_page(id, &vec![1u8; PAGE_SIZE]).unwrap();
            p.commit().unwrap();
            id
        };
        let guard = begin_read(&pager);
        {
            let mut p = pager.lock().unwrap();
            p.begin_write().unwrap();
            p.write_page(page_id, &vec![2u8; PAGE_SIZE]).unwrap();
            p.commit().unwrap();
        }
        let seen = pager.lock().unwrap().read_page_snapshot(page_id, guard.snapshot_lsn).unwrap();
        assert_eq!(seen[0], 1);
        drop(guard);
        cleanup(&path);
    }
}
