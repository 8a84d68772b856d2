//! Write-ahead log (§4.5): frames, checksums, reader/writer transaction lifecycle,
//! checkpoint, and crash recovery.
//!
//! A frame is `page_id:u32 || lsn:u64 || checksum:u32 || data:PAGE_SIZE`, appended to the
//! `.wal` sibling file. Readers take a snapshot LSN at `begin_reader` and see a consistent
//! view of the database for the lifetime of their transaction, even while a writer commits
//! new frames; `checkpoint` folds frames no longer needed by any active reader back into
//! the main database file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::PAGE_SIZE;
use crate::vfs::{Handle, Vfs};

const FRAME_HEADER_BYTES: usize = 4 + 8 + 4 + 4; // page_id, lsn, len, checksum
const FRAME_BYTES: usize = FRAME_HEADER_BYTES + PAGE_SIZE;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("reader transaction was aborted")]
    ReaderAborted,
    #[error("a writer transaction is already active")]
    WriterAlreadyActive,
    #[error("no active writer transaction")]
    NoActiveWriter,
    #[error("no active reader transaction with that id")]
    NoActiveReader,
    #[error("WAL corruption: {0}")]
    Corruption(String),
    #[error(transparent)]
    Io(#[from] crate::vfs::Error),
    #[error("failpoint triggered: {0}")]
    Failpoint(String),
}

struct FrameLoc {
    lsn: u64,
    offset: u64,
}

/// A pending, uncommitted write buffered until `commit_writer`.
struct PendingFrame {
    page_id: u32,
    data: Vec<u8>,
}

pub struct Wal {
    vfs: Rc<dyn Vfs>,
    handle: Handle,
    index: HashMap<u32, Vec<FrameLoc>>,
    next_lsn: u64,
    file_len: u64,
    writer_active: bool,
    pending: Vec<PendingFrame>,
    active_readers: HashMap<u64, u64>,
    next_reader_id: u64,
    /// Test hook: when set, the next `checkpoint` call fails instead of running.
    pub fail_next_checkpoint: bool,
}

impl Wal {
    pub fn open(vfs: Rc<dyn Vfs>, path: &Path) -> Result<Self, Error> {
        let mut handle = vfs.open(path, true)?;
        let file_len = vfs.len(&mut handle)?;
        let mut wal = Self {
            vfs,
            handle,
            index: HashMap::new(),
            next_lsn: 1,
            file_len: 0,
            writer_active: false,
            pending: Vec::new(),
            active_readers: HashMap::new(),
            next_reader_id: 1,
            fail_next_checkpoint: false,
        };
        wal.recover(file_len)?;
        Ok(wal)
    }

    /// Scan every complete, checksum-valid frame in the WAL file and rebuild the in-memory
    /// index. A trailing partial/corrupt frame (the tail of a crash mid-write) is dropped
    /// silently rather than treated as an error, per the crash-recovery contract.
    fn recover(&mut self, file_len: u64) -> Result<(), Error> {
        let mut offset = 0u64;
        let mut max_lsn = 0u64;
        while offset + FRAME_BYTES as u64 <= file_len {
            let mut header = [0u8; FRAME_HEADER_BYTES];
            self.vfs.read_at(&mut self.handle, offset, &mut header)?;
            let page_id = LittleEndian::read_u32(&header[0..4]);
            let lsn = LittleEndian::read_u64(&header[4..12]);
            let len = LittleEndian::read_u32(&header[12..16]) as usize;
            let checksum = LittleEndian::read_u32(&header[16..20]);
            if len != PAGE_SIZE {
                break;
            }
            let mut data = vec![0u8; PAGE_SIZE];
            self.vfs.read_at(&mut self.handle, offset + FRAME_HEADER_BYTES as u64, &mut data)?;
            if crc32c::crc32c(&data) != checksum {
                break;
            }
            self.index.entry(page_id).or_default().push(FrameLoc { lsn, offset });
            max_lsn = max_lsn.max(lsn);
            offset += FRAME_BYTES as u64;
        }
        self.file_len = offset;
        self.next_lsn = max_lsn + 1;
        Ok(())
    }

    pub fn latest_lsn(&self) -> u64 {
        self.next_lsn.saturating_sub(1)
    }

    pub fn begin_writer(&mut self) -> Result<(), Error> {
        if self.writer_active {
            return Err(Error::WriterAlreadyActive);
        }
        self.writer_active = true;
        self.pending.clear();
        Ok(())
    }

    pub fn write_page(&mut self, page_id: u32, data: &[u8]) -> Result<(), Error> {
        if !self.writer_active {
            return Err(Error::NoActiveWriter);
        }
        debug_assert_eq!(data.len(), PAGE_SIZE);
        self.pending.push(PendingFrame { page_id, data: data.to_vec() });
        Ok(())
    }

    /// Append every buffered frame under one commit LSN and fsync. Returns that LSN.
    pub fn commit_writer(&mut self) -> Result<u64, Error> {
        if !self.writer_active {
            return Err(Error::NoActiveWriter);
        }
        let lsn = self.next_lsn;
        let mut offset = self.file_len;
        for frame in &self.pending {
            let mut buf = vec![0u8; FRAME_BYTES];
            LittleEndian::write_u32(&mut buf[0..4], frame.page_id);
            LittleEndian::write_u64(&mut buf[4..12], lsn);
            LittleEndian::write_u32(&mut buf[12..16], PAGE_SIZE as u32);
            LittleEndian::write_u32(&mut buf[16..20], crc32c::crc32c(&frame.data));
            buf[FRAME_HEADER_BYTES..].copy_from_slice(&frame.data);
            self.vfs.write_at(&mut self.handle, offset, &buf)?;
            self.index.entry(frame.page_id).or_default().push(FrameLoc { lsn, offset });
            offset += FRAME_BYTES as u64;
        }
        if !self.pending.is_empty() {
            self.vfs.fsync(&mut self.handle)?;
        }
        self.file_len = offset;
        self.next_lsn += 1;
        self.writer_active = false;
        self.pending.clear();
        Ok(lsn)
    }

    pub fn rollback_writer(&mut self) -> Result<(), Error> {
        if !self.writer_active {
            return Err(Error::NoActiveWriter);
        }
        self.pending.clear();
        self.writer_active = false;
        Ok(())
    }

    /// Registers a new reader snapshot at the most recently committed LSN. Returns
    /// `(reader_id, snapshot_lsn)`.
    pub fn begin_reader(&mut self) -> (u64, u64) {
        let id = self.next_reader_id;
        self.next_reader_id += 1;
        let snapshot = self.latest_lsn();
        self.active_readers.insert(id, snapshot);
        (id, snapshot)
    }

    pub fn end_reader(&mut self, reader_id: u64) -> Result<(), Error> {
        self.active_readers.remove(&reader_id).map(|_| ()).ok_or(Error::NoActiveReader)
    }

    /// Read `page_id` as of `snapshot_lsn`: the newest frame with `lsn <= snapshot_lsn`,
    /// or `None` if no WAL frame applies (caller should fall back to the main file).
    pub fn read_page(&mut self, page_id: u32, snapshot_lsn: u64) -> Result<Option<Vec<u8>>, Error> {
        let Some(locs) = self.index.get(&page_id) else { return Ok(None) };
        let best = locs.iter().filter(|l| l.lsn <= snapshot_lsn).max_by_key(|l| l.lsn);
        let Some(loc) = best else { return Ok(None) };
        let offset = loc.offset + FRAME_HEADER_BYTES as u64;
        let mut data = vec![0u8; PAGE_SIZE];
        self.vfs.read_at(&mut self.handle, offset, &mut data)?;
        Ok(Some(data))
    }

    /// Fold every WAL frame not needed by any active reader back into the main database
    /// file, then shrink the WAL once nothing is left to replay:
    /// 1. Compute `safe_lsn`, the oldest snapshot any active reader still depends on.
    /// 2. For each page with a frame `lsn <= safe_lsn`, write its newest such frame to the
    ///    main file at that page's offset.
    /// 3. Drop all indexed frames with `lsn <= safe_lsn`.
    /// 4. Fsync the main file.
    /// 5. If no frames remain in the index, truncate the WAL file to empty.
    pub fn checkpoint(&mut self, db_vfs: &dyn Vfs, db_handle: &mut Handle) -> Result<usize, Error> {
        if self.fail_next_checkpoint {
            self.fail_next_checkpoint = false;
            return Err(Error::Failpoint("checkpoint failpoint triggered".to_string()));
        }
        let safe_lsn = self.active_readers.values().copied().min().unwrap_or_else(|| self.latest_lsn());
        let mut pages_written = 0usize;
        for (&page_id, locs) in self.index.iter_mut() {
            let best = locs.iter().filter(|l| l.lsn <= safe_lsn).max_by_key(|l| l.lsn);
            if let Some(loc) = best {
                let offset = loc.offset + FRAME_HEADER_BYTES as u64;
                let mut data = vec![0u8; PAGE_SIZE];
                self.vfs.read_at(&mut self.handle, offset, &mut data)?;
                db_vfs.write_at(db_handle, (page_id as u64 - 1) * PAGE_SIZE as u64, &data)?;
                pages_written += 1;
            }
            locs.retain(|l| l.lsn > safe_lsn);
        }
        db_vfs.fsync(db_handle)?;
        self.index.retain(|_, locs| !locs.is_empty());
        if self.index.is_empty() {
            self.vfs.truncate(&mut self.handle, 0)?;
            self.file_len = 0;
        }
        Ok(pages_written)
    }

    pub fn active_reader_count(&self) -> usize {
        self.active_readers.len()
    }
}

pub fn wal_path_for(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_os_string();
    s.push("-wal");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;

    fn temp_wal(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_wal_test_{}_{}", std::process::id(), name));
        p
    }

    #[test]
    fn commit_then_read_snapshot() {
        let path = temp_wal("commit_read");
        std::fs::remove_file(&path).ok();
        let mut wal = Wal::open(Rc::new(OsVfs), &path).unwrap();
        wal.begin_writer().unwrap();
        wal.write_page(2, &vec![7u8; PAGE_SIZE]).unwrap();
        let lsn = wal.commit_writer().unwrap();
        let page = wal.read_page(2, lsn).unwrap().unwrap();
        assert_eq!(page[0], 7);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn reader_does_not_see_later_writer() {
        let path = temp_wal("snapshot_isolation");
        std::fs::remove_file(&path).ok();
        let mut wal = Wal::open(Rc::new(OsVfs), &path).unwrap();
        wal.begin_writer().unwrap();
        wal.write_page(2, &vec![1u8; PAGE_SIZE]).unwrap();
        wal.commit_writer().unwrap();

        let (reader_id, snapshot) = wal.begin_reader();

        wal.begin_writer().unwrap();
        wal.write_page(2, &vec![2u8; PAGE_SIZE]).unwrap();
        wal.commit_writer().unwrap();

        let seen = wal.read_page(2, snapshot).unwrap().unwrap();
        assert_eq!(seen[0], 1);
        wal.end_reader(reader_id).unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn double_begin_writer_errors() {
        let path = temp_wal("double_writer");
        std::fs::remove_file(&path).ok();
        let mut wal = Wal::open(Rc::new(OsVfs), &path).unwrap();
        wal.begin_writer().unwrap();
        assert!(matches!(wal.begin_writer(), Err(Error::WriterAlreadyActive)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn recovery_rebuilds_index() {
        let path = temp_wal("recovery");
        std::fs::remove_file(&path).ok();
        {
            let mut wal = Wal::open(Rc::new(OsVfs), &path).unwrap();
            wal.begin_writer().unwrap();
            wal.write_page(5, &vec![9u8; PAGE_SIZE]).unwrap();
            wal.commit_writer().unwrap();
        }
        let mut reopened = Wal::open(Rc::new(OsVfs), &path).unwrap();
        let lsn = reopened.latest_lsn();
        let page = reopened.read_page(5, lsn).unwrap().unwrap();
        assert_eq!(page[0], 9);
        std::fs::remove_file(&path).ok();
    }
}
