//! Virtual File System abstraction (§4.1).
//!
//! Opens and locks database files and provides byte-addressable read/write/fsync/truncate.
//! The production implementation, [`OsVfs`], wraps `std::fs::File` directly; [`FaultVfs`]
//! decorates any `Vfs` with a rule queue for crash-safety testing (inject an error, drop an
//! fsync, or truncate a write partway through).

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("error opening file: {0}")]
    OpenFailed(String),
    #[error("error reading file: {0}")]
    ReadFailed(String),
    #[error("error writing file: {0}")]
    WriteFailed(String),
    #[error("error syncing file: {0}")]
    SyncFailed(String),
    #[error("error truncating file: {0}")]
    TruncateFailed(String),
    #[error("fault injected: {0}")]
    Injected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    Read,
    Write,
    Fsync,
    Truncate,
}

/// A handle to an open file. Opaque to callers beyond what `Vfs` methods need.
pub struct Handle(std::fs::File);

/// File access abstraction that all disk I/O in the engine goes through.
pub trait Vfs {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<Handle, Error>;
    /// Read up to `buf.len()` bytes starting at `offset`. Reading past end-of-file returns
    /// zero bytes without error (short read, not an error).
    fn read_at(&self, h: &mut Handle, offset: u64, buf: &mut [u8]) -> Result<usize, Error>;
    /// Write must not return success unless the bytes reached the OS; durability is only
    /// promised after a successful `fsync`.
    fn write_at(&self, h: &mut Handle, offset: u64, buf: &[u8]) -> Result<usize, Error>;
    fn fsync(&self, h: &mut Handle) -> Result<(), Error>;
    /// Extends with zero-filled bytes when growing.
    fn truncate(&self, h: &mut Handle, size: u64) -> Result<(), Error>;
    fn len(&self, h: &mut Handle) -> Result<u64, Error>;
}

/// Plain OS-backed VFS.
#[derive(Default)]
pub struct OsVfs;

impl Vfs for OsVfs {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<Handle, Error> {
        let f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .open(path)
            .map_err(|e| Error::OpenFailed(e.to_string()))?;
        Ok(Handle(f))
    }

    fn read_at(&self, h: &mut Handle, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let len = h.0.metadata().map_err(|e| Error::ReadFailed(e.to_string()))?.len();
        if offset >= len {
            return Ok(0);
        }
        h.0.seek(SeekFrom::Start(offset)).map_err(|e| Error::ReadFailed(e.to_string()))?;
        let avail = (len - offset) as usize;
        let to_read = buf.len().min(avail);
        h.0.read_exact(&mut buf[..to_read]).map_err(|e| Error::ReadFailed(e.to_string()))?;
        for b in &mut buf[to_read..] {
            *b = 0;
        }
        Ok(to_read)
    }

    fn write_at(&self, h: &mut Handle, offset: u64, buf: &[u8]) -> Result<usize, Error> {
        h.0.seek(SeekFrom::Start(offset)).map_err(|e| Error::WriteFailed(e.to_string()))?;
        h.0.write_all(buf).map_err(|e| Error::WriteFailed(e.to_string()))?;
        Ok(buf.len())
    }

    fn fsync(&self, h: &mut Handle) -> Result<(), Error> {
        h.0.sync_all().map_err(|e| Error::SyncFailed(e.to_string()))
    }

    fn truncate(&self, h: &mut Handle, size: u64) -> Result<(), Error> {
        h.0.set_len(size).map_err(|e| Error::TruncateFailed(e.to_string()))
    }

    fn len(&self, h: &mut Handle) -> Result<u64, Error> {
        h.0.metadata().map(|m| m.len()).map_err(|e| Error::ReadFailed(e.to_string()))
    }
}

/// A fault-injection rule: the next `remaining` matching operations trigger `action`.
#[derive(Debug, Clone)]
pub struct FaultRule {
    pub op: Op,
    pub remaining: u64,
    pub action: FaultAction,
}

#[derive(Debug, Clone)]
pub enum FaultAction {
    /// Return an error instead of performing the operation.
    Error,
    /// Pretend fsync succeeded without actually flushing durably.
    DropFsync,
    /// Report fewer bytes written/read than requested.
    PartialWrite(usize),
}

#[derive(Debug, Clone)]
pub struct LoggedOp {
    pub op: Op,
    pub path: PathBuf,
    pub offset: Option<u64>,
    pub len: Option<usize>,
}

/// Decorates an inner `Vfs` with a queue of fault rules, consumed FIFO per matching op,
/// and a log of every operation performed (for test assertions).
pub struct FaultVfs<V: Vfs> {
    inner: V,
    rules: std::sync::Mutex<std::collections::VecDeque<FaultRule>>,
    log: std::sync::Mutex<Vec<LoggedOp>>,
    dropped_fsyncs: std::sync::Mutex<Vec<PathBuf>>,
}

impl<V: Vfs> FaultVfs<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            rules: std::sync::Mutex::new(std::collections::VecDeque::new()),
            log: std::sync::Mutex::new(Vec::new()),
            dropped_fsyncs: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn push_rule(&self, rule: FaultRule) {
        self.rules.lock().unwrap().push_back(rule);
    }

    pub fn log(&self) -> Vec<LoggedOp> {
        self.log.lock().unwrap().clone()
    }

    /// Returns true if an fsync on `path` was ever silently dropped (data not actually durable).
    pub fn fsync_was_dropped(&self, path: &Path) -> bool {
        self.dropped_fsyncs.lock().unwrap().iter().any(|p| p == path)
    }

    fn take_action(&self, op: Op) -> Option<FaultAction> {
        let mut rules = self.rules.lock().unwrap();
        if let Some(front) = rules.front_mut() {
            if front.op == op {
                front.remaining = front.remaining.saturating_sub(1);
                let action = front.action.clone();
                if front.remaining == 0 {
                    rules.pop_front();
                }
                return Some(action);
            }
        }
        None
    }

    fn record(&self, op: Op, path: &Path, offset: Option<u64>, len: Option<usize>) {
        self.log.lock().unwrap().push(LoggedOp { op, path: path.to_path_buf(), offset, len });
    }
}

impl<V: Vfs> Vfs for FaultVfs<V> {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<Handle, Error> {
        self.record(Op::Open, path, None, None);
        if let Some(FaultAction::Error) = self.take_action(Op::Open) {
            return Err(Error::Injected("open".into()));
        }
        self.inner.open(path, create_if_missing)
    }

    fn read_at(&self, h: &mut Handle, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        self.record(Op::Read, Path::new(""), Some(offset), Some(buf.len()));
        match self.take_action(Op::Read) {
            Some(FaultAction::Error) => Err(Error::Injected("read".into())),
            Some(FaultAction::PartialWrite(n)) => {
                let n = n.min(buf.len());
                self.inner.read_at(h, offset, &mut buf[..n])
            }
            _ => self.inner.read_at(h, offset, buf),
        }
    }

    fn write_at(&self, h: &mut Handle, offset: u64, buf: &[u8]) -> Result<usize, Error> {
        self.record(Op::Write, Path::new(""), Some(offset), Some(buf.len()));
        match self.take_action(Op::Write) {
            Some(FaultAction::Error) => Err(Error::Injected("write".into())),
            Some(FaultAction::PartialWrite(n)) => {
                let n = n.min(buf.len());
                self.inner.write_at(h, offset, &buf[..n])
            }
            _ => self.inner.write_at(h, offset, buf),
        }
    }

    fn fsync(&self, h: &mut Handle) -> Result<(), Error> {
        self.record(Op::Fsync, Path::new(""), None, None);
        match self.take_action(Op::Fsync) {
            Some(FaultAction::Error) => Err(Error::Injected("fsync".into())),
            Some(FaultAction::DropFsync) => {
                self.dropped_fsyncs.lock().unwrap().push(PathBuf::new());
                Ok(())
            }
            _ => self.inner.fsync(h),
        }
    }

    fn truncate(&self, h: &mut Handle, size: u64) -> Result<(), Error> {
        self.record(Op::Truncate, Path::new(""), Some(size), None);
        if let Some(FaultAction::Error) = self.take_action(Op::Truncate) {
            return Err(Error::Injected("truncate".into()));
        }
        self.inner.truncate(h, size)
    }

    fn len(&self, h: &mut Handle) -> Result<u64, Error> {
        self.inner.len(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_vfs_test_{}_{}", std::process::id(), name));
        p
    }

    #[test]
    fn os_vfs_write_read_roundtrip() {
        let path = temp_path("roundtrip");
        let vfs = OsVfs;
        let mut h = vfs.open(&path, true).unwrap();
        vfs.write_at(&mut h, 0, b"hello world").unwrap();
        vfs.fsync(&mut h).unwrap();
        let mut buf = [0u8; 11];
        let n = vfs.read_at(&mut h, 0, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn read_past_eof_is_zero_not_error() {
        let path = temp_path("eof");
        let vfs = OsVfs;
        let mut h = vfs.open(&path, true).unwrap();
        vfs.write_at(&mut h, 0, b"ab").unwrap();
        let mut buf = [0xffu8; 8];
        let n = vfs.read_at(&mut h, 0, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, &[b'a', b'b', 0, 0, 0, 0, 0, 0]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncate_grows_with_zeros() {
        let path = temp_path("truncate");
        let vfs = OsVfs;
        let mut h = vfs.open(&path, true).unwrap();
        vfs.write_at(&mut h, 0, b"x").unwrap();
        vfs.truncate(&mut h, 16).unwrap();
        assert_eq!(vfs.len(&mut h).unwrap(), 16);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn fault_vfs_injects_error() {
        let path = temp_path("fault");
        let vfs = FaultVfs::new(OsVfs);
        vfs.push_rule(FaultRule { op: Op::Write, remaining: 1, action: FaultAction::Error });
        let mut h = vfs.open(&path, true).unwrap();
        let err = vfs.write_at(&mut h, 0, b"x").unwrap_err();
        assert!(matches!(err, Error::Injected(_)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn fault_vfs_drops_fsync() {
        let path = temp_path("fault_fsync");
        let vfs = FaultVfs::new(OsVfs);
        vfs.push_rule(FaultRule { op: Op::Fsync, remaining: 1, action: FaultAction::DropFsync });
        let mut h = vfs.open(&path, true).unwrap();
        vfs.fsync(&mut h).unwrap();
        assert!(vfs.fsync_was_dropped(Path::new("")));
        std::fs::remove_file(&path).ok();
    }
}
