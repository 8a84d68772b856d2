//! Embedded single-file relational database engine (§1-§9): a paged heap with a WAL, a
//! CLOCK-managed buffer pool, an on-disk B-tree, MVCC snapshot reads, a small catalog, and a
//! SQL subset on top. [`Db`] is the top-level handle external callers use; every lower layer
//! (`pager`, `wal`, `btree`, `catalog`, `storage`, `sql`) is also exported for embedders that
//! want to work a layer below the SQL surface directly.

pub mod btree;
pub mod catalog;
pub mod config;
pub mod dbheader;
pub mod error;
pub mod pager;
pub mod record;
pub mod sql;
pub mod storage;
pub mod trigram;
pub mod varint;
pub mod vfs;
pub mod wal;

use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use catalog::Catalog;
use error::DbResult;
use pager::Pager;
use vfs::{OsVfs, Vfs};

/// A single open database file: the pager (behind a mutex so read transactions can share it
/// across threads) plus the in-memory catalog handle that addresses the on-disk schema btree.
pub struct Db {
    pager: Arc<Mutex<Pager>>,
    catalog: Catalog,
}

impl Db {
    /// Opens (creating if absent) the database file at `path` using the real OS filesystem.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open_with_vfs(Rc::new(OsVfs), path)
    }

    /// Opens a database through an arbitrary [`Vfs`], e.g. a [`vfs::FaultVfs`] in tests.
    pub fn open_with_vfs(vfs: Rc<dyn Vfs>, path: impl AsRef<Path>) -> DbResult<Self> {
        let pager = Pager::open(vfs, path.as_ref())?;
        let root_catalog = pager.header().root_catalog;
        Ok(Self { pager: Arc::new(Mutex::new(pager)), catalog: Catalog::new(root_catalog) })
    }

    /// Parses and runs one SQL statement, wrapping it in its own write transaction unless it
    /// is a read-only `SELECT`. Returns result rows formatted as `"col|col|..."`.
    pub fn exec_sql(&mut self, sql: &str) -> DbResult<Vec<String>> {
        let is_select = sql.trim_start().get(0..6).map(|s| s.eq_ignore_ascii_case("select")).unwrap_or(false);
        let mut pager = self.pager.lock().expect("pager mutex poisoned");
        if is_select {
            return sql::exec_sql(&mut pager, &mut self.catalog, sql);
        }
        pager.begin_write()?;
        match sql::exec_sql(&mut pager, &mut self.catalog, sql) {
            Ok(rows) => {
                pager.commit()?;
                Ok(rows)
            }
            Err(e) => {
                pager.rollback()?;
                Err(e)
            }
        }
    }

    /// Begins a read-only transaction pinned to the current snapshot. Dropping the returned
    /// guard ends the transaction.
    pub fn begin_read(&self) -> pager::ReadTxnGuard {
        pager::begin_read(&self.pager)
    }

    /// Folds every buffered trigram delta into its index's postings, then reconciles the WAL
    /// into the main file (folding every frame at or below the oldest active reader's
    /// snapshot LSN, or the latest LSN if there are no active readers).
    pub fn checkpoint(&mut self) -> DbResult<usize> {
        let mut pager = self.pager.lock().expect("pager mutex poisoned");
        if !self.catalog.trigram_deltas.is_empty() {
            pager.begin_write()?;
            match storage::drain_trigram_deltas(&mut pager, &mut self.catalog) {
                Ok(()) => pager.commit()?,
                Err(e) => {
                    pager.rollback()?;
                    return Err(e);
                }
            }
        }
        Ok(pager.checkpoint()?)
    }

    /// Names of every user table known to the catalog.
    pub fn table_names(&self) -> DbResult<Vec<String>> {
        let mut pager = self.pager.lock().expect("pager mutex poisoned");
        Ok(self.catalog.table_names(&mut pager)?)
    }

    /// Compacts one table's btree, reclaiming space left by tombstones and underflowed pages.
    pub fn vacuum_table(&mut self, table_name: &str) -> DbResult<()> {
        let mut pager = self.pager.lock().expect("pager mutex poisoned");
        pager.begin_write()?;
        match storage::vacuum_table(&mut pager, &mut self.catalog, table_name) {
            Ok(()) => {
                pager.commit()?;
                Ok(())
            }
            Err(e) => {
                pager.rollback()?;
                Err(e)
            }
        }
    }

    /// Rebuilds the whole database into a fresh file at `dst_path`: schema copied in
    /// dependency order, rows bulk-loaded table by table, and only non-redundant indexes
    /// recreated. Unlike `vacuum_table`, this compacts every table and drops redundant
    /// indexes rather than rewriting one table's btree in place.
    pub fn vacuum_into(&mut self, dst_path: impl AsRef<Path>) -> DbResult<()> {
        let mut dst = Db::open(dst_path)?;
        let mut src_pager = self.pager.lock().expect("pager mutex poisoned");
        let mut dst_pager = dst.pager.lock().expect("pager mutex poisoned");
        storage::vacuum_db(&mut src_pager, &mut self.catalog, &mut dst_pager, &mut dst.catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_lib_test_{}_{}", std::process::id(), name));
        std::fs::remove_file(&p).ok();
        std::fs::remove_file(wal::wal_path_for(&p)).ok();
        p
    }

    #[test]
    fn open_create_insert_select() {
        let path = temp_db_path("open_crud");
        let mut db = Db::open(&path).unwrap();
        db.exec_sql("CREATE TABLE widgets (id INT PRIMARY KEY, name TEXT)").unwrap();
        db.exec_sql("INSERT INTO widgets (id, name) VALUES (1, 'bolt')").unwrap();
        let rows = db.exec_sql("SELECT id, name FROM widgets").unwrap();
        assert_eq!(rows, vec!["1|bolt".to_string()]);
        assert_eq!(db.table_names().unwrap(), vec!["widgets".to_string()]);
    }

    #[test]
    fn checkpoint_after_writes_succeeds() {
        let path = temp_db_path("checkpoint");
        let mut db = Db::open(&path).unwrap();
        db.exec_sql("CREATE TABLE t (id INT PRIMARY KEY)").unwrap();
        db.exec_sql("INSERT INTO t (id) VALUES (1)").unwrap();
        db.checkpoint().unwrap();
        let rows = db.exec_sql("SELECT id FROM t").unwrap();
        assert_eq!(rows, vec!["1".to_string()]);
    }
}
