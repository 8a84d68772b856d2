//! End-to-end scenarios (§8) driven through the public `Db` handle only.

use std::rc::Rc;
use std::sync::{Arc, Mutex};

use pagedb::pager::{begin_read, Pager};
use pagedb::vfs::OsVfs;
use pagedb::varint::{decode_zigzag, encode_zigzag};
use pagedb::Db;

fn temp_path(name: &str) -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("pagedb_it_{}_{}", std::process::id(), name));
    std::fs::remove_file(&p).ok();
    std::fs::remove_file(pagedb::wal::wal_path_for(&p)).ok();
    p
}

#[test]
fn zigzag_roundtrip_boundaries() {
    for v in [0i64, -1, 63, -64, 64, -65, i64::MAX, i64::MIN] {
        assert_eq!(decode_zigzag(encode_zigzag(v)), v);
    }
}

#[test]
fn int_pk_rowid_optimization_end_to_end() {
    let path = temp_path("int_pk");
    let mut db = Db::open(&path).unwrap();
    db.exec_sql("CREATE TABLE users (id INT PRIMARY KEY, name TEXT)").unwrap();
    db.exec_sql("INSERT INTO users (id, name) VALUES (42, 'ada')").unwrap();
    let rows = db.exec_sql("SELECT name FROM users WHERE id = 42").unwrap();
    assert_eq!(rows, vec!["ada".to_string()]);
}

#[test]
fn leaf_split_with_mixed_cell_sizes() {
    let path = temp_path("mixed_split");
    let mut db = Db::open(&path).unwrap();
    db.exec_sql("CREATE TABLE docs (id INT PRIMARY KEY, body TEXT)").unwrap();
    for i in 0..300i64 {
        let body = if i % 7 == 0 { "x".repeat(500) } else { "y".repeat(8) };
        db.exec_sql(&format!("INSERT INTO docs (id, body) VALUES ({i}, '{body}')")).unwrap();
    }
    let rows = db.exec_sql("SELECT id FROM docs ORDER BY id").unwrap();
    assert_eq!(rows.len(), 300);
    assert_eq!(rows[0], "0");
    assert_eq!(rows[299], "299");
}

#[test]
fn unique_and_foreign_key_constraints_enforced() {
    let path = temp_path("constraints");
    let mut db = Db::open(&path).unwrap();
    db.exec_sql("CREATE TABLE authors (id INT PRIMARY KEY, email TEXT UNIQUE)").unwrap();
    db.exec_sql("CREATE TABLE books (id INT PRIMARY KEY, author_id INT REFERENCES authors(id))").unwrap();
    db.exec_sql("INSERT INTO authors (id, email) VALUES (1, 'a@example.com')").unwrap();
    assert!(db.exec_sql("INSERT INTO authors (id, email) VALUES (2, 'a@example.com')").is_err());
    db.exec_sql("INSERT INTO books (id, author_id) VALUES (1, 1)").unwrap();
    assert!(db.exec_sql("INSERT INTO books (id, author_id) VALUES (2, 99)").is_err());
}

#[test]
fn trigram_like_query_after_checkpoint() {
    let path = temp_path("trigram");
    let mut db = Db::open(&path).unwrap();
    db.exec_sql("CREATE TABLE docs (id INT PRIMARY KEY, body TEXT)").unwrap();
    db.exec_sql("CREATE INDEX docs_body_trgm ON docs (body) USING TRIGRAM").unwrap();
    db.exec_sql("INSERT INTO docs (id, body) VALUES (1, 'the quick brown fox')").unwrap();
    db.exec_sql("INSERT INTO docs (id, body) VALUES (2, 'lazy dog sleeps')").unwrap();
    db.checkpoint().unwrap();
    let rows = db.exec_sql("SELECT id FROM docs WHERE body LIKE '%brown%'").unwrap();
    assert_eq!(rows, vec!["1".to_string()]);
}

#[test]
fn reader_sees_consistent_snapshot_across_checkpoint() {
    let path = temp_path("reader_checkpoint");
    let pager = Arc::new(Mutex::new(Pager::open(Rc::new(OsVfs), &path).unwrap()));
    let page_id = {
        let mut p = pager.lock().unwrap();
        p.begin_write().unwrap();
        let id = p.allocate_page().unwrap();
        p.write_page(id, &vec![7u8; pagedb::config::PAGE_SIZE]).unwrap();
        p.commit().unwrap();
        id
    };

    let guard = begin_read(&pager);
    {
        let mut p = pager.lock().unwrap();
        p.begin_write().unwrap();
        p.write_page(page_id, &vec![9u8; pagedb::config::PAGE_SIZE]).unwrap();
        p.commit().unwrap();
        p.checkpoint().unwrap();
    }
    let seen = pager.lock().unwrap().read_page_snapshot(page_id, guard.snapshot_lsn).unwrap();
    assert_eq!(seen[0], 7, "long-lived reader must not observe a write made after its snapshot, even across a checkpoint");
    drop(guard);

    let latest = pager.lock().unwrap().read_page_ro(page_id).unwrap();
    assert_eq!(latest[0], 9);
}

#[test]
fn crash_mid_write_recovers_prior_committed_state() {
    use std::io::Write as _;

    let path = temp_path("crash_recovery");
    {
        let mut db = Db::open(&path).unwrap();
        db.exec_sql("CREATE TABLE t (id INT PRIMARY KEY, v TEXT)").unwrap();
        db.exec_sql("INSERT INTO t (id, v) VALUES (1, 'before')").unwrap();
    }

    // Simulate a crash mid-write of the next WAL frame: append a torn (incomplete, garbage)
    // frame after the last valid one. Recovery must stop at the first bad checksum and still
    // surface everything committed before it.
    let wal_path = pagedb::wal::wal_path_for(&path);
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&wal_path).unwrap();
        f.write_all(&[0xDEu8; 37]).unwrap();
    }

    let mut reopened = Db::open(&path).unwrap();
    let rows = reopened.exec_sql("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(rows, vec!["before".to_string()]);
}

#[test]
fn update_and_vacuum_preserve_rows() {
    let path = temp_path("vacuum");
    let mut db = Db::open(&path).unwrap();
    db.exec_sql("CREATE TABLE t (id INT PRIMARY KEY, v TEXT)").unwrap();
    for i in 0..50i64 {
        db.exec_sql(&format!("INSERT INTO t (id, v) VALUES ({i}, 'row{i}')")).unwrap();
    }
    for i in 0..25i64 {
        db.exec_sql(&format!("DELETE FROM t WHERE id = {i}")).unwrap();
    }
    db.vacuum_table("t").unwrap();
    let rows = db.exec_sql("SELECT id FROM t ORDER BY id").unwrap();
    assert_eq!(rows.len(), 25);
    assert_eq!(rows[0], "25");
}
