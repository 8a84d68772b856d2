//! Schema catalog (§4.7): table/index/view metadata stored in their own small btree, keyed
//! by a hash of the object's name with linear probing on collision, plus the in-memory
//! trigram delta buffer that batches postings-list updates until the next checkpoint.

use std::collections::HashMap;

use crate::pager::Pager;
use crate::record::{decode_record, encode_record, Value};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("no catalog entry named '{0}'")]
    NotFound(String),
    #[error("catalog entry named '{0}' already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Btree(#[from] crate::btree::Error),
    #[error(transparent)]
    Record(#[from] crate::record::Error),
    #[error("invalid type name '{0}'")]
    InvalidType(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Blob,
    Bool,
}

impl ColumnType {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" | "INT64" | "BIGINT" => Ok(Self::Int),
            "FLOAT" | "DOUBLE" | "REAL" => Ok(Self::Float),
            "TEXT" | "VARCHAR" | "STRING" => Ok(Self::Text),
            "BLOB" | "BYTES" => Ok(Self::Blob),
            "BOOL" | "BOOLEAN" => Ok(Self::Bool),
            other => Err(Error::InvalidType(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Bool => "BOOL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub references: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub root_page: u32,
    /// Next rowid to assign when the table has no INT64 primary key to use as rowid.
    pub next_rowid: i64,
}

impl TableMeta {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }

    /// True when the single PK column is an INT64 (rowid optimization, §4.8).
    pub fn has_int_rowid_pk(&self) -> bool {
        self.primary_key_index().map(|i| self.columns[i].ty == ColumnType::Int).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    Trigram,
}

#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub name: String,
    pub table: String,
    pub column: String,
    pub kind: IndexKind,
    pub root_page: u32,
}

#[derive(Debug, Clone)]
pub struct ViewMeta {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone)]
enum Entry {
    Table(TableMeta),
    Index(IndexMeta),
    View(ViewMeta),
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Table(t) => &t.name,
            Entry::Index(i) => &i.name,
            Entry::View(v) => &v.name,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let values = match self {
            Entry::Table(t) => {
                let mut v = vec![Value::Text("table".into()), Value::Text(t.name.clone()), Value::Int64(t.root_page as i64)];
                v.push(Value::Int64(t.next_rowid));
                v.push(Value::Int64(t.columns.len() as i64));
                for c in &t.columns {
                    v.push(Value::Text(c.name.clone()));
                    v.push(Value::Text(c.ty.name().to_string()));
                    v.push(Value::Bool(c.not_null));
                    v.push(Value::Bool(c.primary_key));
                    v.push(Value::Bool(c.unique));
                    let (ft, fc) = c.references.clone().unwrap_or_default();
                    v.push(Value::Text(ft));
                    v.push(Value::Text(fc));
                }
                v
            }
            Entry::Index(i) => vec![
                Value::Text("index".into()),
                Value::Text(i.name.clone()),
                Value::Text(i.table.clone()),
                Value::Text(i.column.clone()),
                Value::Text(if i.kind == IndexKind::Trigram { "trigram".into() } else { "btree".into() }),
                Value::Int64(i.root_page as i64),
            ],
            Entry::View(v) => vec![Value::Text("view".into()), Value::Text(v.name.clone()), Value::Text(v.query.clone())],
        };
        encode_record(&values)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let values = decode_record(bytes)?;
        let text = |v: &Value| -> String {
            if let Value::Text(s) = v {
                s.clone()
            } else {
                String::new()
            }
        };
        let kind = text(&values[0]);
        match kind.as_str() {
            "table" => {
                let name = text(&values[1]);
                let root_page = as_i64(&values[2]) as u32;
                let next_rowid = as_i64(&values[3]);
                let num_columns = as_i64(&values[4]) as usize;
                let mut columns = Vec::with_capacity(num_columns);
                let mut idx = 5;
                for _ in 0..num_columns {
                    let col_name = text(&values[idx]);
                    let ty = ColumnType::parse(&text(&values[idx + 1]))?;
                    let not_null = as_bool(&values[idx + 2]);
                    let primary_key = as_bool(&values[idx + 3]);
                    let unique = as_bool(&values[idx + 4]);
                    let ft = text(&values[idx + 5]);
                    let fc = text(&values[idx + 6]);
                    let references = if ft.is_empty() { None } else { Some((ft, fc)) };
                    columns.push(ColumnDef { name: col_name, ty, not_null, primary_key, unique, references });
                    idx += 7;
                }
                Ok(Entry::Table(TableMeta { name, columns, root_page, next_rowid }))
            }
            "index" => Ok(Entry::Index(IndexMeta {
                name: text(&values[1]),
                table: text(&values[2]),
                column: text(&values[3]),
                kind: if text(&values[4]) == "trigram" { IndexKind::Trigram } else { IndexKind::BTree },
                root_page: as_i64(&values[5]) as u32,
            })),
            "view" => Ok(Entry::View(ViewMeta { name: text(&values[1]), query: text(&values[2]) })),
            other => Err(Error::InvalidType(other.to_string())),
        }
    }
}

fn as_i64(v: &Value) -> i64 {
    if let Value::Int64(i) = v {
        *i
    } else {
        0
    }
}

fn as_bool(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

const MAX_PROBE: u64 = 1000;

/// Trigram delta: `(index_name, trigram) -> (rowids_added, rowids_removed)`, buffered in
/// memory and only reconciled into the trigram postings btree at checkpoint (§4.7, §9).
#[derive(Default)]
pub struct TrigramDeltaBuffer {
    deltas: HashMap<(String, String), (Vec<i64>, Vec<i64>)>,
}

impl TrigramDeltaBuffer {
    pub fn add(&mut self, index_name: &str, trigram: &str, rowid: i64) {
        let entry = self.deltas.entry((index_name.to_string(), trigram.to_string())).or_default();
        entry.0.push(rowid);
    }

    pub fn remove(&mut self, index_name: &str, trigram: &str, rowid: i64) {
        let entry = self.deltas.entry((index_name.to_string(), trigram.to_string())).or_default();
        entry.1.push(rowid);
    }

    pub fn drain(&mut self) -> Vec<(String, String, Vec<i64>, Vec<i64>)> {
        self.deltas.drain().map(|((idx, tri), (adds, removes))| (idx, tri, adds, removes)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Pending adds/removes for one `(index, trigram)` pair not yet folded into the on-disk
    /// postings. Readers union this against the postings btree so a `LIKE` query sees rows
    /// written since the last checkpoint.
    pub fn pending(&self, index_name: &str, trigram: &str) -> (&[i64], &[i64]) {
        match self.deltas.get(&(index_name.to_string(), trigram.to_string())) {
            Some((adds, removes)) => (adds.as_slice(), removes.as_slice()),
            None => (&[], &[]),
        }
    }
}

pub struct Catalog {
    root_page: u32,
    pub trigram_deltas: TrigramDeltaBuffer,
}

impl Catalog {
    pub fn new(root_page: u32) -> Self {
        Self { root_page, trigram_deltas: TrigramDeltaBuffer::default() }
    }

    fn probe_key(&self, pager: &mut Pager, name: &str, want_insert_slot: bool) -> Result<Option<u64>> {
        let base = fnv1a(name);
        for i in 0..MAX_PROBE {
            let key = base.wrapping_add(i);
            match crate::btree::find(pager, self.root_page, key)? {
                Some(bytes) => {
                    let entry = Entry::decode(&bytes)?;
                    if entry.name() == name {
                        return Ok(Some(key));
                    }
                }
                None => {
                    if want_insert_slot {
                        return Ok(Some(key));
                    }
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    fn lookup(&self, pager: &mut Pager, name: &str) -> Result<Option<Entry>> {
        match self.probe_key(pager, name, false)? {
            Some(key) => Ok(crate::btree::find(pager, self.root_page, key)?.map(|b| Entry::decode(&b)).transpose()?),
            None => Ok(None),
        }
    }

    fn insert_entry(&mut self, pager: &mut Pager, entry: Entry) -> Result<()> {
        if self.lookup(pager, entry.name())?.is_some() {
            return Err(Error::AlreadyExists(entry.name().to_string()));
        }
        let key = self.probe_key(pager, entry.name(), true)?.expect("probe budget exhausted");
        crate::btree::insert(pager, self.root_page, key, entry.encode())?;
        Ok(())
    }

    fn remove_entry(&mut self, pager: &mut Pager, name: &str) -> Result<()> {
        let key = self.probe_key(pager, name, false)?.ok_or_else(|| Error::NotFound(name.to_string()))?;
        crate::btree::delete(pager, self.root_page, key)?;
        Ok(())
    }

    pub fn create_table(&mut self, pager: &mut Pager, table: TableMeta) -> Result<()> {
        self.insert_entry(pager, Entry::Table(table))
    }

    pub fn get_table(&self, pager: &mut Pager, name: &str) -> Result<TableMeta> {
        match self.lookup(pager, name)? {
            Some(Entry::Table(t)) => Ok(t),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }

    pub fn update_table_root(&mut self, pager: &mut Pager, name: &str, new_root: u32) -> Result<()> {
        let mut t = self.get_table(pager, name)?;
        t.root_page = new_root;
        self.remove_entry(pager, name)?;
        self.insert_entry(pager, Entry::Table(t))
    }

    pub fn drop_table(&mut self, pager: &mut Pager, name: &str) -> Result<()> {
        self.remove_entry(pager, name)
    }

    /// Reserve and return the next auto-assigned rowid for a table with no INT64 PK.
    pub fn reserve_next_rowid(&mut self, pager: &mut Pager, name: &str) -> Result<i64> {
        let mut t = self.get_table(pager, name)?;
        let rowid = t.next_rowid;
        t.next_rowid += 1;
        self.remove_entry(pager, name)?;
        self.insert_entry(pager, Entry::Table(t))?;
        Ok(rowid)
    }

    pub fn create_index(&mut self, pager: &mut Pager, index: IndexMeta) -> Result<()> {
        self.insert_entry(pager, Entry::Index(index))
    }

    pub fn update_index_root(&mut self, pager: &mut Pager, name: &str, new_root: u32) -> Result<()> {
        let mut i = self.get_index(pager, name)?;
        i.root_page = new_root;
        self.remove_entry(pager, name)?;
        self.insert_entry(pager, Entry::Index(i))
    }

    pub fn drop_index(&mut self, pager: &mut Pager, name: &str) -> Result<()> {
        self.remove_entry(pager, name)
    }

    pub fn get_index(&self, pager: &mut Pager, name: &str) -> Result<IndexMeta> {
        match self.lookup(pager, name)? {
            Some(Entry::Index(i)) => Ok(i),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }

    pub fn indexes_for_table(&self, pager: &mut Pager, table: &str) -> Result<Vec<IndexMeta>> {
        let mut cursor = crate::btree::open_cursor(pager, self.root_page)?;
        let mut out = Vec::new();
        while let Some((_, bytes)) = cursor.next(pager)? {
            if let Ok(Entry::Index(i)) = Entry::decode(&bytes) {
                if i.table == table {
                    out.push(i);
                }
            }
        }
        Ok(out)
    }

    pub fn create_view(&mut self, pager: &mut Pager, view: ViewMeta) -> Result<()> {
        self.insert_entry(pager, Entry::View(view))
    }

    pub fn get_view(&self, pager: &mut Pager, name: &str) -> Result<ViewMeta> {
        match self.lookup(pager, name)? {
            Some(Entry::View(v)) => Ok(v),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }

    pub fn table_names(&self, pager: &mut Pager) -> Result<Vec<String>> {
        let mut cursor = crate::btree::open_cursor(pager, self.root_page)?;
        let mut out = Vec::new();
        while let Some((_, bytes)) = cursor.next(pager)? {
            if let Ok(Entry::Table(t)) = Entry::decode(&bytes) {
                out.push(t.name);
            }
        }
        Ok(out)
    }

    pub fn view_names(&self, pager: &mut Pager) -> Result<Vec<String>> {
        let mut cursor = crate::btree::open_cursor(pager, self.root_page)?;
        let mut out = Vec::new();
        while let Some((_, bytes)) = cursor.next(pager)? {
            if let Ok(Entry::View(v)) = Entry::decode(&bytes) {
                out.push(v.name);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;
    use std::rc::Rc;

    fn temp_pager(name: &str) -> Pager {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_catalog_test_{}_{}", std::process::id(), name));
        std::fs::remove_file(&p).ok();
        std::fs::remove_file(crate::wal::wal_path_for(&p)).ok();
        Pager::open(Rc::new(OsVfs), &p).unwrap()
    }

    fn sample_table(name: &str, root_page: u32) -> TableMeta {
        TableMeta {
            name: name.to_string(),
            columns: vec![
                ColumnDef { name: "id".into(), ty: ColumnType::Int, not_null: true, primary_key: true, unique: true, references: None },
                ColumnDef { name: "name".into(), ty: ColumnType::Text, not_null: false, primary_key: false, unique: false, references: None },
            ],
            root_page,
            next_rowid: 1,
        }
    }

    #[test]
    fn create_and_fetch_table() {
        let mut pager = temp_pager("create_fetch");
        pager.begin_write().unwrap();
        let mut catalog = Catalog::new(2);
        catalog.create_table(&mut pager, sample_table("widgets", 10)).unwrap();
        pager.commit().unwrap();

        let fetched = catalog.get_table(&mut pager, "widgets").unwrap();
        assert_eq!(fetched.name, "widgets");
        assert_eq!(fetched.columns.len(), 2);
        assert!(fetched.has_int_rowid_pk());
    }

    #[test]
    fn duplicate_table_name_rejected() {
        let mut pager = temp_pager("duplicate");
        pager.begin_write().unwrap();
        let mut catalog = Catalog::new(2);
        catalog.create_table(&mut pager, sample_table("widgets", 10)).unwrap();
        let err = catalog.create_table(&mut pager, sample_table("widgets", 20)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn missing_table_is_not_found() {
        let mut pager = temp_pager("missing");
        pager.begin_write().unwrap();
        let catalog = Catalog::new(2);
        assert!(matches!(catalog.get_table(&mut pager, "ghost"), Err(Error::NotFound(_))));
    }
}
