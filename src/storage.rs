//! Row-level storage glue (§4.8): ties the btree, record codec, and catalog together into
//! `insertRow`/`updateRow`/`deleteRow`/`indexSeek`/`bulkLoad`/`rebuildIndex`/`vacuumDb`,
//! including constraint enforcement and the INT64-primary-key rowid optimization.

use crate::catalog::{Catalog, ColumnType, IndexKind, IndexMeta, TableMeta};
use crate::error::{DbError, DbResult};
use crate::pager::Pager;
use crate::record::{self, Value};

/// Maps a signed rowid to a btree key while preserving ordering: flipping the sign bit
/// turns two's-complement ordering into unsigned ordering.
pub fn rowid_to_key(rowid: i64) -> u64 {
    (rowid as u64) ^ (1u64 << 63)
}

pub fn key_to_rowid(key: u64) -> i64 {
    (key ^ (1u64 << 63)) as i64
}

fn encode_single_value(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    record::encode_value(v, &mut out);
    out
}

fn index_key_base(v: &Value) -> u64 {
    crc32c::crc32c(&encode_single_value(v)) as u64
}

const MAX_INDEX_PROBE: u64 = 1000;

/// Insert `rowid` under `value` into a non-unique index's CRC32C-keyed, collision-safe slot.
fn index_insert(pager: &mut Pager, root: u32, value: &Value, rowid: i64) -> DbResult<u32> {
    let base = index_key_base(value);
    let mut root = root;
    for i in 0..MAX_INDEX_PROBE {
        let key = base.wrapping_add(i);
        match crate::btree::find(pager, root, key)? {
            Some(bytes) => {
                let mut values = record::decode_record(&bytes)?;
                if &values[0] == value {
                    values.push(Value::Int64(rowid));
                    root = crate::btree::insert(pager, root, key, record::encode_record(&values))?;
                    return Ok(root);
                }
            }
            None => {
                let values = vec![value.clone(), Value::Int64(rowid)];
                root = crate::btree::insert(pager, root, key, record::encode_record(&values))?;
                return Ok(root);
            }
        }
    }
    Err(DbError::internal("index probe sequence exhausted (too many hash collisions)"))
}

fn index_remove(pager: &mut Pager, root: u32, value: &Value, rowid: i64) -> DbResult<()> {
    let base = index_key_base(value);
    for i in 0..MAX_INDEX_PROBE {
        let key = base.wrapping_add(i);
        let Some(bytes) = crate::btree::find(pager, root, key)? else { return Ok(()) };
        let mut values = record::decode_record(&bytes)?;
        if &values[0] != value {
            continue;
        }
        // Remove exactly one matching rowid entry (entries after index 0 are rowids).
        if let Some(pos) = values.iter().skip(1).position(|v| matches!(v, Value::Int64(r) if *r == rowid)) {
            values.remove(pos + 1);
        }
        if values.len() <= 1 {
            crate::btree::delete(pager, root, key)?;
        } else {
            crate::btree::insert(pager, root, key, record::encode_record(&values))?;
        }
        return Ok(());
    }
    Ok(())
}

/// Look up every rowid whose indexed column exactly equals `value`.
pub fn index_seek(pager: &mut Pager, root: u32, value: &Value) -> DbResult<Vec<i64>> {
    let base = index_key_base(value);
    for i in 0..MAX_INDEX_PROBE {
        let key = base.wrapping_add(i);
        let Some(bytes) = crate::btree::find(pager, root, key)? else { return Ok(Vec::new()) };
        let values = record::decode_record(&bytes)?;
        if &values[0] == value {
            return Ok(values[1..]
                .iter()
                .filter_map(|v| if let Value::Int64(r) = v { Some(*r) } else { None })
                .collect());
        }
    }
    Ok(Vec::new())
}

fn row_key(table: &TableMeta, row: &[Value], rowid: i64) -> u64 {
    if table.has_int_rowid_pk() {
        let pk_idx = table.primary_key_index().unwrap();
        if let Value::Int64(v) = &row[pk_idx] {
            return rowid_to_key(*v);
        }
    }
    rowid_to_key(rowid)
}

fn check_not_null(table: &TableMeta, row: &[Value]) -> DbResult<()> {
    for (i, col) in table.columns.iter().enumerate() {
        if col.not_null && matches!(row[i], Value::Null) {
            return Err(DbError::constraint(format!("column '{}' may not be NULL", col.name)));
        }
    }
    Ok(())
}

fn check_fk(pager: &mut Pager, catalog: &Catalog, table: &TableMeta, row: &[Value]) -> DbResult<()> {
    for (i, col) in table.columns.iter().enumerate() {
        if let Some((ref_table, ref_col)) = &col.references {
            if matches!(row[i], Value::Null) {
                continue;
            }
            let parent = catalog.get_table(pager, ref_table)?;
            let parent_col_idx = parent
                .column_index(ref_col)
                .ok_or_else(|| DbError::constraint(format!("referenced column '{ref_table}.{ref_col}' does not exist")))?;
            let found = if parent.primary_key_index() == Some(parent_col_idx) && parent.has_int_rowid_pk() {
                if let Value::Int64(v) = &row[i] {
                    crate::btree::find(pager, parent.root_page, rowid_to_key(*v))?.is_some()
                } else {
                    false
                }
            } else {
                let indexes = catalog.indexes_for_table(pager, ref_table)?;
                let mut found = false;
                for idx in indexes {
                    if idx.column == *ref_col {
                        found = !index_seek(pager, idx.root_page, &row[i])?.is_empty();
                        break;
                    }
                }
                found
            };
            if !found {
                return Err(DbError::constraint(format!(
                    "foreign key violation: no row in '{ref_table}.{ref_col}' matches '{}.{}'",
                    table.name, col.name
                )));
            }
        }
    }
    Ok(())
}

fn check_constraints(pager: &mut Pager, catalog: &Catalog, table: &TableMeta, row: &[Value]) -> DbResult<()> {
    check_not_null(table, row)?;
    check_fk(pager, catalog, table, row)
}

/// Insert a new row, enforcing NOT NULL/UNIQUE/FOREIGN KEY, normalizing oversized values,
/// and maintaining every index on the table. Returns the assigned rowid.
pub fn insert_row(pager: &mut Pager, catalog: &mut Catalog, table_name: &str, row: Vec<Value>) -> DbResult<i64> {
    let mut table = catalog.get_table(pager, table_name)?;
    if row.len() != table.columns.len() {
        return Err(DbError::sql(format!(
            "table '{}' has {} columns, {} values given",
            table_name,
            table.columns.len(),
            row.len()
        )));
    }

    check_constraints(pager, catalog, &table, &row)?;

    let indexes = catalog.indexes_for_table(pager, table_name)?;
    for idx in &indexes {
        let col_idx = table.column_index(&idx.column).ok_or_else(|| DbError::internal("index refers to unknown column"))?;
        if table.columns[col_idx].unique || table.columns[col_idx].primary_key {
            if !index_seek(pager, idx.root_page, &row[col_idx])?.is_empty() {
                return Err(DbError::constraint(format!("UNIQUE constraint violated on column '{}'", idx.column)));
            }
        }
    }

    let rowid = if table.has_int_rowid_pk() {
        let pk_idx = table.primary_key_index().unwrap();
        match &row[pk_idx] {
            Value::Int64(v) => *v,
            _ => return Err(DbError::sql("primary key column must be INT64")),
        }
    } else {
        catalog.reserve_next_rowid(pager, table_name)?
    };
    table = catalog.get_table(pager, table_name)?;

    let key = row_key(&table, &row, rowid);
    if crate::btree::find(pager, table.root_page, key)?.is_some() {
        return Err(DbError::constraint("duplicate primary key"));
    }

    let normalized: Vec<Value> = row
        .into_iter()
        .map(|v| record::normalize_value(pager, v).map_err(DbError::from))
        .collect::<DbResult<_>>()?;
    let encoded = record::encode_record(&normalized);
    let new_root = crate::btree::insert(pager, table.root_page, key, encoded)?;
    if new_root != table.root_page {
        catalog.update_table_root(pager, table_name, new_root)?;
    }

    for idx in &indexes {
        let col_idx = table.column_index(&idx.column).unwrap();
        maintain_index_on_insert(pager, catalog, idx, &normalized[col_idx], rowid)?;
    }

    Ok(rowid)
}

fn maintain_index_on_insert(pager: &mut Pager, catalog: &mut Catalog, idx: &IndexMeta, value: &Value, rowid: i64) -> DbResult<()> {
    match idx.kind {
        IndexKind::BTree => {
            let resolved = record::resolve_value(pager, value.clone())?;
            let new_root = index_insert(pager, idx.root_page, &resolved, rowid)?;
            if new_root != idx.root_page {
                persist_index_root(pager, catalog, idx, new_root)?;
            }
        }
        IndexKind::Trigram => {
            if let Value::Text(text) = record::resolve_value(pager, value.clone())? {
                for trigram in crate::trigram::extract(&text) {
                    catalog.trigram_deltas.add(&idx.name, &trigram, rowid);
                }
            }
        }
    }
    Ok(())
}

fn maintain_index_on_delete(pager: &mut Pager, catalog: &mut Catalog, idx: &IndexMeta, value: &Value, rowid: i64) -> DbResult<()> {
    match idx.kind {
        IndexKind::BTree => {
            let resolved = record::resolve_value(pager, value.clone())?;
            index_remove(pager, idx.root_page, &resolved, rowid)?;
        }
        IndexKind::Trigram => {
            if let Value::Text(text) = record::resolve_value(pager, value.clone())? {
                for trigram in crate::trigram::extract(&text) {
                    catalog.trigram_deltas.remove(&idx.name, &trigram, rowid);
                }
            }
        }
    }
    Ok(())
}

fn persist_index_root(pager: &mut Pager, catalog: &mut Catalog, idx: &IndexMeta, new_root: u32) -> DbResult<()> {
    catalog.update_index_root(pager, &idx.name, new_root)?;
    Ok(())
}

/// Folds every buffered trigram delta into its index's on-disk postings. Called at checkpoint
/// time so that after a checkpoint, readers can rely on the postings btree alone (though
/// `sql::executor::trigram_seek` also unions in-flight deltas directly, for reads that happen
/// before the next checkpoint).
pub fn drain_trigram_deltas(pager: &mut Pager, catalog: &mut Catalog) -> DbResult<()> {
    for (index_name, trigram, adds, removes) in catalog.trigram_deltas.drain() {
        let idx = match catalog.get_index(pager, &index_name) {
            Ok(idx) => idx,
            Err(_) => continue, // index was dropped since the delta was buffered
        };
        let mut root = idx.root_page;
        for rowid in adds {
            root = index_insert(pager, root, &Value::Text(trigram.clone()), rowid)?;
        }
        for rowid in removes {
            index_remove(pager, root, &Value::Text(trigram.clone()), rowid)?;
        }
        if root != idx.root_page {
            persist_index_root(pager, catalog, &idx, root)?;
        }
    }
    Ok(())
}

pub fn delete_row(pager: &mut Pager, catalog: &mut Catalog, table_name: &str, rowid: i64) -> DbResult<bool> {
    let table = catalog.get_table(pager, table_name)?;
    let key = rowid_to_key(rowid);
    let Some(bytes) = crate::btree::find(pager, table.root_page, key)? else { return Ok(false) };
    let row = record::decode_record(&bytes)?;

    let indexes = catalog.indexes_for_table(pager, table_name)?;
    for idx in &indexes {
        let col_idx = table.column_index(&idx.column).unwrap();
        maintain_index_on_delete(pager, catalog, idx, &row[col_idx], rowid)?;
    }
    for v in &row {
        record::free_value_storage(pager, v)?;
    }

    crate::btree::delete(pager, table.root_page, key)?;
    Ok(true)
}

pub fn update_row(pager: &mut Pager, catalog: &mut Catalog, table_name: &str, rowid: i64, new_row: Vec<Value>) -> DbResult<()> {
    delete_row(pager, catalog, table_name, rowid)?;
    let table = catalog.get_table(pager, table_name)?;
    let mut row = new_row;
    if table.has_int_rowid_pk() {
        let pk_idx = table.primary_key_index().unwrap();
        row[pk_idx] = Value::Int64(rowid);
    }
    check_constraints(pager, catalog, &table, &row)?;
    let normalized: Vec<Value> = row.into_iter().map(|v| record::normalize_value(pager, v).map_err(DbError::from)).collect::<DbResult<_>>()?;
    let key = rowid_to_key(rowid);
    let encoded = record::encode_record(&normalized);
    let new_root = crate::btree::insert(pager, table.root_page, key, encoded)?;
    if new_root != table.root_page {
        catalog.update_table_root(pager, table_name, new_root)?;
    }
    let indexes = catalog.indexes_for_table(pager, table_name)?;
    for idx in &indexes {
        let col_idx = table.column_index(&idx.column).unwrap();
        maintain_index_on_insert(pager, catalog, idx, &normalized[col_idx], rowid)?;
    }
    Ok(())
}

/// Decode and fully resolve (de-overflow/decompress) a stored row's values.
pub fn resolve_row(pager: &mut Pager, bytes: &[u8]) -> DbResult<Vec<Value>> {
    let raw = record::decode_record(bytes)?;
    raw.into_iter().map(|v| record::resolve_value(pager, v).map_err(DbError::from)).collect()
}

/// Whether a bulk load commits (and, per `sync_interval`, checkpoints) along the way, or
/// defers everything to a single commit at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Full,
    None,
}

/// Options for [`bulk_load`], mirroring §4.8/§6's `bulkLoad(db, table, rows, options)`.
#[derive(Debug, Clone)]
pub struct BulkLoadOptions {
    /// Skip per-row index maintenance; every existing index on the table is rebuilt from
    /// scratch once all rows are in place instead.
    pub disable_indexes: bool,
    pub durability: Durability,
    /// Row count per commit when `durability` is `Full`. Ignored under `Durability::None`,
    /// which loads and commits everything in one pass.
    pub batch_size: usize,
    /// Number of `Full`-durability batches between checkpoints. `0` disables mid-load
    /// checkpoints entirely.
    pub sync_interval: usize,
    pub checkpoint_on_complete: bool,
}

impl Default for BulkLoadOptions {
    fn default() -> Self {
        Self { disable_indexes: false, durability: Durability::Full, batch_size: 1000, sync_interval: 1, checkpoint_on_complete: false }
    }
}

/// Loads `rows` into a table assumed to start empty (a fresh `CREATE TABLE` or a `vacuumDb`
/// destination), per §4.8/§6. NOT NULL and UNIQUE are checked per row against the rows already
/// loaded in this same call; FOREIGN KEY is checked once every row is in place, rejecting the
/// whole load with `CONSTRAINT` rather than leaving a partially-referential table.
///
/// Unlike the rest of this module, `bulk_load` manages its own write transaction(s) rather than
/// assuming the caller already opened one: under `Durability::Full` it commits every
/// `options.batch_size` rows (so a crash mid-load only loses the current batch) and checkpoints
/// every `options.sync_interval` such commits; under `Durability::None` the whole load is one
/// transaction built directly via `bulkBuildFromSorted`.
pub fn bulk_load(pager: &mut Pager, catalog: &mut Catalog, table_name: &str, rows: Vec<(i64, Vec<Value>)>, options: &BulkLoadOptions) -> DbResult<()> {
    let table = catalog.get_table(pager, table_name)?;
    let indexes = catalog.indexes_for_table(pager, table_name)?;

    let mut seen_keys: std::collections::HashSet<u64> = std::collections::HashSet::new();
    let mut seen_unique: Vec<std::collections::HashSet<Vec<u8>>> = table.columns.iter().map(|_| std::collections::HashSet::new()).collect();
    for (rowid, row) in &rows {
        if row.len() != table.columns.len() {
            return Err(DbError::sql(format!(
                "table '{}' has {} columns, {} values given",
                table_name,
                table.columns.len(),
                row.len()
            )));
        }
        check_not_null(&table, row)?;
        for (i, col) in table.columns.iter().enumerate() {
            if (col.unique || col.primary_key) && !matches!(row[i], Value::Null) {
                if !seen_unique[i].insert(encode_single_value(&row[i])) {
                    return Err(DbError::constraint(format!("CONSTRAINT: duplicate value for UNIQUE column '{}'", col.name)));
                }
            }
        }
        let key = row_key(&table, row, *rowid);
        if !seen_keys.insert(key) {
            return Err(DbError::constraint("CONSTRAINT: duplicate primary key"));
        }
    }

    let batch_size = options.batch_size.max(1);
    if let Err(e) = write_bulk_rows(pager, catalog, table_name, &table, &rows, options, batch_size) {
        pager.rollback()?;
        return Err(e);
    }

    let table = catalog.get_table(pager, table_name)?;
    for (_, row) in &rows {
        check_fk(pager, catalog, &table, row)?;
    }

    if options.disable_indexes {
        for idx in &indexes {
            rebuild_index(pager, catalog, table_name, &idx.name)?;
        }
    } else {
        for (rowid, row) in &rows {
            for idx in &indexes {
                let col_idx = table.column_index(&idx.column).unwrap();
                let current = catalog.get_index(pager, &idx.name)?;
                maintain_index_on_insert(pager, catalog, &current, &row[col_idx], *rowid)?;
            }
        }
    }

    if options.checkpoint_on_complete {
        drain_trigram_deltas(pager, catalog)?;
        pager.checkpoint()?;
    }
    Ok(())
}

fn write_bulk_rows(
    pager: &mut Pager,
    catalog: &mut Catalog,
    table_name: &str,
    table: &TableMeta,
    rows: &[(i64, Vec<Value>)],
    options: &BulkLoadOptions,
    batch_size: usize,
) -> DbResult<()> {
    if matches!(options.durability, Durability::None) {
        pager.begin_write()?;
        let mut items = Vec::with_capacity(rows.len());
        for (rowid, row) in rows {
            let key = row_key(table, row, *rowid);
            let normalized: Vec<Value> = row.iter().cloned().map(|v| record::normalize_value(pager, v)).collect::<crate::btree::Result<_>>()?;
            items.push((key, record::encode_record(&normalized)));
        }
        items.sort_by_key(|(k, _)| *k);
        let new_root = crate::btree::bulk_build_from_sorted(pager, items)?;
        catalog.update_table_root(pager, table_name, new_root)?;
        pager.commit()?;
        return Ok(());
    }

    for (batch_idx, chunk) in rows.chunks(batch_size).enumerate() {
        pager.begin_write()?;
        for (rowid, row) in chunk {
            let current = catalog.get_table(pager, table_name)?;
            let key = row_key(table, row, *rowid);
            let normalized: Vec<Value> = row.iter().cloned().map(|v| record::normalize_value(pager, v)).collect::<crate::btree::Result<_>>()?;
            let new_root = crate::btree::insert(pager, current.root_page, key, record::encode_record(&normalized))?;
            if new_root != current.root_page {
                catalog.update_table_root(pager, table_name, new_root)?;
            }
        }
        pager.commit()?;
        if options.sync_interval > 0 && (batch_idx + 1) % options.sync_interval == 0 {
            pager.checkpoint()?;
        }
    }
    Ok(())
}

/// Rebuild an index from scratch by scanning the table and re-inserting every row's value.
pub fn rebuild_index(pager: &mut Pager, catalog: &mut Catalog, table_name: &str, index_name: &str) -> DbResult<()> {
    let table = catalog.get_table(pager, table_name)?;
    let idx = catalog.get_index(pager, index_name)?;
    let col_idx = table.column_index(&idx.column).ok_or_else(|| DbError::internal("index refers to unknown column"))?;

    let new_root = crate::btree::create_empty(pager)?;
    catalog.update_index_root(pager, index_name, new_root)?;

    let mut rows = Vec::new();
    let mut cursor = crate::btree::open_cursor(pager, table.root_page)?;
    while let Some((key, bytes)) = cursor.next(pager)? {
        rows.push((key_to_rowid(key), bytes));
    }
    for (rowid, bytes) in rows {
        let row = resolve_row(pager, &bytes)?;
        let current = catalog.get_index(pager, index_name)?;
        maintain_index_on_insert(pager, catalog, &current, &row[col_idx], rowid)?;
    }
    Ok(())
}

/// Compacts a table's btree by rebuilding it from a forward scan, reclaiming the space
/// underflowed pages and tombstones left behind.
pub fn vacuum_table(pager: &mut Pager, catalog: &mut Catalog, table_name: &str) -> DbResult<()> {
    let table = catalog.get_table(pager, table_name)?;
    let mut rows = Vec::new();
    let mut cursor = crate::btree::open_cursor(pager, table.root_page)?;
    while let Some((key, bytes)) = cursor.next(pager)? {
        rows.push((key, bytes));
    }
    let new_root = crate::btree::bulk_build_from_sorted(pager, rows)?;
    catalog.update_table_root(pager, table_name, new_root)?;
    Ok(())
}

/// Orders tables so that a table is only copied once every table it references by FOREIGN KEY
/// already exists at the destination. Self-referencing tables (a column referencing their own
/// table) are fine since the table itself doesn't need to pre-exist. A cycle between two or
/// more distinct tables can't happen through valid `CREATE TABLE ... REFERENCES` DDL (the
/// referenced table must already exist when the referencing one is created), so none is handled
/// here beyond falling back to declaration order if one is somehow present.
fn topo_sort_tables(tables: Vec<TableMeta>) -> Vec<TableMeta> {
    let mut remaining = tables;
    let mut placed: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut ordered = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let mut next_round = Vec::new();
        let before = remaining.len();
        for t in remaining {
            let ready = t.columns.iter().all(|c| match &c.references {
                Some((ref_table, _)) => ref_table == &t.name || placed.contains(ref_table),
                None => true,
            });
            if ready {
                placed.insert(t.name.clone());
                ordered.push(t);
            } else {
                next_round.push(t);
            }
        }
        if next_round.len() == before {
            ordered.extend(next_round);
            break;
        }
        remaining = next_round;
    }
    ordered
}

/// Drops indexes that are redundant with one already kept: same table, same indexed column,
/// same kind. This schema's indexes are single-column, so "covers the same columns with an
/// equal-or-broader key prefix" collapses to "is the same column"; there's no per-index
/// `unique` flag to compare either, since uniqueness is a column constraint enforced
/// independently of which indexes exist on top of it.
fn prune_redundant_indexes(indexes: Vec<IndexMeta>) -> Vec<IndexMeta> {
    let mut kept: Vec<IndexMeta> = Vec::new();
    for idx in indexes {
        let redundant = kept.iter().any(|k| k.column == idx.column && k.kind == idx.kind);
        if !redundant {
            kept.push(idx);
        }
    }
    kept
}

/// Rebuilds `dst` from scratch as a compacted copy of `src`: an empty destination database,
/// schema copied in dependency order, rows bulk-loaded table by table, and only the
/// non-redundant indexes recreated (§4.8 `vacuumDb`). `dst` is assumed freshly opened with no
/// tables of its own.
pub fn vacuum_db(src: &mut Pager, src_catalog: &mut Catalog, dst: &mut Pager, dst_catalog: &mut Catalog) -> DbResult<()> {
    let table_names = src_catalog.table_names(src)?;
    let tables: Vec<TableMeta> = table_names.iter().map(|n| src_catalog.get_table(src, n).map_err(DbError::from)).collect::<DbResult<_>>()?;
    let ordered = topo_sort_tables(tables);

    dst.begin_write()?;
    for t in &ordered {
        let root = crate::btree::create_empty(dst)?;
        dst_catalog.create_table(dst, TableMeta { name: t.name.clone(), columns: t.columns.clone(), root_page: root, next_rowid: t.next_rowid })?;
    }
    for name in src_catalog.view_names(src)? {
        let view = src_catalog.get_view(src, &name)?;
        dst_catalog.create_view(dst, view)?;
    }
    dst.commit()?;

    for t in &ordered {
        let mut rows = Vec::new();
        let mut cursor = crate::btree::open_cursor(src, t.root_page)?;
        while let Some((key, bytes)) = cursor.next(src)? {
            rows.push((key_to_rowid(key), resolve_row(src, &bytes)?));
        }
        let options = BulkLoadOptions { disable_indexes: true, ..BulkLoadOptions::default() };
        bulk_load(dst, dst_catalog, &t.name, rows, &options)?;
    }

    for t in &ordered {
        let indexes = prune_redundant_indexes(src_catalog.indexes_for_table(src, &t.name)?);
        for idx in indexes {
            dst.begin_write()?;
            // root_page is a placeholder: rebuild_index allocates the real root itself, so
            // pre-allocating one here would just leak a page the freelist never reclaims.
            let entry = IndexMeta { name: idx.name.clone(), table: idx.table.clone(), column: idx.column.clone(), kind: idx.kind, root_page: 0 };
            if let Err(e) = dst_catalog.create_index(dst, entry) {
                dst.rollback()?;
                return Err(e.into());
            }
            match rebuild_index(dst, dst_catalog, &t.name, &idx.name) {
                Ok(()) => dst.commit()?,
                Err(e) => {
                    dst.rollback()?;
                    return Err(e);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};
    use crate::vfs::OsVfs;
    use std::rc::Rc;

    fn temp_pager(name: &str) -> Pager {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_storage_test_{}_{}", std::process::id(), name));
        std::fs::remove_file(&p).ok();
        std::fs::remove_file(crate::wal::wal_path_for(&p)).ok();
        Pager::open(Rc::new(OsVfs), &p).unwrap()
    }

    fn temp_catalog(pager: &Pager) -> Catalog {
        Catalog::new(pager.header().root_catalog)
    }

    fn col(name: &str, ty: ColumnType, not_null: bool, primary_key: bool, unique: bool) -> ColumnDef {
        ColumnDef { name: name.to_string(), ty, not_null, primary_key, unique, references: None }
    }

    #[test]
    fn bulk_load_rejects_duplicate_unique_value() {
        let mut pager = temp_pager("bulk_dup_unique");
        let mut catalog = temp_catalog(&pager);
        pager.begin_write().unwrap();
        let root = crate::btree::create_empty(&mut pager).unwrap();
        catalog
            .create_table(
                &mut pager,
                TableMeta {
                    name: "t".to_string(),
                    columns: vec![col("id", ColumnType::Int, true, true, false), col("email", ColumnType::Text, false, false, true)],
                    root_page: root,
                    next_rowid: 0,
                },
            )
            .unwrap();
        pager.commit().unwrap();

        let rows = vec![
            (1, vec![Value::Int64(1), Value::Text("a@example.com".to_string())]),
            (2, vec![Value::Int64(2), Value::Text("a@example.com".to_string())]),
        ];
        let err = bulk_load(&mut pager, &mut catalog, "t", rows, &BulkLoadOptions::default()).unwrap_err();
        assert!(err.to_string().contains("CONSTRAINT"));
    }

    #[test]
    fn bulk_load_batches_and_checkpoints_all_rows() {
        let mut pager = temp_pager("bulk_ok");
        let mut catalog = temp_catalog(&pager);
        pager.begin_write().unwrap();
        let root = crate::btree::create_empty(&mut pager).unwrap();
        catalog
            .create_table(&mut pager, TableMeta { name: "t".to_string(), columns: vec![col("id", ColumnType::Int, true, true, false)], root_page: root, next_rowid: 0 })
            .unwrap();
        pager.commit().unwrap();

        let rows: Vec<(i64, Vec<Value>)> = (0..500i64).map(|i| (i, vec![Value::Int64(i)])).collect();
        let options = BulkLoadOptions { batch_size: 64, sync_interval: 3, ..BulkLoadOptions::default() };
        bulk_load(&mut pager, &mut catalog, "t", rows, &options).unwrap();

        let table = catalog.get_table(&mut pager, "t").unwrap();
        let mut cursor = crate::btree::open_cursor(&mut pager, table.root_page).unwrap();
        let mut count = 0;
        while cursor.next(&mut pager).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 500);
    }

    #[test]
    fn vacuum_db_copies_rows_and_drops_redundant_index() {
        let mut src_pager = temp_pager("vacuum_src");
        let mut src_catalog = temp_catalog(&src_pager);
        src_pager.begin_write().unwrap();
        let root = crate::btree::create_empty(&mut src_pager).unwrap();
        src_catalog
            .create_table(
                &mut src_pager,
                TableMeta {
                    name: "t".to_string(),
                    columns: vec![col("id", ColumnType::Int, true, true, false), col("name", ColumnType::Text, false, false, false)],
                    root_page: root,
                    next_rowid: 0,
                },
            )
            .unwrap();
        for i in 0..10i64 {
            insert_row(&mut src_pager, &mut src_catalog, "t", vec![Value::Int64(i), Value::Text(format!("row{i}"))]).unwrap();
        }
        src_pager.commit().unwrap();

        // Two indexes over the same column/kind: the second is redundant and must be dropped.
        src_pager.begin_write().unwrap();
        let ix_root_a = crate::btree::create_empty(&mut src_pager).unwrap();
        src_catalog
            .create_index(&mut src_pager, IndexMeta { name: "ix_a".to_string(), table: "t".to_string(), column: "name".to_string(), kind: IndexKind::BTree, root_page: ix_root_a })
            .unwrap();
        rebuild_index(&mut src_pager, &mut src_catalog, "t", "ix_a").unwrap();
        src_pager.commit().unwrap();

        src_pager.begin_write().unwrap();
        let ix_root_b = crate::btree::create_empty(&mut src_pager).unwrap();
        src_catalog
            .create_index(&mut src_pager, IndexMeta { name: "ix_b".to_string(), table: "t".to_string(), column: "name".to_string(), kind: IndexKind::BTree, root_page: ix_root_b })
            .unwrap();
        rebuild_index(&mut src_pager, &mut src_catalog, "t", "ix_b").unwrap();
        src_pager.commit().unwrap();

        let mut dst_pager = temp_pager("vacuum_dst");
        let mut dst_catalog = temp_catalog(&dst_pager);
        vacuum_db(&mut src_pager, &mut src_catalog, &mut dst_pager, &mut dst_catalog).unwrap();

        let dst_table = dst_catalog.get_table(&mut dst_pager, "t").unwrap();
        let mut cursor = crate::btree::open_cursor(&mut dst_pager, dst_table.root_page).unwrap();
        let mut count = 0;
        while cursor.next(&mut dst_pager).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 10);

        let dst_indexes = dst_catalog.indexes_for_table(&mut dst_pager, "t").unwrap();
        assert_eq!(dst_indexes.len(), 1, "redundant second index on the same column must be dropped");
    }
}
