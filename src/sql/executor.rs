//! Binds, plans, and executes parsed statements against a [`Catalog`] + [`Pager`] (§4.9).
//!
//! `exec_sql` is the executor's single public entry point: it resolves table/column names,
//! picks an index seek over a full scan when the predicate allows it, and returns result rows
//! formatted as `"col|col|..."` per the embedded API contract.

use crate::btree;
use crate::catalog::{Catalog, ColumnDef, ColumnType, IndexKind, IndexMeta, TableMeta};
use crate::error::{DbError, DbResult};
use crate::pager::Pager;
use crate::record::Value;
use crate::storage;
use crate::trigram;

use super::ast::{self, CompareOp, Cond, IndexUsing, Literal, OrderDir, SelectList, Statement};

/// Runs one parsed statement, returning result rows (`SELECT`) or an empty vec otherwise.
pub fn exec_sql(pager: &mut Pager, catalog: &mut Catalog, sql: &str) -> DbResult<Vec<String>> {
    let stmt = super::parse(sql).map_err(|e| DbError::sql(e.to_string()))?;
    execute(pager, catalog, stmt)
}

fn execute(pager: &mut Pager, catalog: &mut Catalog, stmt: Statement) -> DbResult<Vec<String>> {
    match stmt {
        Statement::CreateTable(ct) => exec_create_table(pager, catalog, ct).map(|_| Vec::new()),
        Statement::CreateIndex(ci) => exec_create_index(pager, catalog, ci).map(|_| Vec::new()),
        Statement::CreateView(cv) => exec_create_view(pager, catalog, cv).map(|_| Vec::new()),
        Statement::Insert(ins) => exec_insert(pager, catalog, ins).map(|_| Vec::new()),
        Statement::Update(upd) => exec_update(pager, catalog, upd).map(|_| Vec::new()),
        Statement::Delete(del) => exec_delete(pager, catalog, del).map(|_| Vec::new()),
        Statement::Select(sel) => exec_select(pager, catalog, sel),
    }
}

fn literal_to_value(lit: &Literal, ty: ColumnType) -> DbResult<Value> {
    Ok(match (lit, ty) {
        (Literal::Null, _) => Value::Null,
        (Literal::Bool(b), ColumnType::Bool) => Value::Bool(*b),
        (Literal::Int(i), ColumnType::Int) => Value::Int64(*i),
        (Literal::Int(i), ColumnType::Float) => Value::Float64(*i as f64),
        (Literal::Float(f), ColumnType::Float) => Value::Float64(*f),
        (Literal::Text(s), ColumnType::Text) => Value::Text(s.clone()),
        (Literal::Text(s), ColumnType::Blob) => Value::Blob(s.clone().into_bytes()),
        (lit, ty) => return Err(DbError::sql(format!("literal {lit:?} is not compatible with column type {}", ty.name()))),
    })
}

fn exec_create_table(pager: &mut Pager, catalog: &mut Catalog, ct: ast::CreateTable) -> DbResult<()> {
    let root_page = btree::create_empty(pager)?;
    let mut columns = Vec::with_capacity(ct.columns.len());
    for c in &ct.columns {
        let ty = ColumnType::parse(&c.type_name)?;
        columns.push(ColumnDef {
            name: c.name.clone(),
            ty,
            not_null: c.not_null || c.primary_key,
            primary_key: c.primary_key,
            unique: c.unique,
            references: c.references.clone(),
        });
    }
    let table = TableMeta { name: ct.table, columns, root_page, next_rowid: 1 };
    catalog.create_table(pager, table)?;
    Ok(())
}

fn exec_create_index(pager: &mut Pager, catalog: &mut Catalog, ci: ast::CreateIndex) -> DbResult<()> {
    let table = catalog.get_table(pager, &ci.table)?;
    table
        .column_index(&ci.column)
        .ok_or_else(|| DbError::sql(format!("column '{}' does not exist on table '{}'", ci.column, ci.table)))?;
    let kind = match ci.using {
        IndexUsing::BTree => IndexKind::BTree,
        IndexUsing::Trigram => IndexKind::Trigram,
    };
    let root_page = btree::create_empty(pager)?;
    catalog.create_index(pager, IndexMeta { name: ci.index.clone(), table: ci.table.clone(), column: ci.column, kind, root_page })?;
    storage::rebuild_index(pager, catalog, &ci.table, &ci.index)?;
    Ok(())
}

fn exec_create_view(pager: &mut Pager, catalog: &mut Catalog, cv: ast::CreateView) -> DbResult<()> {
    let query_text = select_to_sql(&cv.query);
    catalog.create_view(pager, crate::catalog::ViewMeta { name: cv.view, query: query_text })?;
    Ok(())
}

/// Re-renders a parsed `SELECT` back to SQL text so `CREATE VIEW` can store a re-parseable
/// query without needing the original statement's source slice.
fn select_to_sql(sel: &ast::Select) -> String {
    let cols = match &sel.columns {
        SelectList::Star => "*".to_string(),
        SelectList::Columns(cs) => cs.join(", "),
    };
    let mut s = format!("SELECT {} FROM {}", cols, sel.table);
    if let Some(cond) = &sel.filter {
        s.push_str(" WHERE ");
        s.push_str(&render_cond(cond));
    }
    if let Some((col, dir)) = &sel.order_by {
        s.push_str(&format!(" ORDER BY {} {}", col, if *dir == OrderDir::Desc { "DESC" } else { "ASC" }));
    }
    if let Some(limit) = sel.limit {
        s.push_str(&format!(" LIMIT {limit}"));
    }
    s
}

fn render_cond(cond: &Cond) -> String {
    cond.comparisons
        .iter()
        .map(|c| format!("{} {} {}", c.column, render_op(c.op), render_literal(&c.value)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn render_op(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "=",
        CompareOp::NotEq => "<>",
        CompareOp::Lt => "<",
        CompareOp::LtEq => "<=",
        CompareOp::Gt => ">",
        CompareOp::GtEq => ">=",
        CompareOp::Like => "LIKE",
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn exec_insert(pager: &mut Pager, catalog: &mut Catalog, ins: ast::Insert) -> DbResult<()> {
    let table = catalog.get_table(pager, &ins.table)?;
    if ins.columns.len() != ins.values.len() {
        return Err(DbError::sql("column list and value list have different lengths"));
    }
    let mut row = vec![Value::Null; table.columns.len()];
    for (col_name, lit) in ins.columns.iter().zip(ins.values.iter()) {
        let idx = table
            .column_index(col_name)
            .ok_or_else(|| DbError::sql(format!("column '{col_name}' does not exist on table '{}'", ins.table)))?;
        row[idx] = literal_to_value(lit, table.columns[idx].ty)?;
    }
    storage::insert_row(pager, catalog, &ins.table, row)?;
    Ok(())
}

fn exec_update(pager: &mut Pager, catalog: &mut Catalog, upd: ast::Update) -> DbResult<()> {
    let table = catalog.get_table(pager, &upd.table)?;
    let rowids = matching_rowids(pager, catalog, &table, upd.filter.as_ref())?;
    for rowid in rowids {
        let Some(bytes) = btree::find(pager, table.root_page, storage::rowid_to_key(rowid))? else { continue };
        let mut row = storage::resolve_row(pager, &bytes)?;
        if !row_matches(&table, &row, upd.filter.as_ref())? {
            continue;
        }
        for a in &upd.assignments {
            let idx = table
                .column_index(&a.column)
                .ok_or_else(|| DbError::sql(format!("column '{}' does not exist on table '{}'", a.column, upd.table)))?;
            row[idx] = literal_to_value(&a.value, table.columns[idx].ty)?;
        }
        storage::update_row(pager, catalog, &upd.table, rowid, row)?;
    }
    Ok(())
}

fn exec_delete(pager: &mut Pager, catalog: &mut Catalog, del: ast::Delete) -> DbResult<()> {
    let table = catalog.get_table(pager, &del.table)?;
    let rowids = matching_rowids(pager, catalog, &table, del.filter.as_ref())?;
    for rowid in rowids {
        let Some(bytes) = btree::find(pager, table.root_page, storage::rowid_to_key(rowid))? else { continue };
        let row = storage::resolve_row(pager, &bytes)?;
        if !row_matches(&table, &row, del.filter.as_ref())? {
            continue;
        }
        storage::delete_row(pager, catalog, &del.table, rowid)?;
    }
    Ok(())
}

fn exec_select(pager: &mut Pager, catalog: &mut Catalog, sel: ast::Select) -> DbResult<Vec<String>> {
    let table = catalog.get_table(pager, &sel.table)?;
    let rowids = matching_rowids(pager, catalog, &table, sel.filter.as_ref())?;

    let mut rows: Vec<(i64, Vec<Value>)> = Vec::with_capacity(rowids.len());
    for rowid in rowids {
        let Some(bytes) = btree::find(pager, table.root_page, storage::rowid_to_key(rowid))? else { continue };
        let row = storage::resolve_row(pager, &bytes)?;
        if row_matches(&table, &row, sel.filter.as_ref())? {
            rows.push((rowid, row));
        }
    }

    if let Some((col, dir)) = &sel.order_by {
        let idx = table.column_index(col).ok_or_else(|| DbError::sql(format!("column '{col}' does not exist")))?;
        rows.sort_by(|a, b| {
            let ord = compare_values(&a.1[idx], &b.1[idx]);
            if *dir == OrderDir::Desc {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some(limit) = sel.limit {
        rows.truncate(limit as usize);
    }

    let column_indices: Vec<usize> = match &sel.columns {
        SelectList::Star => (0..table.columns.len()).collect(),
        SelectList::Columns(cols) => cols
            .iter()
            .map(|c| table.column_index(c).ok_or_else(|| DbError::sql(format!("column '{c}' does not exist"))))
            .collect::<DbResult<_>>()?,
    };

    Ok(rows
        .into_iter()
        .map(|(_, row)| column_indices.iter().map(|&i| row[i].to_string()).collect::<Vec<_>>().join("|"))
        .collect())
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::Float64(x), Value::Float64(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Chooses an index seek over a full scan when the filter allows it, otherwise returns every
/// rowid in the table; callers still re-check the full predicate against each resolved row.
fn matching_rowids(pager: &mut Pager, catalog: &mut Catalog, table: &TableMeta, filter: Option<&Cond>) -> DbResult<Vec<i64>> {
    if let Some(cond) = filter {
        if let Some(comp) = cond.comparisons.first() {
            if let Some(idx) = table.column_index(&comp.column) {
                let indexes = catalog.indexes_for_table(pager, &table.name)?;
                if comp.op == CompareOp::Eq {
                    if let Some(ix) = indexes.iter().find(|i| i.column == comp.column && i.kind == IndexKind::BTree) {
                        let value = literal_to_value(&comp.value, table.columns[idx].ty)?;
                        return storage::index_seek(pager, ix.root_page, &value);
                    }
                    if table.primary_key_index() == Some(idx) && table.has_int_rowid_pk() {
                        if let Literal::Int(v) = comp.value {
                            if btree::find(pager, table.root_page, storage::rowid_to_key(v))?.is_some() {
                                return Ok(vec![v]);
                            }
                            return Ok(Vec::new());
                        }
                    }
                }
                if comp.op == CompareOp::Like {
                    if let Literal::Text(pattern) = &comp.value {
                        if trigram::can_use_trigram_index(pattern) {
                            if let Some(ix) = indexes.iter().find(|i| i.column == comp.column && i.kind == IndexKind::Trigram) {
                                return trigram_seek(pager, catalog, ix, pattern);
                            }
                        }
                    }
                }
            }
        }
    }
    full_scan_rowids(pager, table)
}

fn full_scan_rowids(pager: &mut Pager, table: &TableMeta) -> DbResult<Vec<i64>> {
    let mut out = Vec::new();
    let mut cursor = btree::open_cursor(pager, table.root_page)?;
    while let Some((key, _)) = cursor.next(pager)? {
        out.push(storage::key_to_rowid(key));
    }
    Ok(out)
}

/// Intersects postings for every trigram in the pattern's longest literal run; candidates are
/// still verified against the full pattern once the row is resolved (§4.9/§9). Each trigram's
/// on-disk postings are unioned with its pending `catalog.trigram_deltas` entry, so rows
/// written since the last checkpoint are still found.
fn trigram_seek(pager: &mut Pager, catalog: &Catalog, ix: &IndexMeta, pattern: &str) -> DbResult<Vec<i64>> {
    let trigrams = trigram::candidate_trigrams(pattern);
    let mut candidates: Option<std::collections::HashSet<i64>> = None;
    for tri in &trigrams {
        let mut set: std::collections::HashSet<i64> = storage::index_seek(pager, ix.root_page, &Value::Text(tri.clone()))?.into_iter().collect();
        let (adds, removes) = catalog.trigram_deltas.pending(&ix.name, tri);
        set.extend(adds.iter().copied());
        for rowid in removes {
            set.remove(rowid);
        }
        candidates = Some(match candidates {
            Some(existing) => existing.intersection(&set).copied().collect(),
            None => set,
        });
    }
    Ok(candidates.unwrap_or_default().into_iter().collect())
}

fn row_matches(table: &TableMeta, row: &[Value], filter: Option<&Cond>) -> DbResult<bool> {
    let Some(cond) = filter else { return Ok(true) };
    for comp in &cond.comparisons {
        let idx = table
            .column_index(&comp.column)
            .ok_or_else(|| DbError::sql(format!("column '{}' does not exist", comp.column)))?;
        let want = literal_to_value(&comp.value, table.columns[idx].ty)?;
        let got = &row[idx];
        let matches = match comp.op {
            CompareOp::Eq => values_eq(got, &want),
            CompareOp::NotEq => !values_eq(got, &want),
            CompareOp::Lt => compare_values(got, &want) == std::cmp::Ordering::Less,
            CompareOp::LtEq => compare_values(got, &want) != std::cmp::Ordering::Greater,
            CompareOp::Gt => compare_values(got, &want) == std::cmp::Ordering::Greater,
            CompareOp::GtEq => compare_values(got, &want) != std::cmp::Ordering::Less,
            CompareOp::Like => match (got, &want) {
                (Value::Text(t), Value::Text(p)) => trigram::like_matches(p, t),
                _ => false,
            },
        };
        if !matches {
            return Ok(false);
        }
    }
    Ok(true)
}

fn values_eq(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;
    use std::rc::Rc;

    fn temp_pager(name: &str) -> Pager {
        let mut p = std::env::temp_dir();
        p.push(format!("pagedb_exec_test_{}_{}", std::process::id(), name));
        std::fs::remove_file(&p).ok();
        std::fs::remove_file(crate::wal::wal_path_for(&p)).ok();
        Pager::open(Rc::new(OsVfs), &p).unwrap()
    }

    #[test]
    fn create_insert_select_roundtrip() {
        let mut pager = temp_pager("crud");
        pager.begin_write().unwrap();
        let mut catalog = Catalog::new(2);
        exec_sql(&mut pager, &mut catalog, "CREATE TABLE widgets (id INT PRIMARY KEY, name TEXT)").unwrap();
        exec_sql(&mut pager, &mut catalog, "INSERT INTO widgets (id, name) VALUES (1, 'bolt')").unwrap();
        exec_sql(&mut pager, &mut catalog, "INSERT INTO widgets (id, name) VALUES (2, 'nut')").unwrap();
        let rows = exec_sql(&mut pager, &mut catalog, "SELECT id, name FROM widgets ORDER BY id").unwrap();
        assert_eq!(rows, vec!["1|bolt".to_string(), "2|nut".to_string()]);
        pager.commit().unwrap();
    }

    #[test]
    fn update_and_delete() {
        let mut pager = temp_pager("update_delete");
        pager.begin_write().unwrap();
        let mut catalog = Catalog::new(2);
        exec_sql(&mut pager, &mut catalog, "CREATE TABLE widgets (id INT PRIMARY KEY, name TEXT)").unwrap();
        exec_sql(&mut pager, &mut catalog, "INSERT INTO widgets (id, name) VALUES (1, 'bolt')").unwrap();
        exec_sql(&mut pager, &mut catalog, "UPDATE widgets SET name = 'washer' WHERE id = 1").unwrap();
        let rows = exec_sql(&mut pager, &mut catalog, "SELECT name FROM widgets WHERE id = 1").unwrap();
        assert_eq!(rows, vec!["washer".to_string()]);
        exec_sql(&mut pager, &mut catalog, "DELETE FROM widgets WHERE id = 1").unwrap();
        let rows = exec_sql(&mut pager, &mut catalog, "SELECT name FROM widgets").unwrap();
        assert!(rows.is_empty());
        pager.commit().unwrap();
    }

    #[test]
    fn like_query_without_index_falls_back_to_scan() {
        let mut pager = temp_pager("like_scan");
        pager.begin_write().unwrap();
        let mut catalog = Catalog::new(2);
        exec_sql(&mut pager, &mut catalog, "CREATE TABLE docs (id INT PRIMARY KEY, body TEXT)").unwrap();
        exec_sql(&mut pager, &mut catalog, "INSERT INTO docs (id, body) VALUES (1, 'hello world')").unwrap();
        exec_sql(&mut pager, &mut catalog, "INSERT INTO docs (id, body) VALUES (2, 'goodbye')").unwrap();
        let rows = exec_sql(&mut pager, &mut catalog, "SELECT id FROM docs WHERE body LIKE '%world%'").unwrap();
        assert_eq!(rows, vec!["1".to_string()]);
        pager.commit().unwrap();
    }
}
