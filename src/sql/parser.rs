//! Pest-grammar-driven parsing of the SQL subset into [`super::ast`] (§4.9).

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use super::ast::*;

#[derive(Parser)]
#[grammar = "sql/sql.pest"]
struct SqlParser;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("SQL syntax error: {0}")]
    Syntax(String),
    #[error("invalid literal: {0}")]
    BadLiteral(String),
}

impl From<pest::error::Error<Rule>> for Error {
    fn from(e: pest::error::Error<Rule>) -> Self {
        Error::Syntax(e.to_string())
    }
}

pub fn parse(sql: &str) -> Result<Statement, Error> {
    let mut pairs = SqlParser::parse(Rule::statement, sql)?;
    let statement_pair = pairs.next().ok_or_else(|| Error::Syntax("empty input".to_string()))?;
    let inner = statement_pair.into_inner().next().ok_or_else(|| Error::Syntax("empty statement".to_string()))?;
    parse_statement(inner)
}

fn parse_statement(pair: Pair<Rule>) -> Result<Statement, Error> {
    match pair.as_rule() {
        Rule::create_table_stmt => Ok(Statement::CreateTable(parse_create_table(pair)?)),
        Rule::create_index_stmt => Ok(Statement::CreateIndex(parse_create_index(pair)?)),
        Rule::create_view_stmt => Ok(Statement::CreateView(parse_create_view(pair)?)),
        Rule::insert_stmt => Ok(Statement::Insert(parse_insert(pair)?)),
        Rule::update_stmt => Ok(Statement::Update(parse_update(pair)?)),
        Rule::delete_stmt => Ok(Statement::Delete(parse_delete(pair)?)),
        Rule::select_stmt => Ok(Statement::Select(parse_select(pair)?)),
        other => Err(Error::Syntax(format!("unexpected top-level rule {other:?}"))),
    }
}

fn parse_create_table(pair: Pair<Rule>) -> Result<CreateTable, Error> {
    let mut inner = pair.into_inner();
    let table = inner.next().unwrap().as_str().to_string();
    let columns = inner.map(parse_column_def).collect::<Result<Vec<_>, _>>()?;
    Ok(CreateTable { table, columns })
}

fn parse_column_def(pair: Pair<Rule>) -> Result<ColumnDefAst, Error> {
    let mut inner = pair.into_inner();
    let name = inner.next().unwrap().as_str().to_string();
    let type_name = inner.next().unwrap().as_str().to_string();
    let mut col = ColumnDefAst { name, type_name, primary_key: false, not_null: false, unique: false, references: None };
    for constraint in inner {
        let c = constraint.into_inner().next().unwrap();
        match c.as_rule() {
            Rule::primary_key_constraint => col.primary_key = true,
            Rule::not_null_constraint => col.not_null = true,
            Rule::unique_constraint => col.unique = true,
            Rule::references_constraint => {
                let mut it = c.into_inner();
                let ref_table = it.next().unwrap().as_str().to_string();
                let ref_col = it.next().unwrap().as_str().to_string();
                col.references = Some((ref_table, ref_col));
            }
            other => return Err(Error::Syntax(format!("unexpected constraint {other:?}"))),
        }
    }
    Ok(col)
}

fn parse_create_index(pair: Pair<Rule>) -> Result<CreateIndex, Error> {
    let mut inner = pair.into_inner();
    let index = inner.next().unwrap().as_str().to_string();
    let table = inner.next().unwrap().as_str().to_string();
    let column = inner.next().unwrap().as_str().to_string();
    let using = match inner.next() {
        Some(u) => {
            let kw = u.into_inner().next().unwrap().as_str().to_uppercase();
            if kw == "TRIGRAM" {
                IndexUsing::Trigram
            } else {
                IndexUsing::BTree
            }
        }
        None => IndexUsing::BTree,
    };
    Ok(CreateIndex { index, table, column, using })
}

fn parse_create_view(pair: Pair<Rule>) -> Result<CreateView, Error> {
    let mut inner = pair.into_inner();
    let view = inner.next().unwrap().as_str().to_string();
    let select_pair = inner.next().unwrap();
    let query = parse_select(select_pair)?;
    Ok(CreateView { view, query: Box::new(query) })
}

fn parse_insert(pair: Pair<Rule>) -> Result<Insert, Error> {
    let mut inner = pair.into_inner();
    let table = inner.next().unwrap().as_str().to_string();
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for p in inner {
        match p.as_rule() {
            Rule::ident => columns.push(p.as_str().to_string()),
            Rule::literal => values.push(parse_literal(p)?),
            other => return Err(Error::Syntax(format!("unexpected token in INSERT: {other:?}"))),
        }
    }
    Ok(Insert { table, columns, values })
}

fn parse_update(pair: Pair<Rule>) -> Result<Update, Error> {
    let mut inner = pair.into_inner();
    let table = inner.next().unwrap().as_str().to_string();
    let mut assignments = Vec::new();
    let mut filter = None;
    for p in inner {
        match p.as_rule() {
            Rule::assignment => {
                let mut a = p.into_inner();
                let column = a.next().unwrap().as_str().to_string();
                let value = parse_literal(a.next().unwrap())?;
                assignments.push(Assignment { column, value });
            }
            Rule::where_clause => filter = Some(parse_cond(p.into_inner().next().unwrap())?),
            other => return Err(Error::Syntax(format!("unexpected token in UPDATE: {other:?}"))),
        }
    }
    Ok(Update { table, assignments, filter })
}

fn parse_delete(pair: Pair<Rule>) -> Result<Delete, Error> {
    let mut inner = pair.into_inner();
    let table = inner.next().unwrap().as_str().to_string();
    let filter = inner.next().map(|p| parse_cond(p.into_inner().next().unwrap())).transpose()?;
    Ok(Delete { table, filter })
}

fn parse_select(pair: Pair<Rule>) -> Result<Select, Error> {
    let mut inner = pair.into_inner();
    let select_list_pair = inner.next().unwrap();
    let columns = parse_select_list(select_list_pair);
    let table = inner.next().unwrap().as_str().to_string();
    let mut filter = None;
    let mut order_by = None;
    let mut limit = None;
    for p in inner {
        match p.as_rule() {
            Rule::where_clause => filter = Some(parse_cond(p.into_inner().next().unwrap())?),
            Rule::order_by_clause => {
                let mut o = p.into_inner();
                let col = o.next().unwrap().as_str().to_string();
                let dir = match o.next() {
                    Some(d) if d.as_str().eq_ignore_ascii_case("DESC") => OrderDir::Desc,
                    _ => OrderDir::Asc,
                };
                order_by = Some((col, dir));
            }
            Rule::limit_clause => {
                let n: u64 =
                    p.into_inner().next().unwrap().as_str().parse().map_err(|_| Error::BadLiteral("LIMIT".to_string()))?;
                limit = Some(n);
            }
            other => return Err(Error::Syntax(format!("unexpected token in SELECT: {other:?}"))),
        }
    }
    Ok(Select { columns, table, filter, order_by, limit })
}

fn parse_select_list(pair: Pair<Rule>) -> SelectList {
    let mut inner = pair.into_inner().peekable();
    match inner.peek() {
        Some(p) if p.as_rule() == Rule::star => SelectList::Star,
        _ => {
            let cols = inner.map(|item| item.into_inner().next().unwrap().as_str().to_string()).collect();
            SelectList::Columns(cols)
        }
    }
}

fn parse_cond(pair: Pair<Rule>) -> Result<Cond, Error> {
    let comparisons = pair.into_inner().map(parse_comparison).collect::<Result<Vec<_>, _>>()?;
    Ok(Cond { comparisons })
}

fn parse_comparison(pair: Pair<Rule>) -> Result<Comparison, Error> {
    let mut inner = pair.into_inner();
    let column = inner.next().unwrap().as_str().to_string();
    let op_str = inner.next().unwrap().as_str();
    let op = match op_str.to_uppercase().as_str() {
        "=" => CompareOp::Eq,
        "<>" => CompareOp::NotEq,
        "<" => CompareOp::Lt,
        "<=" => CompareOp::LtEq,
        ">" => CompareOp::Gt,
        ">=" => CompareOp::GtEq,
        "LIKE" => CompareOp::Like,
        other => return Err(Error::Syntax(format!("unknown comparison operator {other}"))),
    };
    let value = parse_literal(inner.next().unwrap())?;
    Ok(Comparison { column, op, value })
}

fn parse_literal(pair: Pair<Rule>) -> Result<Literal, Error> {
    let inner = pair.into_inner().next().unwrap();
    match inner.as_rule() {
        Rule::null_literal => Ok(Literal::Null),
        Rule::bool_literal => Ok(Literal::Bool(inner.as_str().eq_ignore_ascii_case("TRUE"))),
        Rule::int_literal => inner.as_str().parse().map(Literal::Int).map_err(|_| Error::BadLiteral(inner.as_str().to_string())),
        Rule::float_literal => {
            inner.as_str().parse().map(Literal::Float).map_err(|_| Error::BadLiteral(inner.as_str().to_string()))
        }
        Rule::string_literal => {
            let s = inner.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Literal::Text(s.to_string()))
        }
        other => Err(Error::Syntax(format!("unexpected literal rule {other:?}"))),
    }
}

#[allow(dead_code)]
fn collect_idents(pairs: Pairs<Rule>) -> Vec<String> {
    pairs.filter(|p| p.as_rule() == Rule::ident).map(|p| p.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table() {
        let stmt = parse("CREATE TABLE widgets (id INT PRIMARY KEY, name TEXT NOT NULL);").unwrap();
        match stmt {
            Statement::CreateTable(t) => {
                assert_eq!(t.table, "widgets");
                assert_eq!(t.columns.len(), 2);
                assert!(t.columns[0].primary_key);
                assert!(t.columns[1].not_null);
            }
            _ => panic!("expected CreateTable"),
        }
    }

    #[test]
    fn parses_select_with_where_order_limit() {
        let stmt = parse("SELECT id, name FROM widgets WHERE id > 5 AND name LIKE '%foo%' ORDER BY id DESC LIMIT 10").unwrap();
        match stmt {
            Statement::Select(s) => {
                assert_eq!(s.table, "widgets");
                assert_eq!(s.filter.unwrap().comparisons.len(), 2);
                assert_eq!(s.order_by.unwrap().1, OrderDir::Desc);
                assert_eq!(s.limit, Some(10));
            }
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn parses_insert() {
        let stmt = parse("INSERT INTO widgets (id, name) VALUES (1, 'hello')").unwrap();
        match stmt {
            Statement::Insert(i) => {
                assert_eq!(i.table, "widgets");
                assert_eq!(i.values, vec![Literal::Int(1), Literal::Text("hello".to_string())]);
            }
            _ => panic!("expected Insert"),
        }
    }

    #[test]
    fn parses_create_index_with_using() {
        let stmt = parse("CREATE INDEX widgets_name ON widgets (name) USING TRIGRAM").unwrap();
        match stmt {
            Statement::CreateIndex(i) => assert_eq!(i.using, IndexUsing::Trigram),
            _ => panic!("expected CreateIndex"),
        }
    }
}
