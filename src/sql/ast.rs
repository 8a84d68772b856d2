//! Parsed representation of the SQL subset. Mirrors the shape of the grammar in
//! `sql.pest` one-to-one rather than an optimizer-friendly IR: a thin parse tree,
//! not a binder-ready logical plan.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

/// An AND-only conjunction of comparisons (no OR, no parentheses, per §4.9 scope).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cond {
    pub comparisons: Vec<Comparison>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefAst {
    pub name: String,
    pub type_name: String,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub references: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub table: String,
    pub columns: Vec<ColumnDefAst>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexUsing {
    BTree,
    Trigram,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndex {
    pub index: String,
    pub table: String,
    pub column: String,
    pub using: IndexUsing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateView {
    pub view: String,
    pub query: Box<Select>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub filter: Option<Cond>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: Option<Cond>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectList {
    Star,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub columns: SelectList,
    pub table: String,
    pub filter: Option<Cond>,
    pub order_by: Option<(String, OrderDir)>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    CreateView(CreateView),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Select(Select),
}
