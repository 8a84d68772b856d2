//! Crate-wide error type.
//!
//! Every architectural layer (vfs, pager, wal, record, btree, catalog) defines its own
//! `thiserror`-derived `Error` enum for the failures specific to that layer, and converts
//! into this crate-wide [`DbError`] at the boundary, tagged with the [`ErrorKind`] taxonomy
//! that callers (the storage glue, the SQL executor, tests) actually branch on.

pub type DbResult<T> = Result<T, DbError>;

/// The error-kind taxonomy a caller can match on, independent of which layer raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Underlying VFS failure, short read/write, page-layout violation.
    Io,
    /// Bad header/frame checksum, bad magic, truncated record, unexpected page type.
    Corruption,
    /// NOT NULL, UNIQUE (including PK), FOREIGN KEY violation.
    Constraint,
    /// Reader aborted, double-begin, commit/rollback with no active transaction.
    Transaction,
    /// Parser/binder/planner rejection.
    Sql,
    /// Invariant failure; considered a bug.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Io => "IO",
            ErrorKind::Corruption => "CORRUPTION",
            ErrorKind::Constraint => "CONSTRAINT",
            ErrorKind::Transaction => "TRANSACTION",
            ErrorKind::Sql => "SQL",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct DbError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<String>,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), context: None }
    }

    pub fn with_context(kind: ErrorKind, message: impl Into<String>, context: impl Into<String>) -> Self {
        Self { kind, message: message.into(), context: Some(context.into()) }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Constraint, message)
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn sql(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sql, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}: {} ({})", self.kind, self.message, ctx),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::io(e.to_string())
    }
}

impl From<crate::vfs::Error> for DbError {
    fn from(e: crate::vfs::Error) -> Self {
        DbError::io(e.to_string())
    }
}

impl From<crate::dbheader::Error> for DbError {
    fn from(e: crate::dbheader::Error) -> Self {
        DbError::corruption(e.to_string())
    }
}

impl From<crate::pager::Error> for DbError {
    fn from(e: crate::pager::Error) -> Self {
        use crate::pager::Error::*;
        match e {
            NoEvictablePage => DbError::internal(e.to_string()),
            PageOutOfBounds { .. } => DbError::corruption(e.to_string()),
            ReaderAborted => DbError::transaction(e.to_string()),
            Io(inner) => inner.into(),
            Header(inner) => inner.into(),
            Wal(inner) => inner.into(),
        }
    }
}

impl From<crate::wal::Error> for DbError {
    fn from(e: crate::wal::Error) -> Self {
        use crate::wal::Error::*;
        match e {
            ReaderAborted => DbError::transaction(e.to_string()),
            WriterAlreadyActive | NoActiveWriter | NoActiveReader => DbError::transaction(e.to_string()),
            Corruption(_) => DbError::corruption(e.to_string()),
            Io(inner) => inner.into(),
            Failpoint(_) => DbError::io(e.to_string()),
        }
    }
}

impl From<crate::record::Error> for DbError {
    fn from(e: crate::record::Error) -> Self {
        DbError::corruption(e.to_string())
    }
}

impl From<crate::btree::Error> for DbError {
    fn from(e: crate::btree::Error) -> Self {
        use crate::btree::Error::*;
        match e {
            LeafOverflow => DbError::io(e.to_string()),
            Pager(inner) => inner.into(),
            Record(inner) => inner.into(),
            Corruption(_) => DbError::corruption(e.to_string()),
        }
    }
}

impl From<crate::catalog::Error> for DbError {
    fn from(e: crate::catalog::Error) -> Self {
        use crate::catalog::Error::*;
        match e {
            NotFound(_) => DbError::sql(e.to_string()),
            AlreadyExists(_) => DbError::sql(e.to_string()),
            Btree(inner) => inner.into(),
            Record(inner) => inner.into(),
            InvalidType(_) => DbError::sql(e.to_string()),
        }
    }
}
