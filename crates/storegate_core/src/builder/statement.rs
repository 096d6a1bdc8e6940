//! Compiled, parameterized statements.

use crate::model::record::Value;
use std::fmt::{Display, Formatter};

/// Logical operation a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    SelectForUpdate,
    Count,
    Exists,
    Insert,
    Update,
    Upsert,
    Delete,
}

impl StatementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::SelectForUpdate => "select_for_update",
            Self::Count => "count",
            Self::Exists => "exists",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, Self::Select | Self::Count | Self::Exists)
    }
}

impl Display for StatementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL text with positional `?N` placeholders and their bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(kind: StatementKind, sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            params,
        }
    }
}

/// Accumulates SQL text and assigns placeholder numbers in bind order.
#[derive(Debug, Default)]
pub(crate) struct SqlWriter {
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// Binds a value and returns its placeholder.
    pub(crate) fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    pub(crate) fn finish(self, kind: StatementKind) -> Statement {
        Statement::new(kind, self.sql, self.params)
    }
}

/// Quotes an identifier for the SQLite dialect.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
