//! Static table metadata.
//!
//! # Responsibility
//! - Describe the columns a gateway may read and write.
//! - Name the structural columns: primary key, tenant, timestamps.
//! - Decode raw driver rows into typed records.
//!
//! # Invariants
//! - Structural columns are always members of `columns`.
//! - Schemas are immutable once handed to a gateway.

use super::record::{Record, Value};

pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Storage class of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    Bool,
    Json,
    /// Epoch milliseconds.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Real)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Bool)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Json)
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Timestamp)
    }
}

/// Immutable description of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    primary_key: String,
    tenant_column: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl TableSchema {
    /// Creates a schema keyed by `id`; an integer `id` column is added when
    /// the caller did not declare one.
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = Column>) -> Self {
        let mut schema = Self {
            name: name.into(),
            columns: columns.into_iter().collect(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            tenant_column: None,
            created_at: None,
            updated_at: None,
        };
        schema.ensure_column(DEFAULT_PRIMARY_KEY, ColumnKind::Integer);
        schema
    }

    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.ensure_column(&column, ColumnKind::Integer);
        self.primary_key = column;
        self
    }

    /// Declares the tenant partition column.
    pub fn with_tenant(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.ensure_column(&column, ColumnKind::Text);
        self.tenant_column = Some(column);
        self
    }

    /// Declares creation and modification timestamp columns.
    pub fn with_timestamps(
        mut self,
        created_at: impl Into<String>,
        updated_at: impl Into<String>,
    ) -> Self {
        let created_at = created_at.into();
        let updated_at = updated_at.into();
        self.ensure_column(&created_at, ColumnKind::Timestamp);
        self.ensure_column(&updated_at, ColumnKind::Timestamp);
        self.created_at = Some(created_at);
        self.updated_at = Some(updated_at);
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn columns(&self) -> &[Column] {
        self.columns.as_slice()
    }

    pub fn primary_key(&self) -> &str {
        self.primary_key.as_str()
    }

    pub fn tenant_column(&self) -> Option<&str> {
        self.tenant_column.as_deref()
    }

    pub fn created_at_column(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    pub fn updated_at_column(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Whether the column is managed by the store rather than written from
    /// caller payloads (primary key, tenant, timestamps).
    pub fn is_structural(&self, name: &str) -> bool {
        name == self.primary_key
            || self.tenant_column.as_deref() == Some(name)
            || self.created_at.as_deref() == Some(name)
            || self.updated_at.as_deref() == Some(name)
    }

    /// Columns a caller payload may set, in declaration order.
    pub fn writable_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(move |column| !self.is_structural(&column.name))
    }

    /// Converts a raw driver row into schema-typed values.
    ///
    /// Columns unknown to the schema pass through untouched.
    pub fn decode_row(&self, raw: Record) -> Result<Record, String> {
        raw.into_iter()
            .map(|(name, value)| -> Result<(String, Value), String> {
                let decoded = match self.column(&name).map(|column| column.kind) {
                    Some(kind) => decode_value(kind, value)
                        .map_err(|message| format!("{}.{name}: {message}", self.name))?,
                    None => value,
                };
                Ok((name, decoded))
            })
            .collect()
    }

    fn ensure_column(&mut self, name: &str, kind: ColumnKind) {
        if !self.has_column(name) {
            self.columns.push(Column::new(name, kind));
        }
    }
}

fn decode_value(kind: ColumnKind, value: Value) -> Result<Value, String> {
    match (kind, value) {
        (ColumnKind::Bool, Value::Integer(0)) => Ok(Value::Bool(false)),
        (ColumnKind::Bool, Value::Integer(1)) => Ok(Value::Bool(true)),
        (ColumnKind::Bool, Value::Integer(other)) => {
            Err(format!("invalid boolean value `{other}`"))
        }
        (ColumnKind::Json, Value::Text(text)) => serde_json::from_str(&text)
            .map(Value::Json)
            .map_err(|err| format!("invalid json document: {err}")),
        (ColumnKind::Real, Value::Integer(value)) => Ok(Value::Real(value as f64)),
        (_, value) => Ok(value),
    }
}
