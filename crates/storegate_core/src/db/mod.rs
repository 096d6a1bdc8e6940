//! SQLite-backed provider.
//!
//! # Responsibility
//! - Own the `r2d2` pool of configured SQLite connections.
//! - Execute compiled statements and convert rows into records.
//! - Translate driver failures into provider error kinds.
//! - Offer the narrow administrative API used by bootstrap and tests.
//!
//! # Invariants
//! - Every pooled connection has `foreign_keys=ON` and the configured busy
//!   timeout before it is handed out.
//! - Administrative operations run in autocommit, outside transactions.

mod admin;
mod errors;
mod open;

pub use errors::{map_driver_error, parse_violated_key};
pub use open::{open_provider, open_provider_in_memory};

use crate::builder::Statement;
use crate::model::record::{Record, Value};
use crate::provider::{IsolationLevel, Provider, ProviderError, ProviderResult, Session};
use log::debug;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::time::Instant;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// Provider over a pool of SQLite connections.
pub struct SqliteProvider {
    pool: SqlitePool,
    isolation: IsolationLevel,
}

impl SqliteProvider {
    pub(crate) fn new(pool: SqlitePool, isolation: IsolationLevel) -> Self {
        Self { pool, isolation }
    }

    /// Largest number of simultaneously checked-out sessions.
    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }
}

impl Provider for SqliteProvider {
    type Session = SqliteSession;

    fn acquire(&self) -> ProviderResult<Self::Session> {
        let conn = self.pool.get()?;
        Ok(SqliteSession { conn })
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// One pooled connection; returned to the pool on drop.
pub struct SqliteSession {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl SqliteSession {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Session for SqliteSession {
    fn query(&mut self, statement: &Statement) -> ProviderResult<Vec<Record>> {
        query_records(&self.conn, statement)
    }

    fn execute_batch(&mut self, sql: &str) -> ProviderResult<()> {
        self.conn.execute_batch(sql).map_err(map_driver_error)
    }
}

fn query_records(conn: &Connection, statement: &Statement) -> ProviderResult<Vec<Record>> {
    let started_at = Instant::now();
    let params = statement
        .params
        .iter()
        .map(to_sql_value)
        .collect::<ProviderResult<Vec<_>>>()?;

    let mut stmt = conn
        .prepare_cached(&statement.sql)
        .map_err(map_driver_error)?;
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt
        .query(params_from_iter(params))
        .map_err(map_driver_error)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(map_driver_error)? {
        let mut record = Record::new();
        for (index, name) in columns.iter().enumerate() {
            let value = row.get_ref(index).map_err(map_driver_error)?;
            record.insert(name.as_str(), from_sql_ref(name, value)?);
        }
        records.push(record);
    }

    debug!(
        "event=statement_execute module=db kind={} write={} params={} rows={} duration_ms={}",
        statement.kind,
        statement.kind.is_write(),
        statement.params.len(),
        records.len(),
        started_at.elapsed().as_millis()
    );
    Ok(records)
}

fn to_sql_value(value: &Value) -> ProviderResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(value) => SqlValue::Integer(i64::from(*value)),
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Json(document) => SqlValue::Text(document.to_string()),
        Value::Related(_) => {
            return Err(ProviderError::InvalidData(
                "related children cannot be bound as a parameter".to_string(),
            ));
        }
    })
}

fn from_sql_ref(column: &str, value: ValueRef<'_>) -> ProviderResult<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Real(value) => Ok(Value::Real(value)),
        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec())
            .map(Value::Text)
            .map_err(|_| ProviderError::InvalidData(format!("non-utf8 text in column `{column}`"))),
        ValueRef::Blob(_) => Err(ProviderError::InvalidData(format!(
            "blob values are not supported (column `{column}`)"
        ))),
    }
}
