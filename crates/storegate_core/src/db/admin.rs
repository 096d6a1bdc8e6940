//! Administrative operations for bootstrap and test fixtures.
//!
//! These run in autocommit on a freshly acquired session and never take
//! part in gateway transactions.

use super::{map_driver_error, SqliteProvider};
use crate::builder::quote_ident;
use crate::model::schema::TableSchema;
use crate::provider::{Provider, ProviderError, ProviderResult};
use log::{error, info};
use rusqlite::Connection;
use std::time::Instant;

impl SqliteProvider {
    /// Applies a DDL script atomically.
    ///
    /// # Side effects
    /// - Emits `schema_apply` logging events with duration and status.
    pub fn apply_schema(&self, ddl: &str) -> ProviderResult<()> {
        let started_at = Instant::now();
        let mut session = self.acquire()?;
        let outcome = session
            .conn
            .transaction()
            .and_then(|tx| {
                tx.execute_batch(ddl)?;
                tx.commit()
            })
            .map_err(map_driver_error);

        match &outcome {
            Ok(()) => info!(
                "event=schema_apply module=db status=ok bytes={} duration_ms={}",
                ddl.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=schema_apply module=db status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        outcome
    }

    /// Drops the named tables when present, in the given order.
    pub fn drop_tables(&self, tables: &[&str]) -> ProviderResult<()> {
        let session = self.acquire()?;
        for table in tables {
            session
                .conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
                .map_err(map_driver_error)?;
        }
        info!("event=schema_drop module=db status=ok tables={}", tables.len());
        Ok(())
    }

    /// Deletes every row of the named tables, in the given order.
    pub fn truncate(&self, tables: &[&str]) -> ProviderResult<()> {
        let session = self.acquire()?;
        for table in tables {
            session
                .conn
                .execute_batch(&format!("DELETE FROM {}", quote_ident(table)))
                .map_err(map_driver_error)?;
        }
        Ok(())
    }

    /// Checks that the table and every column of `schema` exist.
    pub fn verify_table(&self, schema: &TableSchema) -> ProviderResult<()> {
        let session = self.acquire()?;
        if !table_exists(&session.conn, schema.name())? {
            return Err(ProviderError::MissingRequiredTable(schema.name().to_string()));
        }

        let present = table_columns(&session.conn, schema.name())?;
        for column in schema.columns() {
            if !present.iter().any(|name| name == &column.name) {
                return Err(ProviderError::MissingRequiredColumn {
                    table: schema.name().to_string(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn table_exists(conn: &Connection, table: &str) -> ProviderResult<bool> {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )
        .map_err(map_driver_error)?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> ProviderResult<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({});", quote_ident(table)))
        .map_err(map_driver_error)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(map_driver_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_driver_error)?;
    Ok(names)
}
