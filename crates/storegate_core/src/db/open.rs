//! Connection pool bootstrap for SQLite.
//!
//! # Responsibility
//! - Build file or in-memory connection pools from `ProviderConfig`.
//! - Configure connection pragmas required by gateway behavior.
//!
//! # Invariants
//! - Pooled connections have `foreign_keys=ON` and the configured busy timeout.
//! - File databases run in WAL mode so readers do not block the writer.
//! - In-memory pools hold exactly one connection that is never recycled.

use super::SqliteProvider;
use crate::config::ProviderConfig;
use crate::provider::{ProviderError, ProviderResult};
use log::{error, info};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens a pooled provider as described by `config`.
///
/// # Side effects
/// - Establishes every pooled connection eagerly.
/// - Emits `db_open` logging events with duration and status.
pub fn open_provider(config: &ProviderConfig) -> ProviderResult<SqliteProvider> {
    let started_at = Instant::now();
    let mode = if config.db_path.is_some() {
        "file"
    } else {
        "memory"
    };
    info!("event=db_open module=db status=start mode={mode}");

    match build_provider(config) {
        Ok(provider) => {
            info!(
                "event=db_open module=db status=ok mode={} pool_size={} isolation={} duration_ms={}",
                mode,
                provider.pool_size(),
                config.isolation.as_str(),
                started_at.elapsed().as_millis()
            );
            Ok(provider)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code={} error={}",
                mode,
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            Err(err)
        }
    }
}

/// Opens a private in-memory database with default settings.
pub fn open_provider_in_memory() -> ProviderResult<SqliteProvider> {
    open_provider(&ProviderConfig::in_memory())
}

fn build_provider(config: &ProviderConfig) -> ProviderResult<SqliteProvider> {
    let busy_timeout = config.busy_timeout();
    let manager = match &config.db_path {
        Some(path) => SqliteConnectionManager::file(path)
            .with_init(move |conn| bootstrap_connection(conn, busy_timeout, true)),
        None => SqliteConnectionManager::memory()
            .with_init(move |conn| bootstrap_connection(conn, busy_timeout, false)),
    };

    let pool = r2d2::Pool::builder()
        .max_size(config.effective_pool_size())
        .connection_timeout(config.connection_timeout())
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)
        .map_err(ProviderError::from)?;

    Ok(SqliteProvider::new(pool, config.isolation))
}

fn bootstrap_connection(
    conn: &mut Connection,
    busy_timeout: Duration,
    write_ahead_log: bool,
) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    if write_ahead_log {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    Ok(())
}
