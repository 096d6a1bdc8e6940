//! Transactional execution provider contracts.
//!
//! # Responsibility
//! - Define how sessions are acquired and how statements run on them.
//! - Provide scoped transaction entry points with guaranteed release.
//! - Carry the driver-to-domain error kinds (`AlreadyExists`, `Conflict`).
//!
//! # Invariants
//! - One transaction scope pins one session for its whole lifetime.
//! - Nested scopes reuse the parent session through savepoints.
//! - Scopes leaving by error, early return or unwinding are rolled back.
//! - Providers never retry; retry policy belongs to callers.

mod recording;
mod transaction;

pub use recording::{Recorded, RecordingProvider, RecordingSession};
pub use transaction::{Scope, Transaction, TxState};

use crate::builder::Statement;
use crate::model::record::{Record, Value};
use log::warn;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const CONFLICT_REASON: &str = "could not execute query due to concurrent update";

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug)]
pub enum ProviderError {
    /// Unique constraint violated; key/value are best-effort annotations.
    AlreadyExists {
        key: Option<String>,
        value: Option<Value>,
    },
    /// Serialization failure or lock contention under concurrent writers.
    Conflict(String),
    Sqlite(rusqlite::Error),
    Pool(r2d2::Error),
    /// Driver returned a value the record model cannot represent.
    InvalidData(String),
    /// A finished transaction handle was used again.
    InactiveTransaction { scope: String },
    MissingRequiredTable(String),
    MissingRequiredColumn { table: String, column: String },
}

impl ProviderError {
    pub fn conflict() -> Self {
        Self::Conflict(CONFLICT_REASON.to_string())
    }

    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyExists { .. } => "already_exists",
            Self::Conflict(_) => "conflict",
            Self::Sqlite(_) => "driver",
            Self::Pool(_) => "pool",
            Self::InvalidData(_) => "invalid_data",
            Self::InactiveTransaction { .. } => "inactive_transaction",
            Self::MissingRequiredTable(_) => "missing_table",
            Self::MissingRequiredColumn { .. } => "missing_column",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists { key, value } => match (key, value) {
                (Some(key), Some(value)) => write!(f, "already exists: {key}={value}"),
                (Some(key), None) => write!(f, "already exists: {key}"),
                _ => write!(f, "already exists"),
            },
            Self::Conflict(reason) => write!(f, "conflict: {reason}"),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Pool(err) => write!(f, "connection pool error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::InactiveTransaction { scope } => {
                write!(f, "transaction scope `{scope}` is no longer active")
            }
            Self::MissingRequiredTable(table) => write!(f, "required table `{table}` is missing"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column `{column}` is missing from table `{table}`")
            }
        }
    }
}

impl Error for ProviderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Pool(err) => Some(err),
            _ => None,
        }
    }
}

impl From<r2d2::Error> for ProviderError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}

/// Visibility guarantee requested when a top-level transaction begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Snapshot reads; the write lock is taken lazily on first write.
    #[default]
    RepeatableRead,
    /// Write lock taken at begin; concurrent writers queue up.
    Serializable,
    /// Readers are excluded as well.
    Exclusive,
}

impl IsolationLevel {
    pub fn begin_sql(self) -> &'static str {
        match self {
            Self::RepeatableRead => "BEGIN DEFERRED",
            Self::Serializable => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepeatableRead => "repeatable_read",
            Self::Serializable => "serializable",
            Self::Exclusive => "exclusive",
        }
    }

    /// Level that holds the write lock from `BEGIN`, used by read-modify-write
    /// scopes whose first statement locks a row.
    pub fn for_locking_reads(self) -> Self {
        match self {
            Self::RepeatableRead => Self::Serializable,
            other => other,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "repeatable_read" => Some(Self::RepeatableRead),
            "serializable" => Some(Self::Serializable),
            "exclusive" => Some(Self::Exclusive),
            _ => None,
        }
    }
}

/// One physical connection able to run statements.
pub trait Session {
    /// Runs one compiled statement and returns every produced row.
    fn query(&mut self, statement: &Statement) -> ProviderResult<Vec<Record>>;
    /// Runs control SQL (begin, savepoint, commit) that yields no rows.
    fn execute_batch(&mut self, sql: &str) -> ProviderResult<()>;
}

/// Owner of sessions and the transactions opened on them.
pub trait Provider: Send + Sync {
    type Session: Session;

    /// Checks out a session, blocking until one is free.
    fn acquire(&self) -> ProviderResult<Self::Session>;

    /// Isolation used by `transaction`.
    fn isolation(&self) -> IsolationLevel;

    /// Runs `work` in a new top-level transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back otherwise. Unwinding
    /// through `work` rolls back as the handle is dropped.
    fn transaction<T, E>(
        &self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProviderError>,
    {
        self.transaction_with(self.isolation(), work)
    }

    fn transaction_with<T, E>(
        &self,
        isolation: IsolationLevel,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProviderError>,
    {
        let mut session = self.acquire()?;
        let mut tx = Transaction::begin(&mut session, isolation)?;
        match work(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=tx_rollback module=provider status=error error_code={} error={}",
                        rollback_err.code(),
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Like `transaction`, but always rolls back, whatever `work` returns.
    fn testing_transaction<T, E>(
        &self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProviderError>,
    {
        let mut session = self.acquire()?;
        let mut tx = Transaction::begin(&mut session, self.isolation())?;
        let outcome = work(&mut tx);
        tx.rollback()?;
        outcome
    }

    /// Runs one statement in its own transaction.
    fn execute(&self, statement: &Statement) -> ProviderResult<Vec<Record>> {
        self.transaction(|tx| tx.execute(statement))
    }
}
