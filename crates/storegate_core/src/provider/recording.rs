//! Recording provider test double.
//!
//! Every control statement and compiled statement is appended to a shared
//! log; statements are answered from a queue of canned results, falling back
//! to "no rows" once the queue is empty.

use super::{IsolationLevel, Provider, ProviderError, ProviderResult, Session};
use crate::builder::{Statement, StatementKind};
use crate::model::record::Record;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// One entry of the recorded log.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// Begin/savepoint/commit/rollback SQL.
    Control(String),
    Statement(Statement),
}

#[derive(Default)]
struct Shared {
    log: Vec<Recorded>,
    responses: VecDeque<ProviderResult<Vec<Record>>>,
}

/// Provider double that records issued SQL and replays canned results.
#[derive(Clone, Default)]
pub struct RecordingProvider {
    shared: Arc<Mutex<Shared>>,
    isolation: IsolationLevel,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Queues the rows returned by the next unanswered statement.
    pub fn push_rows(&self, rows: Vec<Record>) {
        self.lock().responses.push_back(Ok(rows));
    }

    /// Queues an error for the next unanswered statement.
    pub fn push_error(&self, error: ProviderError) {
        self.lock().responses.push_back(Err(error));
    }

    /// Snapshot of the full log, control SQL included.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.lock().log.clone()
    }

    /// Compiled statements only, in issue order.
    pub fn statements(&self) -> Vec<Statement> {
        self.lock()
            .log
            .iter()
            .filter_map(|entry| match entry {
                Recorded::Statement(statement) => Some(statement.clone()),
                Recorded::Control(_) => None,
            })
            .collect()
    }

    pub fn statement_kinds(&self) -> Vec<StatementKind> {
        self.statements()
            .into_iter()
            .map(|statement| statement.kind)
            .collect()
    }

    pub fn clear(&self) {
        let mut shared = self.lock();
        shared.log.clear();
        shared.responses.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panicking test thread must not hide the log from later asserts.
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Provider for RecordingProvider {
    type Session = RecordingSession;

    fn acquire(&self) -> ProviderResult<Self::Session> {
        Ok(RecordingSession {
            shared: Arc::clone(&self.shared),
        })
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

pub struct RecordingSession {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingSession {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Session for RecordingSession {
    fn query(&mut self, statement: &Statement) -> ProviderResult<Vec<Record>> {
        let mut shared = self.lock();
        shared.log.push(Recorded::Statement(statement.clone()));
        shared.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn execute_batch(&mut self, sql: &str) -> ProviderResult<()> {
        self.lock().log.push(Recorded::Control(sql.to_string()));
        Ok(())
    }
}
