//! Explicit transaction handle with savepoint children.
//!
//! # Invariants
//! - `Idle -> Active -> {Committed, RolledBack}` per scope; finished
//!   handles reject further statements.
//! - A child borrows its parent mutably, so the parent is unusable until the
//!   child is finished.
//! - Rolling back a savepoint leaves the parent `Active`.
//! - Dropping an `Active` handle rolls it back.

use super::{IsolationLevel, ProviderError, ProviderResult, Session};
use crate::builder::Statement;
use crate::model::record::Record;
use log::{debug, error, warn};
use std::time::Instant;
use uuid::Uuid;

/// What kind of boundary a handle represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Top { isolation: IsolationLevel },
    Savepoint { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// One transaction scope pinned to one session.
pub struct Transaction<'s> {
    session: &'s mut dyn Session,
    scope: Scope,
    state: TxState,
    depth: usize,
    label: String,
    started_at: Instant,
}

impl<'s> Transaction<'s> {
    /// Begins a top-level transaction on `session`.
    pub fn begin(session: &'s mut dyn Session, isolation: IsolationLevel) -> ProviderResult<Self> {
        session.execute_batch(isolation.begin_sql())?;
        let label = Uuid::new_v4().simple().to_string()[..8].to_string();
        debug!(
            "event=tx_begin module=provider scope=top depth=0 tx={} isolation={}",
            label,
            isolation.as_str()
        );
        Ok(Self {
            session,
            scope: Scope::Top { isolation },
            state: TxState::Active,
            depth: 0,
            label,
            started_at: Instant::now(),
        })
    }

    /// Opens a savepoint on the same session.
    pub fn child(&mut self) -> ProviderResult<Transaction<'_>> {
        self.ensure_active()?;
        let depth = self.depth + 1;
        let name = format!("sp_{depth}");
        self.session.execute_batch(&format!("SAVEPOINT {name}"))?;
        debug!(
            "event=tx_begin module=provider scope=savepoint depth={} tx={}",
            depth, self.label
        );
        Ok(Transaction {
            session: &mut *self.session,
            scope: Scope::Savepoint { name },
            state: TxState::Active,
            depth,
            label: self.label.clone(),
            started_at: Instant::now(),
        })
    }

    /// Runs `work` inside a savepoint, releasing it on success and rolling
    /// it back on error while this scope stays usable.
    pub fn nested<T, E>(
        &mut self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ProviderError>,
    {
        let mut child = self.child()?;
        match work(&mut child) {
            Ok(value) => {
                child.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = child.rollback() {
                    warn!(
                        "event=tx_rollback module=provider scope=savepoint status=error error_code={} error={}",
                        rollback_err.code(),
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Executes one statement in this scope.
    pub fn execute(&mut self, statement: &Statement) -> ProviderResult<Vec<Record>> {
        self.ensure_active()?;
        self.session.query(statement)
    }

    pub fn commit(mut self) -> ProviderResult<()> {
        self.finish(true)
    }

    pub fn rollback(mut self) -> ProviderResult<()> {
        self.finish(false)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    fn ensure_active(&self) -> ProviderResult<()> {
        if self.is_active() {
            return Ok(());
        }
        Err(ProviderError::InactiveTransaction {
            scope: self.scope_name().to_string(),
        })
    }

    fn scope_name(&self) -> &str {
        match &self.scope {
            Scope::Top { .. } => "top",
            Scope::Savepoint { name } => name.as_str(),
        }
    }

    fn finish(&mut self, commit: bool) -> ProviderResult<()> {
        self.ensure_active()?;
        let sql = match (&self.scope, commit) {
            (Scope::Top { .. }, true) => "COMMIT".to_string(),
            (Scope::Top { .. }, false) => "ROLLBACK".to_string(),
            (Scope::Savepoint { name }, true) => format!("RELEASE SAVEPOINT {name}"),
            (Scope::Savepoint { name }, false) => {
                format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}")
            }
        };

        // State only advances once the store accepted the outcome, so a
        // failed commit is still rolled back on drop.
        self.session.execute_batch(&sql)?;
        self.state = if commit {
            TxState::Committed
        } else {
            TxState::RolledBack
        };
        debug!(
            "event={} module=provider scope={} depth={} tx={} duration_ms={}",
            if commit { "tx_commit" } else { "tx_rollback" },
            self.scope_name(),
            self.depth,
            self.label,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        if let Err(err) = self.finish(false) {
            error!(
                "event=tx_rollback module=provider scope={} depth={} tx={} status=error error_code={} error={}",
                self.scope_name(),
                self.depth,
                self.label,
                err.code(),
                err
            );
        }
    }
}
