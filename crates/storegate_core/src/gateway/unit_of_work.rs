//! Caller-owned transaction shared by several gateways.
//!
//! # Invariants
//! - Each bound operation runs in its own savepoint, so a failed operation
//!   leaves the outer transaction usable.
//! - Only one operation may use the transaction at a time; re-entry (for
//!   example from inside a mutator) is a contract violation.

use super::sql_gateway::GatewayCore;
use super::{Gateway, GatewayError, GatewayResult, Mutator};
use crate::context::RequestContext;
use crate::model::filter::Filter;
use crate::model::page::{Page, PageOptions};
use crate::model::record::{Record, RowKey, Value};
use crate::provider::Transaction;
use std::cell::RefCell;
use std::collections::HashMap;

pub struct UnitOfWork<'t, 's> {
    tx: RefCell<&'t mut Transaction<'s>>,
}

impl<'t, 's> UnitOfWork<'t, 's> {
    pub fn new(tx: &'t mut Transaction<'s>) -> Self {
        Self {
            tx: RefCell::new(tx),
        }
    }

    /// Runs `work` in a savepoint of the wrapped transaction.
    pub fn run<T>(
        &self,
        work: impl FnOnce(&mut Transaction<'_>) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        let mut tx = self.tx.try_borrow_mut().map_err(|_| {
            GatewayError::Contract(
                "unit of work re-entered while another operation is running".to_string(),
            )
        })?;
        tx.nested(work)
    }
}

/// Gateway view whose operations join a `UnitOfWork`.
pub struct BoundGateway<'a, 't, 's> {
    core: &'a GatewayCore,
    unit: &'a UnitOfWork<'t, 's>,
}

impl<'a, 't, 's> BoundGateway<'a, 't, 's> {
    pub(crate) fn new(core: &'a GatewayCore, unit: &'a UnitOfWork<'t, 's>) -> Self {
        Self { core, unit }
    }
}

impl Gateway for BoundGateway<'_, '_, '_> {
    fn filter(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page: Option<&PageOptions>,
    ) -> GatewayResult<Vec<Record>> {
        self.unit
            .run(|tx| self.core.filter_in(tx, ctx, filters, page))
    }

    fn paginate(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page: &PageOptions,
    ) -> GatewayResult<Page<Record>> {
        self.unit
            .run(|tx| self.core.paginate_in(tx, ctx, filters, page))
    }

    fn get(&self, ctx: &RequestContext, id: &Value) -> GatewayResult<Option<Record>> {
        self.unit.run(|tx| self.core.get_in(tx, ctx, id))
    }

    fn add(&self, ctx: &RequestContext, record: Record) -> GatewayResult<Record> {
        self.unit.run(|tx| self.core.add_in(tx, ctx, record))
    }

    fn update(
        &self,
        ctx: &RequestContext,
        record: Record,
        if_unmodified_since: Option<&Value>,
    ) -> GatewayResult<Record> {
        self.unit
            .run(|tx| self.core.update_in(tx, ctx, record, if_unmodified_since))
    }

    fn update_transactional(
        &self,
        ctx: &RequestContext,
        id: &Value,
        mutator: &mut Mutator<'_>,
    ) -> GatewayResult<Record> {
        self.unit
            .run(|tx| self.core.update_transactional_in(tx, ctx, id, mutator))
    }

    fn upsert(&self, ctx: &RequestContext, record: Record) -> GatewayResult<Record> {
        self.unit.run(|tx| self.core.upsert_in(tx, ctx, record))
    }

    fn remove(&self, ctx: &RequestContext, id: &Value) -> GatewayResult<bool> {
        self.unit.run(|tx| self.core.remove_in(tx, ctx, id))
    }

    fn count(&self, ctx: &RequestContext, filters: &[Filter]) -> GatewayResult<u64> {
        self.unit.run(|tx| self.core.count_in(tx, ctx, filters))
    }

    fn exists(&self, ctx: &RequestContext, filters: &[Filter]) -> GatewayResult<bool> {
        self.unit.run(|tx| self.core.exists_in(tx, ctx, filters))
    }

    fn get_related(
        &self,
        ctx: &RequestContext,
        field: &str,
        parent_ids: &[Value],
    ) -> GatewayResult<HashMap<RowKey, Vec<Record>>> {
        self.unit
            .run(|tx| self.core.get_related_in(tx, ctx, field, parent_ids))
    }

    fn set_related(
        &self,
        ctx: &RequestContext,
        parent_id: &Value,
        field: &str,
        desired: Vec<Record>,
    ) -> GatewayResult<Vec<Record>> {
        self.unit
            .run(|tx| self.core.set_related_in(tx, ctx, parent_id, field, desired))
    }
}
