//! Gateway over a relational provider.
//!
//! # Responsibility
//! - Compose builder statements into the logical gateway operations.
//! - Disambiguate empty update results into `Conflict` or `DoesNotExist`.
//! - Fan relation payloads out to child tables inside the parent write.
//!
//! # Invariants
//! - `GatewayCore` operations never open or finish transactions; callers
//!   supply the scope.
//! - Relation writes share the scope of their parent write.

use super::relation::Relation;
use super::table::TableAccess;
use super::unit_of_work::{BoundGateway, UnitOfWork};
use super::{Gateway, GatewayError, GatewayResult, Mutator, STALE_WRITE_REASON};
use crate::builder::BuildContext;
use crate::context::{system_clock, Clock, RequestContext};
use crate::model::filter::Filter;
use crate::model::page::{Page, PageOptions};
use crate::model::record::{Record, RowKey, Value};
use crate::model::schema::TableSchema;
use crate::provider::{Provider, Transaction};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

/// Table configuration plus the transaction-agnostic operation bodies.
pub(crate) struct GatewayCore {
    table: TableSchema,
    multitenant: bool,
    relations: Vec<Relation>,
    clock: Arc<dyn Clock>,
}

impl GatewayCore {
    fn build_context<'a>(&self, ctx: &'a RequestContext) -> BuildContext<'a> {
        BuildContext {
            tenant: ctx.tenant(),
            now_ms: self.clock.now_ms(),
        }
    }

    fn access<'a>(&'a self, ctx: BuildContext<'a>) -> TableAccess<'a> {
        TableAccess::new(&self.table, self.multitenant, ctx)
    }

    fn id_filter(&self, id: &Value) -> [Filter; 1] {
        [Filter::eq(self.table.primary_key(), id.clone())]
    }

    fn relation(&self, field: &str) -> GatewayResult<&Relation> {
        self.relations
            .iter()
            .find(|relation| relation.field() == field)
            .ok_or_else(|| {
                GatewayError::Contract(format!(
                    "table `{}` declares no relation `{field}`",
                    self.table.name()
                ))
            })
    }

    pub(crate) fn filter_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        filters: &[Filter],
        page: Option<&PageOptions>,
    ) -> GatewayResult<Vec<Record>> {
        let build = self.build_context(ctx);
        let mut rows = self.access(build).select(tx, filters, page)?;
        for relation in &self.relations {
            relation.attach(
                tx,
                self.multitenant,
                build,
                self.table.primary_key(),
                &mut rows,
            )?;
        }
        Ok(rows)
    }

    /// Skips the count query when the first page came back short, since the
    /// page then holds every matching row.
    pub(crate) fn paginate_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        filters: &[Filter],
        page: &PageOptions,
    ) -> GatewayResult<Page<Record>> {
        let items = self.filter_in(tx, ctx, filters, Some(page))?;
        let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);

        let total = if page.is_first_page() && items.len() < limit {
            items.len() as u64
        } else {
            self.access(self.build_context(ctx)).count(tx, filters)?
        };

        let order_column = if self.table.has_column(page.order_column()) {
            page.order_column()
        } else {
            self.table.primary_key()
        };
        let next_cursor = if items.len() == limit {
            items
                .last()
                .and_then(|row| row.non_null(order_column))
                .cloned()
        } else {
            None
        };

        Ok(Page {
            items,
            total,
            limit: Some(page.limit()),
            offset: page.cursor().is_none().then(|| page.offset()),
            next_cursor,
        })
    }

    pub(crate) fn get_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        id: &Value,
    ) -> GatewayResult<Option<Record>> {
        Ok(self
            .filter_in(tx, ctx, &self.id_filter(id), None)?
            .into_iter()
            .next())
    }

    pub(crate) fn add_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        record: Record,
    ) -> GatewayResult<Record> {
        let (row, related) = self.split_related(record)?;
        let build = self.build_context(ctx);
        let mut created = self.access(build).insert(tx, &row)?;
        self.sync_related(tx, build, &mut created, related)?;
        Ok(created)
    }

    pub(crate) fn update_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        record: Record,
        if_unmodified_since: Option<&Value>,
    ) -> GatewayResult<Record> {
        let id = record
            .non_null(self.table.primary_key())
            .cloned()
            .ok_or_else(|| {
                GatewayError::Contract(format!(
                    "update on `{}` requires a non-null `{}`",
                    self.table.name(),
                    self.table.primary_key()
                ))
            })?;
        let (row, related) = self.split_related(record)?;
        let build = self.build_context(ctx);
        let access = self.access(build);

        if let Some(mut updated) = access.update(tx, &id, &row, if_unmodified_since)? {
            self.sync_related(tx, build, &mut updated, related)?;
            return Ok(updated);
        }

        // Without a version check an empty result can only mean absence.
        if if_unmodified_since.is_some() && access.exists(tx, &self.id_filter(&id))? {
            debug!(
                "event=gateway_update module=gateway table={} status=conflict",
                self.table.name()
            );
            return Err(GatewayError::Conflict(STALE_WRITE_REASON.to_string()));
        }
        Err(GatewayError::does_not_exist(self.table.name(), Some(&id)))
    }

    pub(crate) fn update_transactional_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        id: &Value,
        mutator: &mut Mutator<'_>,
    ) -> GatewayResult<Record> {
        let build = self.build_context(ctx);
        let mut current = self
            .access(build)
            .lock(tx, id)?
            .ok_or_else(|| GatewayError::does_not_exist(self.table.name(), Some(id)))?;
        for relation in &self.relations {
            relation.attach(
                tx,
                self.multitenant,
                build,
                self.table.primary_key(),
                std::slice::from_mut(&mut current),
            )?;
        }

        let mut patch = mutator(&current)?;
        patch.insert(self.table.primary_key(), id.clone());
        self.update_in(tx, ctx, patch, None)
    }

    pub(crate) fn upsert_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        record: Record,
    ) -> GatewayResult<Record> {
        if record.non_null(self.table.primary_key()).is_none() {
            return self.add_in(tx, ctx, record);
        }
        let (row, related) = self.split_related(record)?;
        let build = self.build_context(ctx);
        let mut stored = self.access(build).upsert(tx, &row)?;
        self.sync_related(tx, build, &mut stored, related)?;
        Ok(stored)
    }

    pub(crate) fn remove_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        id: &Value,
    ) -> GatewayResult<bool> {
        self.access(self.build_context(ctx)).delete(tx, id)
    }

    pub(crate) fn count_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        filters: &[Filter],
    ) -> GatewayResult<u64> {
        self.access(self.build_context(ctx)).count(tx, filters)
    }

    pub(crate) fn exists_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        filters: &[Filter],
    ) -> GatewayResult<bool> {
        self.access(self.build_context(ctx)).exists(tx, filters)
    }

    pub(crate) fn get_related_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        field: &str,
        parent_ids: &[Value],
    ) -> GatewayResult<HashMap<RowKey, Vec<Record>>> {
        let relation = self.relation(field)?;
        relation.fetch(tx, self.multitenant, self.build_context(ctx), parent_ids)
    }

    pub(crate) fn set_related_in(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &RequestContext,
        parent_id: &Value,
        field: &str,
        desired: Vec<Record>,
    ) -> GatewayResult<Vec<Record>> {
        let relation = self.relation(field)?;
        let build = self.build_context(ctx);
        if !self.access(build).exists(tx, &self.id_filter(parent_id))? {
            return Err(GatewayError::does_not_exist(
                self.table.name(),
                Some(parent_id),
            ));
        }
        relation.sync(tx, self.multitenant, build, parent_id, desired)
    }

    /// Detaches relation payloads from the parent row.
    fn split_related<'r>(
        &'r self,
        mut record: Record,
    ) -> GatewayResult<(Record, Vec<(&'r Relation, Vec<Record>)>)> {
        let mut related = Vec::new();
        for relation in &self.relations {
            match record.remove(relation.field()) {
                None | Some(Value::Null) => {}
                Some(Value::Related(children)) => related.push((relation, children)),
                Some(_) => {
                    return Err(GatewayError::Contract(format!(
                        "relation `{}` expects a list of records",
                        relation.field()
                    )));
                }
            }
        }
        Ok((record, related))
    }

    fn sync_related(
        &self,
        tx: &mut Transaction<'_>,
        build: BuildContext<'_>,
        parent: &mut Record,
        related: Vec<(&Relation, Vec<Record>)>,
    ) -> GatewayResult<()> {
        if related.is_empty() {
            return Ok(());
        }
        let parent_id = parent
            .non_null(self.table.primary_key())
            .cloned()
            .ok_or_else(|| {
                GatewayError::InvalidData(format!(
                    "`{}` row returned without a primary key",
                    self.table.name()
                ))
            })?;
        for (relation, desired) in related {
            let children = relation.sync(tx, self.multitenant, build, &parent_id, desired)?;
            parent.insert(relation.field(), Value::Related(children));
        }
        Ok(())
    }
}

/// Gateway for one table that opens its own transaction per operation.
///
/// Bind it to a `UnitOfWork` to run several operations, possibly across
/// gateways, in one caller-owned transaction.
pub struct SqlGateway<P: Provider> {
    provider: Arc<P>,
    core: GatewayCore,
}

impl<P: Provider> SqlGateway<P> {
    pub fn new(provider: Arc<P>, table: TableSchema) -> Self {
        Self {
            provider,
            core: GatewayCore {
                table,
                multitenant: false,
                relations: Vec::new(),
                clock: system_clock(),
            },
        }
    }

    /// Scopes every statement to the request tenant.
    pub fn multitenant(mut self) -> Self {
        self.core.multitenant = true;
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.core.relations.push(relation);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.core.clock = clock;
        self
    }

    pub fn table(&self) -> &TableSchema {
        &self.core.table
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn is_multitenant(&self) -> bool {
        self.core.multitenant
    }

    /// Runs this gateway's operations inside `unit`'s transaction.
    pub fn bind<'a, 't, 's>(&'a self, unit: &'a UnitOfWork<'t, 's>) -> BoundGateway<'a, 't, 's> {
        BoundGateway::new(&self.core, unit)
    }
}

impl<P: Provider> Gateway for SqlGateway<P> {
    fn filter(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page: Option<&PageOptions>,
    ) -> GatewayResult<Vec<Record>> {
        self.provider
            .transaction(|tx| self.core.filter_in(tx, ctx, filters, page))
    }

    fn paginate(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page: &PageOptions,
    ) -> GatewayResult<Page<Record>> {
        self.provider
            .transaction(|tx| self.core.paginate_in(tx, ctx, filters, page))
    }

    fn get(&self, ctx: &RequestContext, id: &Value) -> GatewayResult<Option<Record>> {
        self.provider.transaction(|tx| self.core.get_in(tx, ctx, id))
    }

    fn add(&self, ctx: &RequestContext, record: Record) -> GatewayResult<Record> {
        self.provider
            .transaction(|tx| self.core.add_in(tx, ctx, record))
    }

    fn update(
        &self,
        ctx: &RequestContext,
        record: Record,
        if_unmodified_since: Option<&Value>,
    ) -> GatewayResult<Record> {
        self.provider
            .transaction(|tx| self.core.update_in(tx, ctx, record, if_unmodified_since))
    }

    fn update_transactional(
        &self,
        ctx: &RequestContext,
        id: &Value,
        mutator: &mut Mutator<'_>,
    ) -> GatewayResult<Record> {
        let isolation = self.provider.isolation().for_locking_reads();
        self.provider.transaction_with(isolation, |tx| {
            self.core.update_transactional_in(tx, ctx, id, mutator)
        })
    }

    fn upsert(&self, ctx: &RequestContext, record: Record) -> GatewayResult<Record> {
        self.provider
            .transaction(|tx| self.core.upsert_in(tx, ctx, record))
    }

    fn remove(&self, ctx: &RequestContext, id: &Value) -> GatewayResult<bool> {
        self.provider.transaction(|tx| self.core.remove_in(tx, ctx, id))
    }

    fn count(&self, ctx: &RequestContext, filters: &[Filter]) -> GatewayResult<u64> {
        self.provider
            .transaction(|tx| self.core.count_in(tx, ctx, filters))
    }

    fn exists(&self, ctx: &RequestContext, filters: &[Filter]) -> GatewayResult<bool> {
        self.provider
            .transaction(|tx| self.core.exists_in(tx, ctx, filters))
    }

    fn get_related(
        &self,
        ctx: &RequestContext,
        field: &str,
        parent_ids: &[Value],
    ) -> GatewayResult<HashMap<RowKey, Vec<Record>>> {
        self.provider
            .transaction(|tx| self.core.get_related_in(tx, ctx, field, parent_ids))
    }

    fn set_related(
        &self,
        ctx: &RequestContext,
        parent_id: &Value,
        field: &str,
        desired: Vec<Record>,
    ) -> GatewayResult<Vec<Record>> {
        self.provider
            .transaction(|tx| self.core.set_related_in(tx, ctx, parent_id, field, desired))
    }
}
