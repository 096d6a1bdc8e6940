//! Single-statement round trips against one table.

use super::{GatewayError, GatewayResult};
use crate::builder::{BuildContext, Statement, StatementBuilder};
use crate::model::filter::Filter;
use crate::model::page::PageOptions;
use crate::model::record::{Record, Value};
use crate::model::schema::TableSchema;
use crate::provider::Transaction;

/// Builder plus per-call context for one table, bound to no transaction.
#[derive(Clone, Copy)]
pub(crate) struct TableAccess<'a> {
    builder: StatementBuilder<'a>,
    ctx: BuildContext<'a>,
}

impl<'a> TableAccess<'a> {
    pub(crate) fn new(schema: &'a TableSchema, multitenant: bool, ctx: BuildContext<'a>) -> Self {
        Self {
            builder: StatementBuilder::new(schema, multitenant),
            ctx,
        }
    }

    pub(crate) fn schema(&self) -> &'a TableSchema {
        self.builder.table()
    }

    pub(crate) fn select(
        &self,
        tx: &mut Transaction<'_>,
        filters: &[Filter],
        page: Option<&PageOptions>,
    ) -> GatewayResult<Vec<Record>> {
        let statement = self.builder.select(self.ctx, filters, page)?;
        self.rows(tx, &statement)
    }

    /// Locks one row for the rest of the transaction and returns it.
    pub(crate) fn lock(&self, tx: &mut Transaction<'_>, id: &Value) -> GatewayResult<Option<Record>> {
        let statement = self.builder.select_for_update(self.ctx, id)?;
        Ok(self.rows(tx, &statement)?.into_iter().next())
    }

    pub(crate) fn count(&self, tx: &mut Transaction<'_>, filters: &[Filter]) -> GatewayResult<u64> {
        let statement = self.builder.count(self.ctx, filters)?;
        let total = scalar(tx.execute(&statement)?, "total")?;
        u64::try_from(total)
            .map_err(|_| GatewayError::InvalidData(format!("negative row count {total}")))
    }

    pub(crate) fn exists(&self, tx: &mut Transaction<'_>, filters: &[Filter]) -> GatewayResult<bool> {
        let statement = self.builder.exists(self.ctx, filters)?;
        Ok(scalar(tx.execute(&statement)?, "present")? != 0)
    }

    pub(crate) fn insert(&self, tx: &mut Transaction<'_>, record: &Record) -> GatewayResult<Record> {
        let statement = self.builder.insert(self.ctx, record)?;
        self.written_row(tx, &statement, record)
    }

    pub(crate) fn upsert(&self, tx: &mut Transaction<'_>, record: &Record) -> GatewayResult<Record> {
        let statement = self.builder.upsert(self.ctx, record)?;
        self.written_row(tx, &statement, record)
    }

    /// `None` when no row matched the key (and version, when given).
    pub(crate) fn update(
        &self,
        tx: &mut Transaction<'_>,
        id: &Value,
        record: &Record,
        if_unmodified_since: Option<&Value>,
    ) -> GatewayResult<Option<Record>> {
        let statement = self
            .builder
            .update(self.ctx, id, record, if_unmodified_since)?;
        Ok(self.rows(tx, &statement)?.into_iter().next())
    }

    pub(crate) fn delete(&self, tx: &mut Transaction<'_>, id: &Value) -> GatewayResult<bool> {
        let statement = self.builder.delete(self.ctx, id)?;
        Ok(!tx.execute(&statement)?.is_empty())
    }

    fn rows(&self, tx: &mut Transaction<'_>, statement: &Statement) -> GatewayResult<Vec<Record>> {
        tx.execute(statement)?
            .into_iter()
            .map(|raw| self.schema().decode_row(raw).map_err(GatewayError::InvalidData))
            .collect()
    }

    fn written_row(
        &self,
        tx: &mut Transaction<'_>,
        statement: &Statement,
        attempted: &Record,
    ) -> GatewayResult<Record> {
        let rows = match self.rows(tx, statement) {
            Ok(rows) => rows,
            Err(GatewayError::AlreadyExists { key, value }) => {
                return Err(enrich_duplicate(attempted, key, value));
            }
            Err(err) => return Err(err),
        };
        rows.into_iter().next().ok_or_else(|| {
            GatewayError::InvalidData(format!(
                "{} on `{}` returned no row",
                statement.kind,
                self.schema().name()
            ))
        })
    }
}

/// Fills the violated value from the attempted record when the key names a
/// single column.
fn enrich_duplicate(attempted: &Record, key: Option<String>, value: Option<Value>) -> GatewayError {
    let value = value.or_else(|| {
        key.as_deref()
            .filter(|key| !key.contains(','))
            .and_then(|column| attempted.non_null(column).cloned())
    });
    GatewayError::AlreadyExists { key, value }
}

fn scalar(rows: Vec<Record>, column: &str) -> GatewayResult<i64> {
    rows.first()
        .and_then(|row| row.get(column))
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::InvalidData(format!("missing scalar column `{column}`")))
}
