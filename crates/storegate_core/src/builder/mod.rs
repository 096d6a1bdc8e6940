//! Statement builder for the SQLite dialect.
//!
//! # Responsibility
//! - Translate filters, pagination and record payloads into one
//!   parameterized statement per logical operation.
//! - Project payloads onto known columns and stamp tenant and timestamps.
//!
//! # Invariants
//! - No I/O; output depends only on schema, inputs and `BuildContext`.
//! - Unknown filter fields and empty value sets render a false predicate.
//! - Unknown payload keys are dropped.
//! - Multitenant statements always carry a tenant clause or tenant value.

mod statement;

pub use statement::{Statement, StatementKind};

use crate::model::filter::Filter;
use crate::model::page::PageOptions;
use crate::model::record::{Record, Value};
use crate::model::schema::{ColumnKind, TableSchema};
use log::warn;
pub(crate) use statement::quote_ident;
use statement::SqlWriter;
use std::error::Error;
use std::fmt::{Display, Formatter};

const FALSE_PREDICATE: &str = "0 = 1";

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Multitenant statement requested without a tenant in context.
    MissingTenant { table: String },
    /// Multitenant builder over a schema without a tenant column.
    TenantColumnMissing { table: String },
    /// Conditional update requested on a schema without `updated_at`.
    VersionColumnMissing { table: String },
    /// Value of this column cannot be bound as a statement parameter.
    UnbindableValue { column: String },
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTenant { table } => {
                write!(f, "multitenant table `{table}` used outside a tenant context")
            }
            Self::TenantColumnMissing { table } => {
                write!(f, "multitenant table `{table}` declares no tenant column")
            }
            Self::VersionColumnMissing { table } => write!(
                f,
                "table `{table}` declares no updated_at column for conditional updates"
            ),
            Self::UnbindableValue { column } => {
                write!(f, "value for column `{column}` cannot be bound as a parameter")
            }
        }
    }
}

impl Error for BuildError {}

/// Per-call inputs that are not part of the static schema.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub tenant: Option<&'a str>,
    pub now_ms: i64,
}

/// Renders statements for one table.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder<'s> {
    table: &'s TableSchema,
    multitenant: bool,
}

impl<'s> StatementBuilder<'s> {
    pub fn new(table: &'s TableSchema, multitenant: bool) -> Self {
        Self { table, multitenant }
    }

    pub fn table(&self) -> &'s TableSchema {
        self.table
    }

    /// `SELECT` matching all filters, optionally ordered and paginated.
    ///
    /// Without page options the row order is unspecified.
    pub fn select(
        &self,
        ctx: BuildContext<'_>,
        filters: &[Filter],
        page: Option<&PageOptions>,
    ) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        writer.push(&format!(
            "SELECT {} FROM {}",
            self.column_list(),
            self.table_ident()
        ));

        let mut clauses = self.filter_clauses(&mut writer, ctx, filters)?;
        let Some(page) = page else {
            push_where(&mut writer, &clauses);
            return Ok(writer.finish(StatementKind::Select));
        };

        let order_column = self.order_column(page);
        let order_ident = quote_ident(order_column);
        if let Some(cursor) = page.cursor() {
            let placeholder = writer.bind(self.bindable(order_column, cursor.clone())?);
            let operator = if page.ascending() { ">" } else { "<" };
            clauses.push(format!("{order_ident} {operator} {placeholder}"));
        }
        push_where(&mut writer, &clauses);

        let direction = if page.ascending() { "ASC" } else { "DESC" };
        let limit = writer.bind(Value::Integer(i64::from(page.limit())));
        writer.push(&format!(" ORDER BY {order_ident} {direction} LIMIT {limit}"));
        if page.cursor().is_none() {
            let offset = writer.bind(Value::Integer(i64::from(page.offset())));
            writer.push(&format!(" OFFSET {offset}"));
        }

        Ok(writer.finish(StatementKind::Select))
    }

    /// Row-locking read of one row.
    ///
    /// SQLite has no `FOR UPDATE`; a no-op write on the row takes the
    /// database write lock before the current values are returned, which
    /// blocks every other writer until the owning transaction ends.
    pub fn select_for_update(&self, ctx: BuildContext<'_>, id: &Value) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        let pk = quote_ident(self.table.primary_key());
        writer.push(&format!(
            "UPDATE {} SET {pk} = {pk}",
            self.table_ident()
        ));
        let clauses = self.key_clauses(&mut writer, ctx, id)?;
        push_where(&mut writer, &clauses);
        self.push_returning(&mut writer);
        Ok(writer.finish(StatementKind::SelectForUpdate))
    }

    pub fn count(&self, ctx: BuildContext<'_>, filters: &[Filter]) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        writer.push(&format!(
            "SELECT COUNT(*) AS \"total\" FROM {}",
            self.table_ident()
        ));
        let clauses = self.filter_clauses(&mut writer, ctx, filters)?;
        push_where(&mut writer, &clauses);
        Ok(writer.finish(StatementKind::Count))
    }

    pub fn exists(&self, ctx: BuildContext<'_>, filters: &[Filter]) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        writer.push(&format!("SELECT EXISTS(SELECT 1 FROM {}", self.table_ident()));
        let clauses = self.filter_clauses(&mut writer, ctx, filters)?;
        push_where(&mut writer, &clauses);
        writer.push(" LIMIT 1) AS \"present\"");
        Ok(writer.finish(StatementKind::Exists))
    }

    /// `INSERT` of the known columns of `record`.
    ///
    /// A non-null `id` is written as given; otherwise the store default
    /// applies. The context tenant overrides any payload tenant.
    pub fn insert(&self, ctx: BuildContext<'_>, record: &Record) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        self.push_insert(&mut writer, ctx, record)?;
        self.push_returning(&mut writer);
        Ok(writer.finish(StatementKind::Insert))
    }

    /// Partial `UPDATE` of one row.
    ///
    /// With `if_unmodified_since`, only a row whose `updated_at` still equals
    /// it is touched. An empty result does not distinguish a missing row
    /// from a concurrent modification.
    pub fn update(
        &self,
        ctx: BuildContext<'_>,
        id: &Value,
        record: &Record,
        if_unmodified_since: Option<&Value>,
    ) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        let mut assignments = Vec::new();
        for column in self.table.writable_columns() {
            if let Some(value) = record.get(&column.name) {
                let placeholder = writer.bind(self.bindable(&column.name, value.clone())?);
                assignments.push(format!("{} = {placeholder}", quote_ident(&column.name)));
            }
        }
        if let Some(updated_at) = self.table.updated_at_column() {
            let ident = quote_ident(updated_at);
            let now = writer.bind(Value::Integer(ctx.now_ms));
            assignments.push(format!("{ident} = MAX({now}, {ident} + 1)"));
        }
        if assignments.is_empty() {
            let pk = quote_ident(self.table.primary_key());
            assignments.push(format!("{pk} = {pk}"));
        }

        writer.push(&format!(
            "UPDATE {} SET {}",
            self.table_ident(),
            assignments.join(", ")
        ));

        let mut clauses = self.key_clauses(&mut writer, ctx, id)?;
        if let Some(expected) = if_unmodified_since {
            let updated_at = self.table.updated_at_column().ok_or_else(|| {
                BuildError::VersionColumnMissing {
                    table: self.table.name().to_string(),
                }
            })?;
            let placeholder = writer.bind(self.bindable(updated_at, expected.clone())?);
            clauses.push(format!("{} = {placeholder}", quote_ident(updated_at)));
        }
        push_where(&mut writer, &clauses);
        self.push_returning(&mut writer);
        Ok(writer.finish(StatementKind::Update))
    }

    /// Atomic insert-or-replace keyed by `id` (and tenant when multitenant).
    ///
    /// Degenerates into `insert` when the record carries no id. On conflict
    /// every writable column takes the incoming value or its column default,
    /// so the row converges to the latest payload.
    pub fn upsert(&self, ctx: BuildContext<'_>, record: &Record) -> BuildResult<Statement> {
        if record.non_null(self.table.primary_key()).is_none() {
            return self.insert(ctx, record);
        }

        let mut writer = SqlWriter::new();
        self.push_insert(&mut writer, ctx, record)?;

        let mut target = vec![quote_ident(self.table.primary_key())];
        if self.multitenant {
            target.push(quote_ident(self.tenant_column()?));
        }

        let mut assignments: Vec<String> = self
            .table
            .writable_columns()
            .map(|column| {
                let ident = quote_ident(&column.name);
                format!("{ident} = excluded.{ident}")
            })
            .collect();
        if let Some(updated_at) = self.table.updated_at_column() {
            let ident = quote_ident(updated_at);
            assignments.push(format!(
                "{ident} = MAX(excluded.{ident}, {}.{ident} + 1)",
                self.table_ident()
            ));
        }
        if assignments.is_empty() {
            let pk = quote_ident(self.table.primary_key());
            assignments.push(format!("{pk} = excluded.{pk}"));
        }

        writer.push(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            target.join(", "),
            assignments.join(", ")
        ));
        self.push_returning(&mut writer);
        Ok(writer.finish(StatementKind::Upsert))
    }

    /// `DELETE` of one row, returning its id when it existed.
    pub fn delete(&self, ctx: BuildContext<'_>, id: &Value) -> BuildResult<Statement> {
        let mut writer = SqlWriter::new();
        writer.push(&format!("DELETE FROM {}", self.table_ident()));
        let clauses = self.key_clauses(&mut writer, ctx, id)?;
        push_where(&mut writer, &clauses);
        writer.push(&format!(
            " RETURNING {}",
            quote_ident(self.table.primary_key())
        ));
        Ok(writer.finish(StatementKind::Delete))
    }

    fn push_insert(
        &self,
        writer: &mut SqlWriter,
        ctx: BuildContext<'_>,
        record: &Record,
    ) -> BuildResult<()> {
        let tenant = if self.multitenant {
            Some(self.require_tenant(ctx)?)
        } else {
            None
        };

        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for column in self.table.columns() {
            let name = column.name.as_str();
            let value = if name == self.table.primary_key() {
                record.non_null(name).cloned()
            } else if self.table.tenant_column() == Some(name) {
                match tenant {
                    Some(tenant) => Some(Value::from(tenant)),
                    None => record.get(name).cloned(),
                }
            } else if self.table.created_at_column() == Some(name)
                || self.table.updated_at_column() == Some(name)
            {
                Some(Value::Integer(ctx.now_ms))
            } else {
                record.get(name).cloned()
            };

            if let Some(value) = value {
                placeholders.push(writer.bind(self.bindable(name, value)?));
                columns.push(quote_ident(name));
            }
        }

        if columns.is_empty() {
            writer.push(&format!("INSERT INTO {} DEFAULT VALUES", self.table_ident()));
        } else {
            writer.push(&format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table_ident(),
                columns.join(", "),
                placeholders.join(", ")
            ));
        }
        Ok(())
    }

    fn filter_clauses(
        &self,
        writer: &mut SqlWriter,
        ctx: BuildContext<'_>,
        filters: &[Filter],
    ) -> BuildResult<Vec<String>> {
        let mut clauses = Vec::with_capacity(filters.len() + 1);
        for filter in filters {
            clauses.push(self.filter_clause(writer, filter)?);
        }
        if let Some(tenant_clause) = self.tenant_clause(writer, ctx)? {
            clauses.push(tenant_clause);
        }
        Ok(clauses)
    }

    fn filter_clause(&self, writer: &mut SqlWriter, filter: &Filter) -> BuildResult<String> {
        if !self.table.has_column(filter.field()) {
            return Ok(FALSE_PREDICATE.to_string());
        }
        let ident = quote_ident(filter.field());

        match filter {
            Filter::In { field, values } => {
                let mut matches_null = false;
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    if value.is_null() {
                        matches_null = true;
                    } else {
                        placeholders.push(writer.bind(self.bindable(field, value.clone())?));
                    }
                }

                let membership = (!placeholders.is_empty())
                    .then(|| format!("{ident} IN ({})", placeholders.join(", ")));
                let null_check = matches_null.then(|| format!("{ident} IS NULL"));
                Ok(match (membership, null_check) {
                    (Some(membership), Some(null_check)) => {
                        format!("({membership} OR {null_check})")
                    }
                    (Some(clause), None) | (None, Some(clause)) => clause,
                    (None, None) => FALSE_PREDICATE.to_string(),
                })
            }
            Filter::Compare {
                field,
                operator,
                value,
            } => {
                let placeholder = writer.bind(self.bindable(field, value.clone())?);
                Ok(format!("{ident} {} {placeholder}", operator.sql_operator()))
            }
        }
    }

    fn key_clauses(
        &self,
        writer: &mut SqlWriter,
        ctx: BuildContext<'_>,
        id: &Value,
    ) -> BuildResult<Vec<String>> {
        let pk = self.table.primary_key();
        let placeholder = writer.bind(self.bindable(pk, id.clone())?);
        let mut clauses = vec![format!("{} = {placeholder}", quote_ident(pk))];
        if let Some(tenant_clause) = self.tenant_clause(writer, ctx)? {
            clauses.push(tenant_clause);
        }
        Ok(clauses)
    }

    fn tenant_clause(
        &self,
        writer: &mut SqlWriter,
        ctx: BuildContext<'_>,
    ) -> BuildResult<Option<String>> {
        if !self.multitenant {
            return Ok(None);
        }
        let column = self.tenant_column()?;
        let tenant = self.require_tenant(ctx)?;
        let placeholder = writer.bind(Value::from(tenant));
        Ok(Some(format!("{} = {placeholder}", quote_ident(column))))
    }

    fn tenant_column(&self) -> BuildResult<&'s str> {
        self.table
            .tenant_column()
            .ok_or_else(|| BuildError::TenantColumnMissing {
                table: self.table.name().to_string(),
            })
    }

    fn require_tenant<'c>(&self, ctx: BuildContext<'c>) -> BuildResult<&'c str> {
        ctx.tenant.ok_or_else(|| BuildError::MissingTenant {
            table: self.table.name().to_string(),
        })
    }

    fn order_column<'p>(&self, page: &'p PageOptions) -> &'p str
    where
        's: 'p,
    {
        let requested = page.order_column();
        if self.table.has_column(requested) {
            return requested;
        }
        warn!(
            "event=order_by_fallback module=builder table={} requested={} fallback={}",
            self.table.name(),
            requested,
            self.table.primary_key()
        );
        self.table.primary_key()
    }

    /// Coerces `value` to the shape stored in `column`.
    ///
    /// JSON columns take any non-null value as a document, so strings and
    /// arrays are stored as JSON text rather than raw SQL values.
    fn bindable(&self, column: &str, value: Value) -> BuildResult<Value> {
        let is_json = self
            .table
            .column(column)
            .is_some_and(|column| column.kind == ColumnKind::Json);
        match value {
            Value::Null | Value::Json(_) => Ok(value),
            other if is_json => serde_json::to_value(&other)
                .map(Value::Json)
                .map_err(|_| BuildError::UnbindableValue {
                    column: column.to_string(),
                }),
            Value::Related(_) => Err(BuildError::UnbindableValue {
                column: column.to_string(),
            }),
            other => Ok(other),
        }
    }

    fn push_returning(&self, writer: &mut SqlWriter) {
        writer.push(&format!(" RETURNING {}", self.column_list()));
    }

    fn column_list(&self) -> String {
        self.table
            .columns()
            .iter()
            .map(|column| quote_ident(&column.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn table_ident(&self) -> String {
        quote_ident(self.table.name())
    }
}

fn push_where(writer: &mut SqlWriter, clauses: &[String]) {
    if !clauses.is_empty() {
        writer.push(" WHERE ");
        writer.push(&clauses.join(" AND "));
    }
}
