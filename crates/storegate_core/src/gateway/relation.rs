//! One-to-many relation fan-out.
//!
//! # Invariants
//! - Fetching children for any number of parents issues one query.
//! - Synchronizing children only writes rows whose content changes.
//! - Children are returned ordered by their primary key.

use super::table::TableAccess;
use super::{GatewayError, GatewayResult};
use crate::builder::BuildContext;
use crate::model::filter::Filter;
use crate::model::record::{Record, RowKey, Value};
use crate::model::schema::TableSchema;
use crate::provider::Transaction;
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Children of `child` whose `foreign_key` references the parent id, exposed
/// on the parent under `field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    field: String,
    child: TableSchema,
    foreign_key: String,
}

impl Relation {
    pub fn one_to_many(
        field: impl Into<String>,
        child: TableSchema,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            child,
            foreign_key: foreign_key.into(),
        }
    }

    pub fn field(&self) -> &str {
        self.field.as_str()
    }

    pub fn child(&self) -> &TableSchema {
        &self.child
    }

    pub fn foreign_key(&self) -> &str {
        self.foreign_key.as_str()
    }

    fn access<'a>(&'a self, multitenant: bool, ctx: BuildContext<'a>) -> TableAccess<'a> {
        TableAccess::new(&self.child, multitenant, ctx)
    }

    /// Children of every listed parent, grouped by parent id.
    pub(crate) fn fetch(
        &self,
        tx: &mut Transaction<'_>,
        multitenant: bool,
        ctx: BuildContext<'_>,
        parent_ids: &[Value],
    ) -> GatewayResult<HashMap<RowKey, Vec<Record>>> {
        let mut grouped: HashMap<RowKey, Vec<Record>> = HashMap::new();
        let ids: Vec<Value> = parent_ids
            .iter()
            .filter(|id| id.key().is_some())
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(grouped);
        }

        let filters = [Filter::new(self.foreign_key.as_str(), ids)];
        let children = self.access(multitenant, ctx).select(tx, &filters, None)?;
        for child in children {
            if let Some(parent) = child.get(&self.foreign_key).and_then(Value::key) {
                grouped.entry(parent).or_default().push(child);
            }
        }

        let pk = self.child.primary_key();
        for children in grouped.values_mut() {
            children.sort_by_key(|child| child.get(pk).and_then(Value::key));
        }
        Ok(grouped)
    }

    /// Stores the children of each parent under this relation's field.
    pub(crate) fn attach(
        &self,
        tx: &mut Transaction<'_>,
        multitenant: bool,
        ctx: BuildContext<'_>,
        parent_key: &str,
        parents: &mut [Record],
    ) -> GatewayResult<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let ids: Vec<Value> = parents
            .iter()
            .filter_map(|parent| parent.non_null(parent_key).cloned())
            .collect();
        let mut grouped = self.fetch(tx, multitenant, ctx, &ids)?;

        for parent in parents.iter_mut() {
            let children = parent
                .get(parent_key)
                .and_then(Value::key)
                .and_then(|key| grouped.remove(&key))
                .unwrap_or_default();
            parent.insert(self.field.as_str(), Value::Related(children));
        }
        Ok(())
    }

    /// Makes `desired` the exact child set of `parent_id`.
    ///
    /// Children missing from `desired` are removed first, then known children
    /// are updated when their content differs, and the rest are upserted
    /// (with an id) or added (without one).
    pub(crate) fn sync(
        &self,
        tx: &mut Transaction<'_>,
        multitenant: bool,
        ctx: BuildContext<'_>,
        parent_id: &Value,
        desired: Vec<Record>,
    ) -> GatewayResult<Vec<Record>> {
        let access = self.access(multitenant, ctx);
        let pk = self.child.primary_key();

        let mut current: BTreeMap<RowKey, Record> = self
            .fetch(tx, multitenant, ctx, std::slice::from_ref(parent_id))?
            .into_values()
            .flatten()
            .filter_map(|child| child.get(pk).and_then(Value::key).map(|key| (key, child)))
            .collect();

        let kept: HashSet<RowKey> = desired
            .iter()
            .filter_map(|child| child.get(pk).and_then(Value::key))
            .collect();
        let stale: Vec<RowKey> = current
            .keys()
            .filter(|key| !kept.contains(key))
            .cloned()
            .collect();
        for key in &stale {
            current.remove(key);
            access.delete(tx, &Value::from(key.clone()))?;
        }

        let mut unchanged = 0usize;
        let mut synced = Vec::with_capacity(desired.len());
        for mut child in desired {
            child.insert(self.foreign_key.as_str(), parent_id.clone());
            let key = child.get(pk).and_then(Value::key);

            let stored = match key.and_then(|key| current.remove(&key)) {
                Some(existing) if !self.differs(&existing, &child) => {
                    unchanged += 1;
                    existing
                }
                Some(existing) => {
                    let id = existing.get(pk).cloned().unwrap_or_default();
                    access.update(tx, &id, &child, None)?.ok_or_else(|| {
                        GatewayError::does_not_exist(self.child.name(), Some(&id))
                    })?
                }
                None if child.non_null(pk).is_some() => access.upsert(tx, &child)?,
                None => access.insert(tx, &child)?,
            };
            synced.push(stored);
        }

        debug!(
            "event=relation_sync module=gateway table={} removed={} unchanged={} written={}",
            self.child.name(),
            stale.len(),
            unchanged,
            synced.len() - unchanged
        );
        Ok(synced)
    }

    /// Whether any writable column of `desired` disagrees with `existing`.
    fn differs(&self, existing: &Record, desired: &Record) -> bool {
        self.child
            .writable_columns()
            .filter_map(|column| desired.get(&column.name).map(|value| (column, value)))
            .any(|(column, value)| existing.get(&column.name) != Some(value))
    }
}
