//! Storage gateway contracts.
//!
//! # Responsibility
//! - Define the CRUD and query contract consumed by business layers.
//! - Map provider and builder failures onto gateway error kinds.
//!
//! # Invariants
//! - Every operation runs inside exactly one transaction scope.
//! - Records returned to callers are owned values.
//! - Missing rows are `None`/`false` for reads and `DoesNotExist` for writes.

mod relation;
mod sql_gateway;
mod table;
mod unit_of_work;

pub use relation::Relation;
pub use sql_gateway::SqlGateway;
pub use unit_of_work::{BoundGateway, UnitOfWork};

use crate::builder::BuildError;
use crate::context::RequestContext;
use crate::model::filter::{Filter, FilterError};
use crate::model::page::{Page, PageError, PageOptions};
use crate::model::record::{Record, RowKey, Value};
use crate::provider::ProviderError;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Reason carried by `Conflict` when a conditional update lost the race.
pub const STALE_WRITE_REASON: &str = "record was modified since it was read";

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Caller-side mutation applied to the locked record by
/// `update_transactional`; returns the patch to write.
pub type Mutator<'m> = dyn FnMut(&Record) -> GatewayResult<Record> + 'm;

#[derive(Debug)]
pub enum GatewayError {
    DoesNotExist {
        entity: String,
        id: Option<Value>,
    },
    AlreadyExists {
        key: Option<String>,
        value: Option<Value>,
    },
    /// Optimistic mismatch or serialization failure; retry is the caller's call.
    Conflict(String),
    /// Programming error at the call site.
    Contract(String),
    InvalidData(String),
    Storage(ProviderError),
}

impl GatewayError {
    /// Whether the caller can act on the error instead of treating it as a bug
    /// or an outage.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DoesNotExist { .. } | Self::AlreadyExists { .. } | Self::Conflict(_)
        )
    }

    pub fn does_not_exist(entity: &str, id: Option<&Value>) -> Self {
        Self::DoesNotExist {
            entity: entity.to_string(),
            id: id.cloned(),
        }
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DoesNotExist { entity, id } => match id {
                Some(id) => write!(f, "{entity} does not exist: {id}"),
                None => write!(f, "{entity} does not exist"),
            },
            Self::AlreadyExists { key, value } => match (key, value) {
                (Some(key), Some(value)) => write!(f, "already exists: {key}={value}"),
                (Some(key), None) => write!(f, "already exists: {key}"),
                _ => write!(f, "already exists"),
            },
            Self::Conflict(reason) => write!(f, "conflict: {reason}"),
            Self::Contract(message) => write!(f, "contract violation: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AlreadyExists { key, value } => Self::AlreadyExists { key, value },
            ProviderError::Conflict(reason) => Self::Conflict(reason),
            ProviderError::InvalidData(message) => Self::InvalidData(message),
            inactive @ ProviderError::InactiveTransaction { .. } => {
                Self::Contract(inactive.to_string())
            }
            other => Self::Storage(other),
        }
    }
}

impl From<BuildError> for GatewayError {
    fn from(value: BuildError) -> Self {
        Self::Contract(value.to_string())
    }
}

impl From<FilterError> for GatewayError {
    fn from(value: FilterError) -> Self {
        Self::Contract(value.to_string())
    }
}

impl From<PageError> for GatewayError {
    fn from(value: PageError) -> Self {
        Self::Contract(value.to_string())
    }
}

/// CRUD and query contract over one table.
///
/// Implementations hold no per-call state and may be shared across threads.
pub trait Gateway {
    /// Rows matching every filter; without `page` the order is unspecified.
    fn filter(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page: Option<&PageOptions>,
    ) -> GatewayResult<Vec<Record>>;

    /// One page of matching rows plus the filtered total.
    fn paginate(
        &self,
        ctx: &RequestContext,
        filters: &[Filter],
        page: &PageOptions,
    ) -> GatewayResult<Page<Record>>;

    fn get(&self, ctx: &RequestContext, id: &Value) -> GatewayResult<Option<Record>>;

    /// Inserts `record`, then synchronizes embedded relation payloads.
    fn add(&self, ctx: &RequestContext, record: Record) -> GatewayResult<Record>;

    /// Patches the row identified by `record.id`.
    ///
    /// With `if_unmodified_since`, a row whose `updated_at` moved on yields
    /// `Conflict`; a missing row always yields `DoesNotExist`.
    fn update(
        &self,
        ctx: &RequestContext,
        record: Record,
        if_unmodified_since: Option<&Value>,
    ) -> GatewayResult<Record>;

    /// Locks the row, hands it to `mutator` and writes the returned patch in
    /// the same transaction.
    fn update_transactional(
        &self,
        ctx: &RequestContext,
        id: &Value,
        mutator: &mut Mutator<'_>,
    ) -> GatewayResult<Record>;

    /// Atomic insert-or-replace; records without an id are added.
    fn upsert(&self, ctx: &RequestContext, record: Record) -> GatewayResult<Record>;

    /// Deletes one row; `false` when nothing was deleted.
    fn remove(&self, ctx: &RequestContext, id: &Value) -> GatewayResult<bool>;

    fn count(&self, ctx: &RequestContext, filters: &[Filter]) -> GatewayResult<u64>;

    fn exists(&self, ctx: &RequestContext, filters: &[Filter]) -> GatewayResult<bool>;

    /// Children of every parent in `parent_ids` for relation `field`, fetched
    /// with a single query and grouped by parent id.
    fn get_related(
        &self,
        ctx: &RequestContext,
        field: &str,
        parent_ids: &[Value],
    ) -> GatewayResult<HashMap<RowKey, Vec<Record>>>;

    /// Replaces the children of one parent with `desired`.
    fn set_related(
        &self,
        ctx: &RequestContext,
        parent_id: &Value,
        field: &str,
        desired: Vec<Record>,
    ) -> GatewayResult<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::GatewayError;
    use crate::builder::BuildError;
    use crate::provider::ProviderError;

    #[test]
    fn provider_kinds_map_onto_gateway_kinds() {
        let conflict = GatewayError::from(ProviderError::conflict());
        assert!(matches!(conflict, GatewayError::Conflict(_)));
        assert!(conflict.is_recoverable());

        let duplicate = GatewayError::from(ProviderError::AlreadyExists {
            key: Some("isbn".to_string()),
            value: None,
        });
        assert!(matches!(
            duplicate,
            GatewayError::AlreadyExists { key: Some(ref key), .. } if key == "isbn"
        ));

        let inactive = GatewayError::from(ProviderError::InactiveTransaction {
            scope: "top".to_string(),
        });
        assert!(matches!(inactive, GatewayError::Contract(_)));
    }

    #[test]
    fn missing_tenant_is_a_contract_violation() {
        let error = GatewayError::from(BuildError::MissingTenant {
            table: "books".to_string(),
        });
        assert!(matches!(error, GatewayError::Contract(_)));
        assert!(!error.is_recoverable());
        assert!(error.to_string().contains("outside a tenant context"));
    }
}
