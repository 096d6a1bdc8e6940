//! Relational storage gateway.
//! Filters, pagination, statement building, transactional providers and the
//! CRUD gateway contract over SQLite.

pub mod builder;
pub mod config;
pub mod context;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod provider;

pub use builder::{BuildContext, BuildError, Statement, StatementBuilder, StatementKind};
pub use config::{ConfigError, LoggingConfig, ProviderConfig, StoregateConfig};
pub use context::{Clock, FixedClock, RequestContext, SystemClock};
pub use db::{open_provider, open_provider_in_memory, SqliteProvider, SqliteSession};
pub use gateway::{
    BoundGateway, Gateway, GatewayError, GatewayResult, Relation, SqlGateway, UnitOfWork,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::filter::{Comparison, Filter, FilterError};
pub use model::page::{Page, PageError, PageOptions};
pub use model::record::{Record, RowKey, Value};
pub use model::schema::{Column, ColumnKind, TableSchema};
pub use provider::{
    IsolationLevel, Provider, ProviderError, ProviderResult, Recorded, RecordingProvider,
    Transaction,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
