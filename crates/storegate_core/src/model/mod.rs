//! Vocabulary crossing the gateway boundary.
//!
//! # Responsibility
//! - Define records, filters, pagination and table metadata.
//! - Stay free of SQL, connection and transaction types.

pub mod filter;
pub mod page;
pub mod record;
pub mod schema;
