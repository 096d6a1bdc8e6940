//! Driver error classification.
//!
//! # Invariants
//! - The error kind is decided from SQLite result codes only.
//! - The violated key parsed from the message is an optional annotation.

use crate::provider::ProviderError;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::ffi;
use rusqlite::ErrorCode;

static CONSTRAINT_DETAIL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:UNIQUE|PRIMARY KEY) constraint failed: (.+)$").ok());

enum DriverFailure {
    UniqueViolation(Option<String>),
    Serialization,
    Other,
}

/// Maps a raw driver error onto the provider error kinds.
///
/// Unique and primary-key violations become `AlreadyExists`, busy/locked
/// failures become `Conflict`; everything else propagates unchanged.
pub fn map_driver_error(err: rusqlite::Error) -> ProviderError {
    match classify(&err) {
        DriverFailure::UniqueViolation(key) => ProviderError::AlreadyExists { key, value: None },
        DriverFailure::Serialization => ProviderError::conflict(),
        DriverFailure::Other => ProviderError::Sqlite(err),
    }
}

fn classify(err: &rusqlite::Error) -> DriverFailure {
    let rusqlite::Error::SqliteFailure(failure, message) = err else {
        return DriverFailure::Other;
    };

    match failure.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            DriverFailure::UniqueViolation(message.as_deref().and_then(parse_violated_key))
        }
        _ => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => DriverFailure::Serialization,
            _ => DriverFailure::Other,
        },
    }
}

/// Extracts the violated column list from a SQLite constraint message.
///
/// `UNIQUE constraint failed: books.isbn, books.tenant` yields
/// `isbn, tenant`.
pub fn parse_violated_key(message: &str) -> Option<String> {
    let pattern = CONSTRAINT_DETAIL.as_ref()?;
    let detail = pattern.captures(message.trim())?.get(1)?.as_str();
    let columns: Vec<&str> = detail
        .split(',')
        .map(|qualified| {
            let qualified = qualified.trim();
            qualified
                .rsplit_once('.')
                .map_or(qualified, |(_, column)| column)
        })
        .filter(|column| !column.is_empty())
        .collect();
    (!columns.is_empty()).then(|| columns.join(", "))
}

#[cfg(test)]
mod tests {
    use super::{map_driver_error, parse_violated_key};
    use crate::provider::ProviderError;
    use rusqlite::ffi;

    fn failure(extended_code: i32, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(extended_code),
            Some(message.to_string()),
        )
    }

    #[test]
    fn parses_single_and_composite_keys() {
        assert_eq!(
            parse_violated_key("UNIQUE constraint failed: books.isbn").as_deref(),
            Some("isbn")
        );
        assert_eq!(
            parse_violated_key("UNIQUE constraint failed: books.id, books.tenant").as_deref(),
            Some("id, tenant")
        );
        assert_eq!(parse_violated_key("disk I/O error"), None);
    }

    #[test]
    fn unique_violation_maps_to_already_exists() {
        let mapped = map_driver_error(failure(
            ffi::SQLITE_CONSTRAINT_UNIQUE,
            "UNIQUE constraint failed: writers.name",
        ));
        assert!(matches!(
            mapped,
            ProviderError::AlreadyExists { key: Some(ref key), value: None } if key == "name"
        ));
    }

    #[test]
    fn busy_and_locked_map_to_conflict() {
        assert!(matches!(
            map_driver_error(failure(ffi::SQLITE_BUSY_SNAPSHOT, "database is locked")),
            ProviderError::Conflict(_)
        ));
        assert!(matches!(
            map_driver_error(failure(ffi::SQLITE_LOCKED, "database table is locked")),
            ProviderError::Conflict(_)
        ));
    }

    #[test]
    fn other_constraint_failures_propagate_unchanged() {
        let mapped = map_driver_error(failure(
            ffi::SQLITE_CONSTRAINT_NOTNULL,
            "NOT NULL constraint failed: books.title",
        ));
        assert!(matches!(mapped, ProviderError::Sqlite(_)));
    }
}
