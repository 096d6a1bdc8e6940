//! Generic record model exchanged with providers and gateways.
//!
//! # Responsibility
//! - Define the structurally typed row shape (`Record`) and its cell values.
//! - Provide lossless conversions used at the gateway boundary.
//!
//! # Invariants
//! - Records are plain owned values; nothing handed to a caller aliases
//!   provider-internal buffers.
//! - Timestamps are epoch milliseconds stored as `Value::Integer`.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt::{Display, Formatter};

/// One cell value.
///
/// Deserialization is untagged: JSON `null`, booleans, integers, floats and
/// strings map to the scalar variants, arrays of objects become `Related`, and
/// any other JSON document becomes `Json`. Values written to a JSON column
/// are re-encoded as documents whatever their variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    /// Children attached by one-to-many relation fan-out.
    Related(Vec<Record>),
    /// Nested document stored in a JSON column.
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_related(&self) -> Option<&[Record]> {
        match self {
            Self::Related(children) => Some(children.as_slice()),
            _ => None,
        }
    }

    /// Returns a hashable identity key for primary/foreign key values.
    ///
    /// Only integer and text values can identify rows.
    pub fn key(&self) -> Option<RowKey> {
        match self {
            Self::Integer(value) => Some(RowKey::Integer(*value)),
            Self::Text(value) => Some(RowKey::Text(value.clone())),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Related(children) => write!(f, "[{} related]", children.len()),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<Record>> for Value {
    fn from(value: Vec<Record>) -> Self {
        Self::Related(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Hashable row identity derived from an id or foreign key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Integer(i64),
    Text(String),
}

impl From<RowKey> for Value {
    fn from(value: RowKey) -> Self {
        match value {
            RowKey::Integer(value) => Self::Integer(value),
            RowKey::Text(value) => Self::Text(value),
        }
    }
}

/// Ordered column-name to value mapping.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.0.get_mut(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(column.into(), value.into())
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Returns the value of `column` unless it is absent or null.
    pub fn non_null(&self, column: &str) -> Option<&Value> {
        self.0.get(column).filter(|value| !value.is_null())
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        )
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, RowKey, Value};

    #[test]
    fn record_deserializes_from_plain_json_object() {
        let record: Record = serde_json::from_str(
            r#"{"id": 7, "t": "foo", "f": 1.5, "b": true, "n": null, "meta": {"k": [1, 2]}}"#,
        )
        .expect("record json should parse");

        assert_eq!(record.get("id"), Some(&Value::Integer(7)));
        assert_eq!(record.get("t"), Some(&Value::Text("foo".to_string())));
        assert_eq!(record.get("f"), Some(&Value::Real(1.5)));
        assert_eq!(record.get("b"), Some(&Value::Bool(true)));
        assert_eq!(record.get("n"), Some(&Value::Null));
        assert!(matches!(record.get("meta"), Some(Value::Json(_))));
    }

    #[test]
    fn arrays_of_objects_become_related_children() {
        let record: Record =
            serde_json::from_str(r#"{"books": [{"id": 1, "title": "a"}], "tags": [1, 2]}"#)
                .expect("record json should parse");

        let books = record
            .get("books")
            .and_then(Value::as_related)
            .expect("books should be related children");
        assert_eq!(books[0].get("title"), Some(&Value::from("a")));
        assert!(matches!(record.get("tags"), Some(Value::Json(_))));
    }

    #[test]
    fn only_integer_and_text_values_produce_row_keys() {
        assert_eq!(Value::Integer(3).key(), Some(RowKey::Integer(3)));
        assert_eq!(Value::from("x").key(), Some(RowKey::Text("x".to_string())));
        assert_eq!(Value::Real(1.0).key(), None);
        assert_eq!(Value::Null.key(), None);
    }

    #[test]
    fn non_null_skips_explicit_nulls() {
        let record = Record::new().with("id", Value::Null).with("t", "x");
        assert!(record.non_null("id").is_none());
        assert!(record.non_null("t").is_some());
        assert!(record.non_null("missing").is_none());
    }
}
