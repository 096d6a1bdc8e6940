//! Query predicate value types.
//!
//! # Invariants
//! - A membership filter with no values matches nothing.
//! - A comparison filter always carries exactly one value; other arities are
//!   rejected at construction.

use super::record::Value;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Ordering operator for comparison filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn sql_operator(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

/// Malformed filter construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    ComparisonArity { field: String, given: usize },
    UnknownOperator(String),
}

impl Display for FilterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ComparisonArity { field, given } => write!(
                f,
                "comparison filter on `{field}` requires exactly one value, got {given}"
            ),
            Self::UnknownOperator(value) => {
                write!(f, "unknown comparison operator `{value}`; expected gt|gte|lt|lte")
            }
        }
    }
}

impl Error for FilterError {}

/// One conjunct of a query predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches rows whose `field` equals one of `values`.
    In { field: String, values: Vec<Value> },
    /// Matches rows whose `field` compares against `value`.
    Compare {
        field: String,
        operator: Comparison,
        value: Value,
    },
}

impl Filter {
    pub fn new(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Single-value membership filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, vec![value.into()])
    }

    /// Builds a comparison filter, rejecting anything but exactly one value.
    pub fn compare(
        field: impl Into<String>,
        operator: Comparison,
        values: Vec<Value>,
    ) -> Result<Self, FilterError> {
        let field = field.into();
        let given = values.len();
        let mut values = values.into_iter();
        match (values.next(), values.next()) {
            (Some(value), None) => Ok(Self::Compare {
                field,
                operator,
                value,
            }),
            _ => Err(FilterError::ComparisonArity { field, given }),
        }
    }

    /// Parses the operator name as shared query-param parsers supply it.
    pub fn compare_named(
        field: impl Into<String>,
        operator: &str,
        values: Vec<Value>,
    ) -> Result<Self, FilterError> {
        let operator = Comparison::parse(operator)
            .ok_or_else(|| FilterError::UnknownOperator(operator.to_string()))?;
        Self::compare(field, operator, values)
    }

    pub fn field(&self) -> &str {
        match self {
            Self::In { field, .. } | Self::Compare { field, .. } => field.as_str(),
        }
    }
}
