//! Pagination request and paginated result envelope.
//!
//! # Invariants
//! - `limit` is always positive.
//! - Offset and cursor pagination are mutually exclusive.

use super::record::Value;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_ORDER_BY: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    ZeroLimit,
    OffsetWithCursor,
}

impl Display for PageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroLimit => write!(f, "page limit must be positive"),
            Self::OffsetWithCursor => {
                write!(f, "offset and cursor pagination cannot be combined")
            }
        }
    }
}

impl Error for PageError {}

/// Pagination and ordering request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    limit: u32,
    offset: u32,
    order_by: String,
    ascending: bool,
    cursor: Option<Value>,
}

impl PageOptions {
    /// First page of `limit` rows ordered by `id` ascending.
    pub fn new(limit: u32) -> Result<Self, PageError> {
        if limit == 0 {
            return Err(PageError::ZeroLimit);
        }
        Ok(Self {
            limit,
            offset: 0,
            order_by: DEFAULT_ORDER_BY.to_string(),
            ascending: true,
            cursor: None,
        })
    }

    pub fn with_offset(mut self, offset: u32) -> Result<Self, PageError> {
        if self.cursor.is_some() && offset > 0 {
            return Err(PageError::OffsetWithCursor);
        }
        self.offset = offset;
        Ok(self)
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = column.into();
        self.ascending = ascending;
        self
    }

    /// Continues after the row whose `order_by` value is `cursor`.
    pub fn after(mut self, cursor: impl Into<Value>) -> Result<Self, PageError> {
        if self.offset > 0 {
            return Err(PageError::OffsetWithCursor);
        }
        self.cursor = Some(cursor.into());
        Ok(self)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn order_column(&self) -> &str {
        self.order_by.as_str()
    }

    pub fn ascending(&self) -> bool {
        self.ascending
    }

    pub fn cursor(&self) -> Option<&Value> {
        self.cursor.as_ref()
    }

    /// Whether this request addresses the very first page of results.
    pub fn is_first_page(&self) -> bool {
        self.offset == 0 && self.cursor.is_none()
    }
}

/// One page of results.
///
/// `total` is the filtered row count irrespective of pagination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Cursor for the following page when this page came back full.
    pub next_cursor: Option<Value>,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
            next_cursor: self.next_cursor,
        }
    }
}
