//! API-boundary query inputs
//!
//! Filters, sort options and search requests arrive as plain data (usually
//! deserialized from a request body) and are lowered into expressions.

use super::expression::Expr;
use super::value::DatabaseValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

/// One `field operator value` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field or column name of the base entity
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default = "null_value")]
    pub value: DatabaseValue,
}

fn null_value() -> DatabaseValue {
    DatabaseValue::Null
}

impl Filter {
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<DatabaseValue>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Lower into a predicate over the working shape
    pub fn to_expr(&self) -> Expr {
        let field = Expr::field(self.field.clone());
        let value = self.value.clone();
        match self.operator {
            FilterOperator::Equals => field.eq(value),
            FilterOperator::NotEquals => field.ne(value),
            FilterOperator::GreaterThan => field.gt(value),
            FilterOperator::GreaterOrEqual => field.ge(value),
            FilterOperator::LessThan => field.lt(value),
            FilterOperator::LessOrEqual => field.le(value),
            FilterOperator::Contains => field.contains(value),
            FilterOperator::StartsWith => field.starts_with(value),
            FilterOperator::EndsWith => field.ends_with(value),
            FilterOperator::IsNull => field.is_null(),
            FilterOperator::IsNotNull => field.is_not_null(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOption {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortOption {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn is_ascending(&self) -> bool {
        self.direction == SortDirection::Asc
    }
}

/// A paged search over one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sorts: Vec<SortOption>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    20
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sorts: Vec::new(),
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl SearchRequest {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sort: SortOption) -> Self {
        self.sorts.push(sort);
        self
    }
}
