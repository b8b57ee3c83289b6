//! Result algebra returned to service callers
//!
//! Services surface outcomes as values instead of errors: a write either succeeds
//! or carries a message, a lookup either has a value, has none, or failed, and a
//! paged query carries its page alongside the total.

use super::error::{DatabaseError, Result};
use serde::Serialize;

/// Outcome of an operation that produces no value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OperationResult {
    Success,
    Failure(String),
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success)
    }

    /// Collapse into a single value
    pub fn fold<R>(self, on_success: impl FnOnce() -> R, on_failure: impl FnOnce(String) -> R) -> R {
        match self {
            OperationResult::Success => on_success(),
            OperationResult::Failure(message) => on_failure(message),
        }
    }

    /// Run `f` when successful
    pub fn on_success(self, f: impl FnOnce()) -> Self {
        if let OperationResult::Success = &self {
            f();
        }
        self
    }

    /// Run `f` with the failure message
    pub fn on_failure(self, f: impl FnOnce(&str)) -> Self {
        if let OperationResult::Failure(message) = &self {
            f(message);
        }
        self
    }
}

impl<T> From<Result<T>> for OperationResult {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(_) => OperationResult::Success,
            Err(e) => OperationResult::Failure(e.to_string()),
        }
    }
}

/// Outcome of a lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OptionalResult<T> {
    Value(T),
    NoValue,
    ErrorValue(String),
}

impl<T> OptionalResult<T> {
    pub fn has_value(&self) -> bool {
        matches!(self, OptionalResult::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OptionalResult::ErrorValue(_))
    }

    /// Collapse the three cases into a single value
    pub fn fold<R>(
        self,
        on_value: impl FnOnce(T) -> R,
        on_none: impl FnOnce() -> R,
        on_error: impl FnOnce(String) -> R,
    ) -> R {
        match self {
            OptionalResult::Value(v) => on_value(v),
            OptionalResult::NoValue => on_none(),
            OptionalResult::ErrorValue(message) => on_error(message),
        }
    }

    pub fn on_value(self, f: impl FnOnce(&T)) -> Self {
        if let OptionalResult::Value(v) = &self {
            f(v);
        }
        self
    }

    pub fn on_no_value(self, f: impl FnOnce()) -> Self {
        if let OptionalResult::NoValue = &self {
            f();
        }
        self
    }

    pub fn on_error(self, f: impl FnOnce(&str)) -> Self {
        if let OptionalResult::ErrorValue(message) = &self {
            f(message);
        }
        self
    }

    /// Transform the value, keeping the other cases
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OptionalResult<U> {
        match self {
            OptionalResult::Value(v) => OptionalResult::Value(f(v)),
            OptionalResult::NoValue => OptionalResult::NoValue,
            OptionalResult::ErrorValue(message) => OptionalResult::ErrorValue(message),
        }
    }

    /// The value, if any
    pub fn value(self) -> Option<T> {
        match self {
            OptionalResult::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Result<Option<T>>> for OptionalResult<T> {
    fn from(result: Result<Option<T>>) -> Self {
        match result {
            Ok(Some(v)) => OptionalResult::Value(v),
            Ok(None) => OptionalResult::NoValue,
            Err(e) => OptionalResult::from(e),
        }
    }
}

impl<T> From<DatabaseError> for OptionalResult<T> {
    fn from(error: DatabaseError) -> Self {
        OptionalResult::ErrorValue(error.to_string())
    }
}

/// One page of a larger result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Rows matching the query before pagination
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total_count: u64, page: u64, page_size: u64) -> Self {
        Self {
            items,
            total_count,
            page,
            page_size,
        }
    }

    /// Number of pages needed for `total_count` rows
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total_count.div_ceil(self.page_size)
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.page > 1
    }

    /// Transform every item, keeping the paging figures
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_from_result() {
        let ok: OperationResult = Result::Ok(5).into();
        assert!(ok.is_success());

        let failed: OperationResult = Result::<()>::Err(DatabaseError::timeout("slow")).into();
        assert_eq!(failed, OperationResult::Failure("Timeout: slow".to_string()));
    }

    #[test]
    fn test_operation_result_fold() {
        let message = OperationResult::Failure("nope".into()).fold(|| "ok".to_string(), |m| m);
        assert_eq!(message, "nope");
    }

    #[test]
    fn test_optional_result_cases() {
        let found: OptionalResult<i32> = Result::Ok(Some(3)).into();
        assert!(found.has_value());
        assert_eq!(found.clone().map(|v| v * 2), OptionalResult::Value(6));

        let missing: OptionalResult<i32> = Result::Ok(None).into();
        assert_eq!(missing, OptionalResult::NoValue);

        let failed: OptionalResult<i32> = Result::Err(DatabaseError::Cancelled).into();
        assert!(failed.is_error());

        let described = failed.fold(|v| v.to_string(), || "none".into(), |e| e);
        assert_eq!(described, "Operation cancelled");
    }

    #[test]
    fn test_optional_result_callbacks() {
        let mut seen = None;
        let result = OptionalResult::Value(4).on_value(|v| seen = Some(*v));
        assert_eq!(seen, Some(4));
        assert_eq!(result.value(), Some(4));

        let mut none_called = false;
        let _ = OptionalResult::<i32>::NoValue.on_no_value(|| none_called = true);
        assert!(none_called);
    }

    #[test]
    fn test_paged_result_pages() {
        let page = PagedResult::new(vec![1, 2, 3], 10, 2, 3);
        assert_eq!(page.total_pages(), 4);
        assert!(page.has_next_page());
        assert!(page.has_previous_page());

        let last = PagedResult::new(vec![10], 10, 4, 3);
        assert!(!last.has_next_page());

        let empty: PagedResult<i32> = PagedResult::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn test_paged_result_serializes() {
        let page = PagedResult::new(vec!["a"], 1, 1, 10);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["total_count"], 1);
        assert_eq!(json["items"][0], "a");
    }
}
