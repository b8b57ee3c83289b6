//! Property-based tests for query compilation using proptest

use chrono::NaiveDate;
use entity_query::core::convert::bind_value;
use entity_query::core::{classify, ConstraintKind, FromDbValue, SqlBuilder, ToDbValue};
use entity_query::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
struct Trip {
    id: i64,
    name: String,
    price: f64,
}

entity_query::impl_entity!(Trip => "Trips" {
    id: "Id" [key, computed],
    name: "Name",
    price: "Price",
});

fn registry() -> MetadataRegistry {
    MetadataRegistry::builder()
        .register::<Trip>()
        .expect("Trip registers")
        .build()
}

fn dialect() -> impl Strategy<Value = SqlDialect> {
    prop_oneof![Just(SqlDialect::SqlServer), Just(SqlDialect::Sqlite)]
}

// ============================================================================
// Predicate Translation
// ============================================================================

proptest! {
    /// n filters compile to n AND-combined fragments with distinct parameters
    #[test]
    fn test_filters_and_combine(prices in prop::collection::vec(-1000i64..1000, 1..20), dialect in dialect()) {
        let registry = registry();
        let model = prices
            .iter()
            .fold(QueryModel::<Trip>::new(), |model, price| {
                model.filter(Expr::field("price").gt(*price))
            });
        let statement = SqlBuilder::new(&registry, dialect).select(&model).unwrap();

        let where_clause = statement.sql.split(" WHERE ").nth(1).unwrap();
        prop_assert_eq!(where_clause.split(" AND ").count(), prices.len());
        prop_assert_eq!(statement.params.len(), prices.len());
        let names: HashSet<_> = statement.params.iter().map(|p| p.name.as_str()).collect();
        prop_assert_eq!(names.len(), prices.len());
        for name in names {
            prop_assert!(where_clause.contains(name));
        }
    }

    /// Text values never appear in the statement text
    #[test]
    fn test_text_is_never_inlined(text in "[a-zA-Z0-9' ;-]{1,24}") {
        let registry = registry();
        let model = QueryModel::<Trip>::new()
            .where_filter(&Filter::new("name", FilterOperator::Equals, text.clone()));
        let statement = SqlBuilder::new(&registry, SqlDialect::SqlServer).select(&model).unwrap();
        prop_assert!(statement.sql.ends_with("WHERE ([t0].[Name] = @p0)"));
        prop_assert_eq!(&statement.params[0].value, &DatabaseValue::String(text));
    }
}

// ============================================================================
// Pagination
// ============================================================================

proptest! {
    /// page/page_size translate into skip and take
    #[test]
    fn test_page_window(page in 1u64..10_000, size in 1u64..500) {
        let model = QueryModel::<Trip>::new().page(page, size);
        let window = model.parts().window().unwrap().unwrap();
        prop_assert_eq!(window.skip, (page - 1) * size);
        prop_assert_eq!(window.take, Some(size));
    }

    /// Explicit skip/take win over the derived values
    #[test]
    fn test_explicit_window_wins(page in 1u64..100, size in 1u64..100, skip in 0u64..1000) {
        let model = QueryModel::<Trip>::new().page(page, size).skip(skip);
        let window = model.parts().window().unwrap().unwrap();
        prop_assert_eq!(window.skip, skip);
        prop_assert_eq!(window.take, Some(size));
    }

    /// Pages 1..=total_pages cover every row exactly once
    #[test]
    fn test_pages_cover_rows(total in 0u64..500, size in 1u64..50) {
        let pages = PagedResult::<()>::new(Vec::new(), total, 1, size).total_pages();
        let mut covered = 0;
        for page in 1..=pages {
            let window = QueryModel::<Trip>::new().page(page, size).parts().window().unwrap().unwrap();
            prop_assert_eq!(window.skip, covered);
            covered += size.min(total - window.skip);
        }
        prop_assert_eq!(covered, total);
    }

    #[test]
    fn test_zero_page_rejected(size in 0u64..50) {
        let result = QueryModel::<Trip>::new().page(0, size).parts().window();
        prop_assert!(matches!(result, Err(DatabaseError::InvalidPagination(_))), "expected InvalidPagination");
    }
}

// ============================================================================
// Error Classification
// ============================================================================

proptest! {
    /// Any driver text classifies without panicking
    #[test]
    fn test_classify_total(message in ".*") {
        let _ = classify(&message);
    }

    /// Unique violations carry the constraint name
    #[test]
    fn test_unique_name_extracted(name in "[A-Za-z_][A-Za-z0-9_]{0,30}") {
        let message = format!(
            "Violation of UNIQUE KEY constraint '{}'. Cannot insert duplicate key in object 'dbo.Users'.",
            name
        );
        match classify(&message) {
            DatabaseError::ConstraintViolation { kind, name: extracted } => {
                prop_assert_eq!(kind, ConstraintKind::Unique);
                prop_assert_eq!(extracted, name);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    /// Not-null violations carry the column name
    #[test]
    fn test_not_null_column_extracted(table in "[A-Z][a-z]{1,10}", column in "[A-Z][A-Za-z]{1,12}") {
        let message = format!("NOT NULL constraint failed: {}.{}", table, column);
        let error = classify(&message);
        prop_assert_eq!(error.constraint_kind(), Some(ConstraintKind::NotNull));
        prop_assert!(
            matches!(&error, DatabaseError::ConstraintViolation { name, .. } if *name == column),
            "unexpected {:?}",
            error
        );
    }
}

// ============================================================================
// Parameter Binding
// ============================================================================

proptest! {
    /// Timestamps outside the storage range bind as null
    #[test]
    fn test_timestamp_range(year in 1i32..12_000, day in 1u32..28) {
        let ts = NaiveDate::from_ymd_opt(year, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let bound = bind_value(ts.to_db_value());
        if (1753..=9999).contains(&year) {
            prop_assert_eq!(bound, DatabaseValue::Timestamp(ts));
        } else {
            prop_assert_eq!(bound, DatabaseValue::Null);
        }
    }

    /// Optional values bind as null when absent and read back unchanged
    #[test]
    fn test_option_binding(value in prop::option::of(any::<i64>())) {
        let bound = bind_value(value.to_db_value());
        prop_assert_eq!(bound.is_null(), value.is_none());
        prop_assert_eq!(Option::<i64>::from_db_value(&bound).unwrap(), value);
    }

    /// Strings survive binding byte for byte
    #[test]
    fn test_string_binding(text in ".*") {
        let bound = bind_value(text.to_db_value());
        prop_assert_eq!(String::from_db_value(&bound).unwrap(), text);
    }
}

#[test]
fn test_empty_bytes_bind_as_null() {
    assert_eq!(bind_value(Vec::<u8>::new().to_db_value()), DatabaseValue::Null);
    assert_eq!(
        bind_value(vec![1u8, 2].to_db_value()),
        DatabaseValue::Bytes(vec![1, 2])
    );
}
