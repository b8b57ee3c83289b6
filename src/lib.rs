//! # Entity Query
//!
//! A query compilation and execution engine. Callers describe a query against an
//! entity shape as data (filters, joins, grouping, aggregates, ordering and
//! pagination), the engine compiles it into one parameterized SQL statement, runs
//! it, maps the rows back into typed values and classifies storage failures into a
//! stable error taxonomy.
//!
//! ## Features
//!
//! - **Typed entities**: field-to-column metadata declared with [`impl_entity!`]
//! - **Predicate AST**: filters are data; anything without a SQL translation is rejected
//! - **Safe binding**: every value is a named `@pN` parameter, never spliced into text
//! - **Joins with aliases**: predicates reference joined shapes or explicit aliases
//! - **Deterministic paging**: a fallback order is injected when none is given
//! - **Async execution**: pooled SQLite through deadpool, with cooperative cancellation
//! - **Error classification**: constraint, timeout, concurrency and availability errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use entity_query::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default)]
//! struct Trip {
//!     id: i64,
//!     name: String,
//!     driver_id: i64,
//!     price: f64,
//! }
//!
//! entity_query::impl_entity!(Trip => "Trips" {
//!     id: "Id" [key, computed],
//!     name: "Name",
//!     driver_id: "DriverId",
//!     price: "Price",
//! });
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = Arc::new(MetadataRegistry::builder().register::<Trip>()?.build());
//!     let db = PooledSqliteDatabase::with_config(PoolConfig::new("trips.db")).await?;
//!     let engine = QueryEngine::new(db, registry);
//!
//!     engine
//!         .insert(&Trip { name: "Night bus".into(), driver_id: 3, price: 12.5, ..Default::default() })
//!         .await?;
//!
//!     let night = QueryModel::<Trip>::new()
//!         .filter(Expr::field("name").starts_with("Night"))
//!         .order_by_desc(Expr::field("price"));
//!     for trip in engine.to_list(&night).await? {
//!         println!("{} costs {}", trip.name, trip.price);
//!     }
//!
//!     let total: f64 = engine.sum(&night, Expr::field("price")).await?;
//!     println!("total {total}");
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! src/
//! ├── core/                 # Engine types and traits
//! │   ├── value.rs          # Values and rows
//! │   ├── convert.rs        # Parameter binder conversions
//! │   ├── error.rs          # Error taxonomy
//! │   ├── classifier.rs     # Driver message classification
//! │   ├── metadata.rs       # Entity metadata registry
//! │   ├── row_mapper.rs     # Rows into shapes and scalars
//! │   ├── expression.rs     # Predicate and selector AST
//! │   ├── filter.rs         # Filter / sort / search request inputs
//! │   ├── query.rs          # Query model and fluent builder
//! │   ├── translator.rs     # Expressions into SQL fragments
//! │   ├── dialect.rs        # Dialect-specific clauses
//! │   ├── sql_builder.rs    # SELECT / COUNT / EXISTS statements
//! │   ├── write_builder.rs  # INSERT / UPDATE / DELETE statements
//! │   ├── outcome.rs        # Result algebra
//! │   ├── database.rs       # Statement and executor traits
//! │   └── engine.rs         # Terminal operations and write helpers
//! └── backends/             # SQLite execution
//!     ├── sqlite.rs         # Binding, decoding, caller-owned connection
//!     └── pooled_sqlite.rs  # deadpool executor and transactions
//! ```

/// Core engine types and traits
pub mod core;

/// Execution backends
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use entity_query::prelude::*;
///
/// let filter = Expr::field("price").gt(10).and(Expr::field("name").contains("bus"));
/// assert_eq!(filter.to_string(), "((price > 10) && name.contains(bus))");
/// ```
pub mod prelude {
    pub use crate::core::{
        AggregateFunction, DatabaseError, DatabaseResult, DatabaseRow, DatabaseValue,
        DeleteBuilder, Entity, Executor, Expr, Filter, FilterOperator, FromRow, InsertBuilder,
        JoinKind, MetadataRegistry, OperationResult, OptionalResult, PagedResult, QueryEngine,
        QueryModel, Result, SearchRequest, Shape, SortOption, SqlDialect, Statement,
        Transaction, Transactional, UpdateBuilder,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::{PoolConfig, PooledSqliteDatabase, SqliteConnection};
}

// Re-export at root level for convenience
pub use crate::core::{
    DatabaseError, DatabaseResult, DatabaseRow, DatabaseValue, Expr, MetadataRegistry,
    QueryEngine, QueryModel, Result, Statement,
};

#[cfg(feature = "sqlite")]
pub use crate::backends::{PoolConfig, PooledSqliteDatabase, SqliteConnection};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let dialect: SqlDialect = "sqlite".parse().unwrap();
        assert_eq!(dialect.to_str(), "sqlite");
        assert_eq!(SqlDialect::default(), SqlDialect::SqlServer);
    }

    #[test]
    fn test_value_conversions() {
        use prelude::*;

        let val: DatabaseValue = 42.into();
        assert_eq!(val.as_int(), Some(42));

        let val: DatabaseValue = "test".into();
        assert_eq!(val.as_string(), "test");

        let val: DatabaseValue = true.into();
        assert_eq!(val.as_bool(), Some(true));
    }
}
