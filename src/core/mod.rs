//! Core engine types and traits
//!
//! Leaves first: values and conversions, errors and their classifier, entity
//! metadata and row mapping, the expression and query models, the translator and
//! statement builders, and the executor traits and query engine on top.

pub mod classifier;
pub mod convert;
pub mod database;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod expression;
pub mod filter;
pub mod metadata;
pub mod outcome;
pub mod query;
pub mod row_mapper;
pub mod sql_builder;
pub mod translator;
pub mod value;
pub mod write_builder;

// Re-export commonly used types
pub use classifier::classify;
pub use convert::{FromDbValue, ToDbValue};
pub use database::{BlockingExecutor, Executor, RowStream, Statement, Transaction, Transactional};
pub use dialect::SqlDialect;
pub use engine::{BlockingQueryEngine, QueryEngine};
pub use error::{ConstraintKind, DatabaseError, Result};
pub use expression::{AggregateFunction, BinaryOperator, Expr, FieldRef, IntoExpr, MethodKind, TableRef};
pub use filter::{Filter, FilterOperator, SearchRequest, SortDirection, SortOption};
pub use metadata::{ColumnMapping, Entity, EntityMetadata, MetadataRegistry, ShapeId};
pub use outcome::{OperationResult, OptionalResult, PagedResult};
pub use query::{JoinKind, QueryModel};
pub use row_mapper::{FromRow, Shape};
pub use sql_builder::SqlBuilder;
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue};
pub use write_builder::{DeleteBuilder, InsertBuilder, UpdateBuilder};
