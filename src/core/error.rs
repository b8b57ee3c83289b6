//! Error types for the query engine
//!
//! This module defines the error taxonomy surfaced by every layer of the engine:
//! storage failures classified into stable kinds, and programmer errors detected
//! while compiling a query model into SQL.

use std::fmt;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Kind of integrity constraint a write violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// Primary key collision
    PrimaryKey,
    /// Unique key or unique index collision
    Unique,
    /// Referenced row missing (or still referenced)
    ForeignKey,
    /// Check constraint rejected the row
    Check,
    /// Null written into a non-nullable column
    NotNull,
}

impl ConstraintKind {
    /// Get the constraint kind as a string
    pub fn to_str(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
            ConstraintKind::NotNull => "not null",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Error types for engine operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// A write violated an integrity constraint
    ///
    /// `name` is the constraint name, or the column name for not-null violations.
    /// It is empty when the storage message does not carry one.
    #[error("Constraint violation ({kind}): {name}")]
    ConstraintViolation { kind: ConstraintKind, name: String },

    /// Command or connection timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Deadlock, serialization failure or lock contention
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Storage unreachable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Unclassified storage failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Shape without registered entity metadata
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Field that does not resolve to a column of its shape
    #[error("Unknown field '{field}' on {shape}")]
    UnknownField { shape: String, field: String },

    /// Table alias not visible at the point of use
    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    /// Predicate node with no SQL translation
    #[error("Unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// Projection item with no SQL translation
    #[error("Unsupported projection: {0}")]
    UnsupportedProjection(String),

    /// Page or page size out of range
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Row could not be mapped into the target type
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid metadata or connection configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DatabaseError {
    /// Create a constraint violation error
    pub fn constraint(kind: ConstraintKind, name: impl Into<String>) -> Self {
        DatabaseError::ConstraintViolation {
            kind,
            name: name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Timeout(msg.into())
    }

    /// Create a concurrency error
    pub fn concurrency<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Concurrency(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Unavailable(msg.into())
    }

    /// Create a generic repository error
    pub fn repository<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Repository(msg.into())
    }

    /// Create an unknown entity error
    pub fn unknown_entity<S: Into<String>>(shape: S) -> Self {
        DatabaseError::UnknownEntity(shape.into())
    }

    /// Create an unknown field error
    pub fn unknown_field(shape: impl Into<String>, field: impl Into<String>) -> Self {
        DatabaseError::UnknownField {
            shape: shape.into(),
            field: field.into(),
        }
    }

    /// Create an unknown alias error
    pub fn unknown_alias<S: Into<String>>(alias: S) -> Self {
        DatabaseError::UnknownAlias(alias.into())
    }

    /// Create an unsupported predicate error
    pub fn unsupported_predicate<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedPredicate(msg.into())
    }

    /// Create an unsupported projection error
    pub fn unsupported_projection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedProjection(msg.into())
    }

    /// Create an invalid pagination error
    pub fn invalid_pagination<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidPagination(msg.into())
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a mapping error
    pub fn mapping<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Mapping(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Transaction(msg.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Configuration(msg.into())
    }

    /// Kind of the violated constraint, if this is a constraint violation
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            DatabaseError::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DatabaseError::Timeout(_) | DatabaseError::Concurrency(_) | DatabaseError::Unavailable(_)
        )
    }
}
