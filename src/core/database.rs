//! Statements and executor traits
//!
//! This module defines the compiled [`Statement`] and the traits every execution
//! backend implements: [`Executor`] for async execution, [`Transactional`] and
//! [`Transaction`] for multi-statement units, and [`BlockingExecutor`] for callers
//! that drive a connection synchronously.

use super::convert::{bind_value, ToDbValue};
use super::dialect::SqlDialect;
use super::error::Result;
use super::translator::{Parameters, SqlParam};
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// SQL text with its named parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    /// Statement without parameters
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn from_parameters(sql: String, params: Parameters) -> Self {
        Self {
            sql,
            params: params.into_vec(),
        }
    }

    /// Bind the next positional parameter, `@p0` first
    ///
    /// ```rust
    /// use entity_query::Statement;
    ///
    /// let statement = Statement::new("DELETE FROM [Seats] WHERE [TripId] = @p0").bind(7_i64);
    /// assert_eq!(statement.params[0].name, "@p0");
    /// ```
    #[must_use]
    pub fn bind(self, value: impl ToDbValue) -> Self {
        let name = format!("@p{}", self.params.len());
        self.bind_named(name, value)
    }

    /// Bind a parameter under an explicit name (including its `@` prefix)
    #[must_use]
    pub fn bind_named(mut self, name: impl Into<String>, value: impl ToDbValue) -> Self {
        self.params.push(SqlParam {
            name: name.into(),
            value: bind_value(value.to_db_value()),
        });
        self
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Rows delivered one at a time as they are fetched
pub type RowStream = BoxStream<'static, Result<DatabaseRow>>;

/// Async statement execution
///
/// Every call observes `cancel`: a token cancelled before or during the call
/// yields [`DatabaseError::Cancelled`](super::error::DatabaseError::Cancelled).
/// Storage failures are returned already classified.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Dialect statements for this executor are compiled to
    fn dialect(&self) -> SqlDialect;

    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64>;

    /// Run a statement and collect its rows
    async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult>;

    /// Run a statement and stream its rows
    fn query_stream(&self, statement: Statement, cancel: CancellationToken) -> RowStream;

    /// First column of the first row, if any
    async fn query_scalar(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Option<DatabaseValue>> {
        let rows = self.query(statement, cancel).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next()))
    }
}

#[async_trait]
impl<'a, X: Executor + ?Sized> Executor for &'a X {
    fn dialect(&self) -> SqlDialect {
        (**self).dialect()
    }

    async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
        (**self).execute(statement, cancel).await
    }

    async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult> {
        (**self).query(statement, cancel).await
    }

    fn query_stream(&self, statement: Statement, cancel: CancellationToken) -> RowStream {
        (**self).query_stream(statement, cancel)
    }
}

#[async_trait]
impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn dialect(&self) -> SqlDialect {
        (**self).dialect()
    }

    async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
        (**self).execute(statement, cancel).await
    }

    async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult> {
        (**self).query(statement, cancel).await
    }

    fn query_stream(&self, statement: Statement, cancel: CancellationToken) -> RowStream {
        (**self).query_stream(statement, cancel)
    }
}

/// An executor that can open transactions
#[async_trait]
pub trait Transactional: Executor {
    type Transaction: Transaction;

    /// Start a transaction on a dedicated connection
    async fn begin(&self) -> Result<Self::Transaction>;
}

#[async_trait]
impl<X: Transactional + ?Sized> Transactional for Arc<X> {
    type Transaction = X::Transaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        (**self).begin().await
    }
}

/// An open transaction. Statements run through it share one connection.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait Transaction: Executor + Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Synchronous statement execution on a caller-owned connection
pub trait BlockingExecutor {
    fn dialect(&self) -> SqlDialect;

    fn execute_blocking(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64>;

    /// Hand each fetched row to `on_row`. An error from `on_row` stops the read.
    fn read_blocking(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
        on_row: &mut dyn FnMut(DatabaseRow) -> Result<()>,
    ) -> Result<()>;

    fn query_blocking(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult> {
        let mut rows = Vec::new();
        self.read_blocking(statement, cancel, &mut |row| {
            rows.push(row);
            Ok(())
        })?;
        Ok(rows)
    }

    fn query_scalar_blocking(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
    ) -> Result<Option<DatabaseValue>> {
        let rows = self.query_blocking(statement, cancel)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().into_iter().next()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_binding() {
        let statement = Statement::new("SELECT 1 WHERE @p0 = @p1")
            .bind(1)
            .bind("x")
            .bind(Vec::<u8>::new());
        let names: Vec<_> = statement.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@p0", "@p1", "@p2"]);
        assert_eq!(statement.params[2].value, DatabaseValue::Null);
        assert_eq!(statement.to_string(), "SELECT 1 WHERE @p0 = @p1");
    }

    #[test]
    fn test_named_binding() {
        let statement = Statement::new("SELECT @id").bind_named("@id", 4_i64);
        assert_eq!(statement.params[0].name, "@id");
        assert_eq!(statement.params[0].value, DatabaseValue::Long(4));
    }
}
