//! SQLite statement execution
//!
//! Binding, row decoding and error classification for `rusqlite` connections,
//! shared by the caller-owned [`SqliteConnection`] and the pooled backend.

use crate::core::{
    classifier::classify,
    database::{BlockingExecutor, Statement},
    dialect::SqlDialect,
    error::{ConstraintKind, DatabaseError, Result},
    translator::SqlParam,
    value::{DatabaseRow, DatabaseValue, TIMESTAMP_FORMAT},
};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode, Row, ToSql};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl ToSql for DatabaseValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            DatabaseValue::Null => ToSqlOutput::Owned(Value::Null),
            DatabaseValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DatabaseValue::Int(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            DatabaseValue::Long(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            DatabaseValue::Float(v) => ToSqlOutput::Owned(Value::Real(f64::from(*v))),
            DatabaseValue::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            DatabaseValue::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            DatabaseValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            DatabaseValue::Timestamp(v) => {
                ToSqlOutput::Owned(Value::Text(v.format(TIMESTAMP_FORMAT).to_string()))
            }
            DatabaseValue::Uuid(v) => ToSqlOutput::Owned(Value::Text(v.hyphenated().to_string())),
        })
    }
}

/// Classify a `rusqlite` failure.
///
/// The extended result code tells a primary key violation from a unique one and an
/// interrupted statement from a failed one; everything else goes by message text.
pub fn classify_sqlite(error: rusqlite::Error) -> DatabaseError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        if failure.code == ErrorCode::OperationInterrupted {
            return DatabaseError::Cancelled;
        }
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY {
            return match classify(&error.to_string()) {
                DatabaseError::ConstraintViolation { name, .. } => {
                    DatabaseError::constraint(ConstraintKind::PrimaryKey, name)
                }
                _ => DatabaseError::constraint(ConstraintKind::PrimaryKey, ""),
            };
        }
    }
    classify(&error.to_string())
}

fn decode_row(row: &Row<'_>, columns: &[String]) -> rusqlite::Result<DatabaseRow> {
    let mut db_row = DatabaseRow::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => DatabaseValue::Null,
            ValueRef::Integer(v) => DatabaseValue::Long(v),
            ValueRef::Real(v) => DatabaseValue::Double(v),
            ValueRef::Text(v) => DatabaseValue::String(String::from_utf8_lossy(v).to_string()),
            ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
        };
        db_row.insert(column.clone(), value);
    }
    Ok(db_row)
}

fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[SqlParam]) -> Result<()> {
    for param in params {
        let index = stmt
            .parameter_index(&param.name)
            .map_err(classify_sqlite)?
            .ok_or_else(|| {
                DatabaseError::configuration(format!(
                    "parameter {} does not occur in the statement",
                    param.name
                ))
            })?;
        stmt.raw_bind_parameter(index, &param.value)
            .map_err(classify_sqlite)?;
    }
    Ok(())
}

/// Run a statement that returns no rows. A statement that does return rows
/// (`RETURNING`) is stepped through and its rows counted.
pub(crate) fn run_execute(
    conn: &Connection,
    statement: &Statement,
    cancel: &CancellationToken,
) -> Result<u64> {
    if cancel.is_cancelled() {
        return Err(DatabaseError::Cancelled);
    }
    let mut stmt = conn.prepare(&statement.sql).map_err(classify_sqlite)?;
    bind_params(&mut stmt, &statement.params)?;
    if stmt.column_count() == 0 {
        let affected = stmt.raw_execute().map_err(classify_sqlite)?;
        return Ok(affected as u64);
    }
    let mut rows = stmt.raw_query();
    let mut count = 0;
    while rows.next().map_err(classify_sqlite)?.is_some() {
        count += 1;
    }
    Ok(count)
}

/// Run a statement and hand each row to `on_row`, checking `cancel` before every
/// fetch.
pub(crate) fn run_read(
    conn: &Connection,
    statement: &Statement,
    cancel: &CancellationToken,
    on_row: &mut dyn FnMut(DatabaseRow) -> Result<()>,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(DatabaseError::Cancelled);
    }
    let mut stmt = conn.prepare(&statement.sql).map_err(classify_sqlite)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    bind_params(&mut stmt, &statement.params)?;
    let mut rows = stmt.raw_query();
    loop {
        if cancel.is_cancelled() {
            return Err(DatabaseError::Cancelled);
        }
        match rows.next().map_err(classify_sqlite)? {
            Some(row) => on_row(decode_row(row, &columns).map_err(classify_sqlite)?)?,
            None => return Ok(()),
        }
    }
}

/// Per-connection settings applied before use
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub foreign_keys: bool,
    pub busy_timeout: Duration,
}

impl ConnectionSettings {
    pub(crate) fn apply(&self, conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)
            .map_err(classify_sqlite)?;
        conn.busy_timeout(self.busy_timeout).map_err(classify_sqlite)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            foreign_keys: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// A caller-owned SQLite connection for synchronous execution
///
/// # Example
///
/// ```no_run
/// use entity_query::backends::SqliteConnection;
/// use entity_query::core::database::{BlockingExecutor, Statement};
/// use tokio_util::sync::CancellationToken;
///
/// let conn = SqliteConnection::open("trips.db")?;
/// let statement = Statement::new("DELETE FROM [Seats] WHERE [TripId] = @p0").bind(7_i64);
/// let removed = conn.execute_blocking(&statement, &CancellationToken::new())?;
/// # Ok::<(), entity_query::DatabaseError>(())
/// ```
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Open (or create) the database at `path` with foreign keys enforced
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(classify_sqlite)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(classify_sqlite)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection, applying the default settings
    pub fn from_connection(conn: Connection) -> Result<Self> {
        ConnectionSettings::default().apply(&conn)?;
        Ok(Self { conn })
    }

    /// Run several `;`-separated statements without parameters
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(classify_sqlite)
    }

    pub fn inner(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl BlockingExecutor for SqliteConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn execute_blocking(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
        run_execute(&self.conn, statement, cancel)
    }

    fn read_blocking(
        &self,
        statement: &Statement,
        cancel: &CancellationToken,
        on_row: &mut dyn FnMut(DatabaseRow) -> Result<()>,
    ) -> Result<()> {
        run_read(&self.conn, statement, cancel, on_row)
    }
}
