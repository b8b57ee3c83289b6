//! Pooled SQLite executor
//!
//! Statements run on pooled `rusqlite` connections through deadpool's blocking
//! `interact`. Each call is bounded by the operation timeout and watches its
//! cancellation token; a cancelled or timed-out statement is interrupted on the
//! connection so the connection returns to the pool promptly.

use super::sqlite::{classify_sqlite, run_execute, run_read, ConnectionSettings};
use crate::core::{
    database::{Executor, RowStream, Statement, Transaction, Transactional},
    dialect::SqlDialect,
    error::{DatabaseError, Result},
    value::{DatabaseResult, DatabaseRow},
};
use async_trait::async_trait;
use deadpool_sqlite::{Config, InteractError, Object, Pool, PoolError, Runtime};
use futures::stream::{self, StreamExt};
use futures::TryFutureExt;
use rusqlite::{Connection, InterruptHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool configuration for SQLite connections
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Timeout for acquiring a connection from the pool
    pub timeout: Duration,
    /// Timeout for one statement (query, execute, etc.)
    pub operation_timeout: Duration,
    /// How long a connection waits on a locked database before failing
    pub busy_timeout: Duration,
    /// Enforce foreign keys on every connection
    pub foreign_keys: bool,
    /// Rows buffered ahead of a streaming reader
    pub stream_buffer: usize,
    /// SQLite connection string
    pub connection_string: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            timeout: Duration::from_secs(5),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
            stream_buffer: 64,
            connection_string: String::new(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }

    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set connection acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set statement timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_stream_buffer(mut self, rows: usize) -> Self {
        self.stream_buffer = rows;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.connection_string.is_empty() {
            return Err(DatabaseError::configuration("connection string is empty"));
        }
        if self.max_size == 0 {
            return Err(DatabaseError::configuration("pool max_size must be at least 1"));
        }
        if self.stream_buffer == 0 {
            return Err(DatabaseError::configuration("stream_buffer must be at least 1"));
        }
        Ok(())
    }

    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            foreign_keys: self.foreign_keys,
            busy_timeout: self.busy_timeout,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for a connection
    pub waiting: usize,
}

fn pool_error(error: PoolError) -> DatabaseError {
    match error {
        PoolError::Timeout(kind) => {
            DatabaseError::timeout(format!("waiting for a pooled connection ({:?})", kind))
        }
        PoolError::Backend(e) => match classify_sqlite(e) {
            DatabaseError::Repository(message) => DatabaseError::unavailable(message),
            other => other,
        },
        other => DatabaseError::unavailable(other.to_string()),
    }
}

fn interact_error(error: InteractError) -> DatabaseError {
    DatabaseError::unavailable(format!("connection task failed: {}", error))
}

/// A pooled connection together with the handle that interrupts it
struct Lease {
    object: Object,
    interrupt: InterruptHandle,
}

async fn acquire(pool: &Pool, cancel: &CancellationToken) -> Result<Lease> {
    if cancel.is_cancelled() {
        return Err(DatabaseError::Cancelled);
    }
    let object = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DatabaseError::Cancelled),
        object = pool.get() => object.map_err(pool_error)?,
    };
    let interrupt = object
        .interact(|conn| conn.get_interrupt_handle())
        .await
        .map_err(interact_error)?;
    Ok(Lease { object, interrupt })
}

/// Run `op` on the leased connection, bounded by `timeout` when given
async fn run<R, F>(
    lease: &Lease,
    settings: ConnectionSettings,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    op: F,
) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce(&Connection) -> Result<R> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(DatabaseError::Cancelled);
    }
    let work = lease.object.interact(move |conn| {
        settings.apply(conn)?;
        op(conn)
    });
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                DatabaseError::timeout(format!("statement exceeded {}ms", limit.as_millis()))
            }),
            None => Ok(work.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            lease.interrupt.interrupt();
            Err(DatabaseError::Cancelled)
        }
        outcome = bounded => match outcome {
            Err(e) => {
                lease.interrupt.interrupt();
                Err(e)
            }
            Ok(result) => result.map_err(interact_error)?,
        }
    }
}

fn read_all(
    conn: &Connection,
    statement: &Statement,
    cancel: &CancellationToken,
) -> Result<DatabaseResult> {
    let mut rows = Vec::new();
    run_read(conn, statement, cancel, &mut |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

/// Stream the rows of `statement` from a connection obtained by `lease`
fn spawn_reader<L>(
    lease: L,
    settings: ConnectionSettings,
    buffer: usize,
    statement: Statement,
    cancel: CancellationToken,
) -> RowStream
where
    L: std::future::Future<Output = Result<Arc<Lease>>> + Send + 'static,
{
    let (sender, receiver) = mpsc::channel::<Result<DatabaseRow>>(buffer);
    tokio::spawn(async move {
        let rows = sender.clone();
        let token = cancel.clone();
        let outcome = async {
            let lease = lease.await?;
            run(&lease, settings, None, &cancel, move |conn| {
                run_read(conn, &statement, &token, &mut |row| {
                    // A dropped receiver ends the read.
                    rows.blocking_send(Ok(row))
                        .map_err(|_| DatabaseError::Cancelled)
                })
            })
            .await
        }
        .await;
        if let Err(e) = outcome {
            let _ = sender.send(Err(e)).await;
        }
    });
    futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    })
    .boxed()
}

/// Pooled SQLite executor
///
/// # Example
///
/// ```no_run
/// use entity_query::backends::{PoolConfig, PooledSqliteDatabase};
/// use entity_query::core::database::{Executor, Statement};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db = PooledSqliteDatabase::with_config(PoolConfig::new("trips.db").with_max_size(4)).await?;
///     db.execute_batch("CREATE TABLE IF NOT EXISTS Drivers (Id INTEGER PRIMARY KEY, Name TEXT)").await?;
///
///     let insert = Statement::new("INSERT INTO [Drivers] ([Name]) VALUES (@p0)").bind("Ana");
///     db.execute(&insert, &CancellationToken::new()).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct PooledSqliteDatabase {
    pool: Pool,
    config: PoolConfig,
}

impl PooledSqliteDatabase {
    /// Create a pooled database with default configuration
    ///
    /// # Errors
    ///
    /// Returns error if pool creation or initialization fails
    pub async fn new(connection_string: impl Into<String>) -> Result<Self> {
        Self::with_config(PoolConfig::new(connection_string)).await
    }

    /// Create a pooled database with custom configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the first connection
    /// cannot be opened and initialized
    pub async fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut pool_config = Config::new(config.connection_string.clone());
        let mut limits = deadpool_sqlite::PoolConfig::new(config.max_size);
        limits.timeouts.wait = Some(config.timeout);
        limits.timeouts.create = Some(config.timeout);
        pool_config.pool = Some(limits);

        let pool = pool_config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| DatabaseError::configuration(format!("Failed to create pool: {}", e)))?;

        let db = Self { pool, config };
        let lease = acquire(&db.pool, &CancellationToken::new()).await?;
        run(
            &lease,
            db.config.settings(),
            Some(db.config.operation_timeout),
            &CancellationToken::new(),
            |conn| {
                // PRAGMA journal_mode returns a value, so it needs query_row
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
                    .map_err(classify_sqlite)
            },
        )
        .await?;
        log::debug!(
            "sqlite pool ready: {} (max {} connections)",
            db.config.connection_string,
            db.config.max_size
        );
        Ok(db)
    }

    /// Run several `;`-separated statements without parameters
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        let cancel = CancellationToken::new();
        let lease = acquire(&self.pool, &cancel).await?;
        run(
            &lease,
            self.config.settings(),
            Some(self.config.operation_timeout),
            &cancel,
            move |conn| conn.execute_batch(&sql).map_err(classify_sqlite),
        )
        .await
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }
}

impl std::fmt::Debug for PooledSqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSqliteDatabase")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl Executor for PooledSqliteDatabase {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
        let lease = acquire(&self.pool, cancel).await?;
        let statement = statement.clone();
        let token = cancel.clone();
        run(
            &lease,
            self.config.settings(),
            Some(self.config.operation_timeout),
            cancel,
            move |conn| run_execute(conn, &statement, &token),
        )
        .await
    }

    async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult> {
        let lease = acquire(&self.pool, cancel).await?;
        let statement = statement.clone();
        let token = cancel.clone();
        run(
            &lease,
            self.config.settings(),
            Some(self.config.operation_timeout),
            cancel,
            move |conn| read_all(conn, &statement, &token),
        )
        .await
    }

    fn query_stream(&self, statement: Statement, cancel: CancellationToken) -> RowStream {
        let pool = self.pool.clone();
        let token = cancel.clone();
        let lease = async move { acquire(&pool, &token).await.map(Arc::new) };
        spawn_reader(
            lease,
            self.config.settings(),
            self.config.stream_buffer,
            statement,
            cancel,
        )
    }
}

#[async_trait]
impl Transactional for PooledSqliteDatabase {
    type Transaction = PooledTransaction;

    async fn begin(&self) -> Result<PooledTransaction> {
        PooledTransaction::begin(self).await
    }
}

/// Transaction bound to one pooled connection
///
/// Every statement runs on the connection acquired at `begin`. If the transaction
/// is dropped without being committed or rolled back, a rollback is issued before
/// the connection goes back to the pool.
pub struct PooledTransaction {
    lease: Option<Arc<Lease>>,
    committed: AtomicBool,
    rolled_back: AtomicBool,
    settings: ConnectionSettings,
    operation_timeout: Duration,
}

impl PooledTransaction {
    /// Begin a new transaction
    ///
    /// Acquires a connection from the pool and begins a transaction on it.
    /// The connection is held until the transaction is committed, rolled back, or dropped.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Pool cannot provide a connection
    /// - BEGIN TRANSACTION fails
    pub async fn begin(db: &PooledSqliteDatabase) -> Result<Self> {
        let cancel = CancellationToken::new();
        let lease = acquire(&db.pool, &cancel).await?;
        let settings = db.config.settings();
        let operation_timeout = db.config.operation_timeout;

        run(&lease, settings, Some(operation_timeout), &cancel, |conn| {
            conn.execute_batch("BEGIN TRANSACTION").map_err(classify_sqlite)
        })
        .await?;

        Ok(Self {
            lease: Some(Arc::new(lease)),
            committed: AtomicBool::new(false),
            rolled_back: AtomicBool::new(false),
            settings,
            operation_timeout,
        })
    }

    fn lease(&self) -> Result<&Arc<Lease>> {
        self.lease
            .as_ref()
            .ok_or_else(|| DatabaseError::transaction("Transaction already finalized"))
    }

    async fn finish(mut self, commit: bool) -> Result<()> {
        if self.committed.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction("Transaction already committed"));
        }
        if self.rolled_back.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction("Transaction already rolled back"));
        }
        let lease = self
            .lease
            .take()
            .ok_or_else(|| DatabaseError::transaction("Transaction connection missing"))?;

        // Finished even if the statement below fails.
        if commit {
            self.committed.store(true, Ordering::Release);
        } else {
            self.rolled_back.store(true, Ordering::Release);
        }
        let sql = if commit { "COMMIT" } else { "ROLLBACK" };

        run(
            &lease,
            self.settings,
            Some(self.operation_timeout),
            &CancellationToken::new(),
            move |conn| conn.execute_batch(sql).map_err(classify_sqlite),
        )
        .await
    }
}

#[async_trait]
impl Executor for PooledTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    async fn execute(&self, statement: &Statement, cancel: &CancellationToken) -> Result<u64> {
        let lease = self.lease()?;
        let statement = statement.clone();
        let token = cancel.clone();
        run(
            lease,
            self.settings,
            Some(self.operation_timeout),
            cancel,
            move |conn| run_execute(conn, &statement, &token),
        )
        .await
    }

    async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<DatabaseResult> {
        let lease = self.lease()?;
        let statement = statement.clone();
        let token = cancel.clone();
        run(
            lease,
            self.settings,
            Some(self.operation_timeout),
            cancel,
            move |conn| read_all(conn, &statement, &token),
        )
        .await
    }

    /// The rows are read to the end before the first one is yielded, which leaves
    /// the transaction's connection free for statements issued while the stream
    /// is consumed.
    fn query_stream(&self, statement: Statement, cancel: CancellationToken) -> RowStream {
        let lease = self.lease().map(Arc::clone);
        let settings = self.settings;
        let timeout = self.operation_timeout;
        async move {
            let lease = lease?;
            let token = cancel.clone();
            run(&lease, settings, Some(timeout), &cancel, move |conn| {
                read_all(conn, &statement, &token)
            })
            .await
        }
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<_, DatabaseError>)))
        .try_flatten_stream()
        .boxed()
    }
}

#[async_trait]
impl Transaction for PooledTransaction {
    async fn commit(self) -> Result<()> {
        self.finish(true).await
    }

    async fn rollback(self) -> Result<()> {
        self.finish(false).await
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if self.committed.load(Ordering::Acquire) || self.rolled_back.load(Ordering::Acquire) {
            return;
        }
        log::warn!("PooledTransaction dropped without commit or rollback; rolling back");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let outcome = lease
                        .object
                        .interact(|conn| conn.execute_batch("ROLLBACK"))
                        .await;
                    if !matches!(outcome, Ok(Ok(()))) {
                        log::error!("rollback of dropped transaction failed");
                    }
                });
            }
            Err(_) => log::error!("no runtime to roll back a dropped transaction"),
        }
    }
}
