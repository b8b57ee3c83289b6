//! Execution backends
//!
//! SQLite is the executing backend: a caller-owned connection for synchronous use
//! and a deadpool-managed pool for async use.

#[cfg(feature = "sqlite")]
pub mod pooled_sqlite;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use pooled_sqlite::{PoolConfig, PoolStats, PooledSqliteDatabase, PooledTransaction};
#[cfg(feature = "sqlite")]
pub use sqlite::{classify_sqlite, SqliteConnection};
