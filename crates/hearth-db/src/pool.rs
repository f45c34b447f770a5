//! Connection pool bound to a running embedded server.

use crate::server::EmbeddedServer;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A pooled connection lease. Returns to the pool when dropped, on every
/// exit path.
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Fixed credentials used uniformly for pool connections.
///
/// SQLite itself does not consume them; they are carried so the pool
/// constructor has the same shape against credentialed engines.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username presented when opening connections.
    pub username: String,

    /// Password presented when opening connections.
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "sa".to_string(),
            password: String::new(),
        }
    }
}

/// Sizing and lifetime policy for the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Maximum number of live connections.
    pub max_size: u32,

    /// Floor on pre-warmed idle connections.
    pub min_idle: u32,

    /// Maximum wait to obtain a connection before the borrow fails.
    pub connection_timeout: Duration,

    /// Upper bound on a connection's unused age before recycling.
    pub idle_timeout: Duration,

    /// Upper bound on a connection's total age before recycling.
    pub max_lifetime: Duration,

    /// Whether borrowed connections commit each statement implicitly. When
    /// off, multi-statement work runs inside one explicit transaction.
    pub auto_commit: bool,

    /// Prepared-statement cache capacity per connection. Performance knob
    /// only, no correctness impact.
    pub statement_cache_size: usize,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 1,
            connection_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(1_800),
            auto_commit: true,
            statement_cache_size: 500,
        }
    }
}

/// Errors that can occur when creating or borrowing from the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The target server is not in the `Running` state.
    #[error("cannot create a pool against a server that is not running")]
    ServerNotRunning,

    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    Init(#[source] r2d2::Error),

    /// No connection became available within the acquisition timeout.
    #[error("no connection became available before the acquisition timeout: {0}")]
    Exhausted(#[source] r2d2::Error),

    /// The pool has been closed; no further borrows are possible.
    #[error("connection pool is closed")]
    Closed,
}

/// A bounded pool of connections to the embedded server.
///
/// Borrow/return is thread-safe (an `r2d2` guarantee); the close flag lives
/// behind a mutex so a closed pool fails borrows fast instead of handing out
/// stale connections.
#[derive(Debug)]
pub struct SqlPool {
    inner: Mutex<Option<DbPool>>,
    auto_commit: bool,
}

impl SqlPool {
    /// Builds a pool bound to a **running** embedded server.
    ///
    /// Connections share the engine's pragma setup (WAL, foreign keys, busy
    /// timeout) and carry the policy's prepared-statement cache capacity.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ServerNotRunning` if the server has not reached
    /// the running state, or `PoolError::Init` if the pool cannot establish
    /// its initial connections.
    pub fn connect(
        server: &EmbeddedServer,
        credentials: &Credentials,
        policy: &PoolPolicy,
    ) -> Result<Self, PoolError> {
        if !server.is_running() {
            return Err(PoolError::ServerNotRunning);
        }

        tracing::debug!(
            user = %credentials.username,
            endpoint = %server.connection_string(),
            max_size = policy.max_size,
            "opening connection pool"
        );

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let statement_cache_size = policy.statement_cache_size;
        let busy_timeout_ms = server.busy_timeout_ms();
        let manager = SqliteConnectionManager::file(server.database_path())
            .with_flags(flags)
            .with_init(move |conn| {
                conn.set_prepared_statement_cache_capacity(statement_cache_size);

                // Same journal-mode check as the engine handle: in-memory
                // databases report "memory", anything else must be WAL.
                let journal_mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
                if journal_mode != "wal" && journal_mode != "memory" {
                    return Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                        Some(format!(
                            "failed to set WAL journal mode, got: {}",
                            journal_mode
                        )),
                    ));
                }
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = {};",
                    busy_timeout_ms
                ))
            });

        let pool = Pool::builder()
            .max_size(policy.max_size)
            .min_idle(Some(policy.min_idle))
            .connection_timeout(policy.connection_timeout)
            .idle_timeout(Some(policy.idle_timeout))
            .max_lifetime(Some(policy.max_lifetime))
            .build(manager)
            .map_err(PoolError::Init)?;

        Ok(Self {
            inner: Mutex::new(Some(pool)),
            auto_commit: policy.auto_commit,
        })
    }

    /// Borrows a connection for one unit of work.
    ///
    /// The lease is exclusive and returns to the pool when dropped. Blocks up
    /// to the policy's connection timeout when the pool is at capacity.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` after `close()`, or
    /// `PoolError::Exhausted` when no connection frees up in time.
    pub fn borrow(&self) -> Result<DbConnection, PoolError> {
        let pool = {
            let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            guard.as_ref().cloned().ok_or(PoolError::Closed)?
        };
        pool.get().map_err(PoolError::Exhausted)
    }

    /// Closes the pool. Idle connections are dropped and every later
    /// `borrow()` fails fast with `PoolError::Closed`.
    pub fn close(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::info!("connection pool closed");
        }
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Whether borrowed connections commit each statement implicitly.
    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }
}
