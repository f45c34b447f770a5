//! Embedded database layer for the Hearth service.
//!
//! Provides the embedded server supervisor and the bounded SQLite connection
//! pool (via `r2d2`) that targets it. The supervisor owns two handles: the
//! primary engine handle (the database itself, opened in WAL mode and held
//! open for the lifetime of the server) and an auxiliary HTTP management
//! endpoint for browsing server status.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the embedded engine runs inside the process,
//!   no external database daemon required. WAL allows concurrent readers with
//!   a single writer.
//! - **`r2d2` connection pool**: bounded connection reuse with leases that
//!   release on drop, so a borrowed connection returns to the pool on every
//!   exit path.
//! - **Strict start/stop ordering**: the primary engine starts before the
//!   auxiliary endpoint and stops before it too; a server that never fully
//!   started has nothing to stop.

mod pool;
mod server;

pub use pool::{Credentials, DbConnection, DbPool, PoolError, PoolPolicy, SqlPool};
pub use server::{EmbeddedServer, ServerError, ServerSettings, ServerState};
