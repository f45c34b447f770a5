//! Lifecycle orchestration for the Hearth service.
//!
//! Drives the fixed startup sequence — load catalog, start the embedded
//! server, bind the connection pool — and then the demonstration sequence:
//! create the table, seed it only when the create succeeded, select and
//! report unconditionally. Startup failures are fatal; statement failures
//! are logged and the flow continues.

pub mod config;

use hearth_catalog::{Catalog, CatalogError};
use hearth_db::{EmbeddedServer, PoolError, ServerError, SqlPool};
use hearth_exec::Person;
use std::sync::Arc;
use thiserror::Error;

pub use config::{load_config, Config};

/// Errors that abort startup. Each maps to a non-zero process exit.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The SQL command catalog could not be loaded.
    #[error("unable to load SQL commands: {0}")]
    Catalog(#[from] CatalogError),

    /// The embedded database server failed to start.
    #[error("unable to start embedded database server: {0}")]
    Server(#[from] ServerError),

    /// Connection pooling could not be initialized.
    #[error("unable to initialize connection pooling: {0}")]
    Pool(#[from] PoolError),
}

/// The catalog keys the demonstration sequence runs, in order.
#[derive(Debug, Clone)]
pub struct CommandKeys {
    /// Create-table command key.
    pub create: String,

    /// Ordered insert command keys.
    pub insert: Vec<String>,

    /// Select command key.
    pub select: String,
}

impl CommandKeys {
    /// Builds the key set from the catalog config section.
    pub fn from_config(catalog: &config::CatalogConfig) -> Self {
        Self {
            create: catalog.create_key.clone(),
            insert: catalog.insert_keys.clone(),
            select: catalog.select_key.clone(),
        }
    }
}

/// Outcome of one demonstration sequence run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Whether the create-table step created the table on this run.
    pub table_created: bool,

    /// Total rows affected by the insert sequence (0 when skipped).
    pub rows_inserted: usize,

    /// Rows returned by the select step.
    pub rows: Vec<Person>,
}

/// Brings up everything the sequence depends on, in dependency order:
/// catalog, then server, then pool.
///
/// The pool is only constructed against a running server; if it still fails,
/// the server is stopped again so no live handles outlast a failed startup.
///
/// # Errors
///
/// Returns `StartupError` on the first step that fails. The caller is
/// expected to exit non-zero.
pub fn bootstrap(
    config: &Config,
) -> Result<(Catalog, Arc<EmbeddedServer>, SqlPool), StartupError> {
    let catalog = Catalog::load(&config.catalog.path)?;

    let server = Arc::new(EmbeddedServer::new(config.server_settings()));
    server.start()?;

    let pool = match SqlPool::connect(&server, &config.credentials(), &config.pool_policy()) {
        Ok(pool) => pool,
        Err(err) => {
            server.stop();
            return Err(StartupError::Pool(err));
        }
    };

    Ok((catalog, server, pool))
}

/// Runs the demonstration sequence against a live pool.
///
/// Create gates the insert sequence: seeding only happens when the table was
/// created on this run. The select step runs unconditionally. Statement
/// failures are logged and the flow continues — this is a best-effort
/// sequence, not a transactional pipeline.
pub fn run_sequence(pool: &SqlPool, catalog: &Catalog, keys: &CommandKeys) -> RunReport {
    let table_created = match hearth_exec::create_table(pool, catalog, &keys.create) {
        Ok(created) => created,
        Err(err) => {
            tracing::error!(error = %err, "error occurred while creating table");
            false
        }
    };

    let rows_inserted = if table_created {
        match hearth_exec::insert_rows(pool, catalog, &keys.insert) {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "error occurred while inserting data");
                0
            }
        }
    } else {
        tracing::info!("table was not created on this run, skipping seed data");
        0
    };

    let rows = match hearth_exec::select_rows(pool, catalog, &keys.select) {
        Ok(rows) => rows,
        Err(err) => {
            tracing::error!(error = %err, "error occurred while retrieving data");
            Vec::new()
        }
    };

    RunReport {
        table_created,
        rows_inserted,
        rows,
    }
}
