//! Statement execution against the pooled embedded database.
//!
//! Every operation borrows a connection from the pool, runs one or more
//! named commands from the catalog, and releases the connection on every
//! exit path (the lease returns on drop). A whole insert sequence shares a
//! single borrowed connection — it is one unit of work, released once at the
//! end, not once per statement.

use hearth_catalog::Catalog;
use hearth_db::{PoolError, SqlPool};
use thiserror::Error;

/// Errors that can occur while executing a named command.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The catalog holds no command under the requested key.
    #[error("no command named '{0}' in the catalog")]
    UnknownCommand(String),

    /// A connection could not be borrowed from the pool.
    #[error("failed to borrow a pooled connection: {0}")]
    Pool(#[from] PoolError),

    /// The statement itself failed.
    #[error("statement execution failed: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// One row of the demonstration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    /// Row identifier assigned by the engine.
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
}

fn command<'a>(catalog: &'a Catalog, key: &str) -> Result<&'a str, ExecError> {
    catalog
        .get(key)
        .ok_or_else(|| ExecError::UnknownCommand(key.to_string()))
}

/// Runs the named create-table command.
///
/// Returns `Ok(true)` when the table was created and `Ok(false)` when the
/// engine reports the object already exists — an expected, recoverable
/// outcome the caller uses to decide whether to seed data. Any other SQL
/// failure is a real error, not an existence signal.
pub fn create_table(pool: &SqlPool, catalog: &Catalog, key: &str) -> Result<bool, ExecError> {
    let sql = command(catalog, key)?;
    let conn = pool.borrow()?;
    match conn.execute(sql, []) {
        Ok(rows) => {
            tracing::debug!(command = key, rows, "statement returned");
            Ok(true)
        }
        Err(err) if is_already_exists(&err) => {
            tracing::warn!(command = key, "target table already exists, nothing to create");
            Ok(false)
        }
        Err(err) => Err(ExecError::Sql(err)),
    }
}

// The engine reports a duplicate object either at prepare time
// (SqlInputError) or at execution time (SqliteFailure).
fn is_already_exists(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message.contains("already exists"),
        rusqlite::Error::SqlInputError { msg, .. } => msg.contains("already exists"),
        _ => false,
    }
}

/// Runs an ordered sequence of insert commands on one borrowed connection.
///
/// The connection is released once, after the last statement. When the pool
/// is configured without auto-commit, the sequence runs inside a single
/// explicit transaction committed at the end.
///
/// # Errors
///
/// Returns `ExecError` on the first missing key or failed statement; the
/// connection (and any open transaction) is released regardless.
pub fn insert_rows(pool: &SqlPool, catalog: &Catalog, keys: &[String]) -> Result<usize, ExecError> {
    let mut conn = pool.borrow()?;
    let mut total = 0;

    if pool.auto_commit() {
        for key in keys {
            let rows = conn.execute(command(catalog, key)?, [])?;
            tracing::debug!(command = %key, rows, "statement returned");
            total += rows;
        }
    } else {
        let tx = conn.transaction()?;
        for key in keys {
            let rows = tx.execute(command(catalog, key)?, [])?;
            tracing::debug!(command = %key, rows, "statement returned");
            total += rows;
        }
        tx.commit()?;
    }

    Ok(total)
}

/// Runs the named select command and drains its row cursor.
///
/// The cursor is lazy and bound to the borrowed connection; it is fully
/// exhausted and the statement dropped before the connection is released.
/// Each row is logged field by field.
pub fn select_rows(pool: &SqlPool, catalog: &Catalog, key: &str) -> Result<Vec<Person>, ExecError> {
    let sql = command(catalog, key)?;
    let conn = pool.borrow()?;
    let mut stmt = conn.prepare(sql)?;
    let mapped = stmt.query_map([], |row| {
        Ok(Person {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            age: row.get(3)?,
        })
    })?;

    let mut people = Vec::new();
    for person in mapped {
        let person = person?;
        tracing::info!(
            id = person.id,
            first_name = %person.first_name,
            last_name = %person.last_name,
            age = person.age,
            "selected row"
        );
        people.push(person);
    }
    Ok(people)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_db::{Credentials, EmbeddedServer, PoolPolicy, ServerSettings};

    const TEST_COMMANDS: &str = r#"
"create.table.001" = "CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, first_name TEXT NOT NULL, last_name TEXT NOT NULL, age INTEGER NOT NULL)"
"insert.table.001" = "INSERT INTO people (first_name, last_name, age) VALUES ('Ada', 'Lovelace', 36)"
"insert.table.002" = "INSERT INTO people (first_name, last_name, age) VALUES ('Grace', 'Hopper', 85)"
"select.table.001" = "SELECT id, first_name, last_name, age FROM people ORDER BY id"
"broken.create.001" = "CREATE TABLE people ("
"#;

    fn fixture(dir: &tempfile::TempDir) -> (EmbeddedServer, SqlPool, Catalog) {
        let server = EmbeddedServer::new(ServerSettings {
            database_path: dir.path().join("exec.db").to_string_lossy().into_owned(),
            admin_addr: "127.0.0.1:0".parse().expect("should parse bind addr"),
            busy_timeout_ms: 2_500,
        });
        server.start().expect("server should start");

        let pool = SqlPool::connect(&server, &Credentials::default(), &PoolPolicy::default())
            .expect("pool should connect");
        let catalog = Catalog::parse(TEST_COMMANDS, "<test>").expect("commands should parse");
        (server, pool, catalog)
    }

    fn insert_keys() -> Vec<String> {
        vec!["insert.table.001".to_string(), "insert.table.002".to_string()]
    }

    #[test]
    fn create_twice_reports_true_then_false() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (server, pool, catalog) = fixture(&dir);

        let first = create_table(&pool, &catalog, "create.table.001")
            .expect("first create should succeed");
        assert!(first, "fresh database should create the table");

        let second = create_table(&pool, &catalog, "create.table.001")
            .expect("second create should be recoverable");
        assert!(!second, "existing table should report false");

        pool.close();
        server.stop();
    }

    #[test]
    fn genuine_sql_failure_is_not_masked_as_existence() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (server, pool, catalog) = fixture(&dir);

        let err = create_table(&pool, &catalog, "broken.create.001")
            .expect_err("malformed SQL should be a real error");
        assert!(matches!(err, ExecError::Sql(_)));

        pool.close();
        server.stop();
    }

    #[test]
    fn insert_sequence_reports_total_rows() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (server, pool, catalog) = fixture(&dir);

        assert!(create_table(&pool, &catalog, "create.table.001").expect("create should succeed"));
        let total =
            insert_rows(&pool, &catalog, &insert_keys()).expect("inserts should succeed");
        assert_eq!(total, 2);

        pool.close();
        server.stop();
    }

    #[test]
    fn select_returns_inserted_rows_field_for_field() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (server, pool, catalog) = fixture(&dir);

        assert!(create_table(&pool, &catalog, "create.table.001").expect("create should succeed"));
        insert_rows(&pool, &catalog, &insert_keys()).expect("inserts should succeed");

        let rows = select_rows(&pool, &catalog, "select.table.001").expect("select should run");
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            Person {
                id: 1,
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                age: 36,
            }
        );
        assert_eq!(
            rows[1],
            Person {
                id: 2,
                first_name: "Grace".to_string(),
                last_name: "Hopper".to_string(),
                age: 85,
            }
        );

        pool.close();
        server.stop();
    }

    #[test]
    fn missing_catalog_key_is_a_statement_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (server, pool, catalog) = fixture(&dir);

        let err = create_table(&pool, &catalog, "create.table.999")
            .expect_err("absent key should fail the run, not crash");
        assert!(matches!(err, ExecError::UnknownCommand(_)));

        let err = insert_rows(&pool, &catalog, &["insert.table.999".to_string()])
            .expect_err("absent insert key should fail");
        assert!(matches!(err, ExecError::UnknownCommand(_)));

        pool.close();
        server.stop();
    }

    #[test]
    fn insert_sequence_uses_one_transaction_without_auto_commit() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let server = EmbeddedServer::new(ServerSettings {
            database_path: dir.path().join("tx.db").to_string_lossy().into_owned(),
            admin_addr: "127.0.0.1:0".parse().expect("should parse bind addr"),
            busy_timeout_ms: 2_500,
        });
        server.start().expect("server should start");

        let policy = PoolPolicy {
            auto_commit: false,
            ..PoolPolicy::default()
        };
        let pool = SqlPool::connect(&server, &Credentials::default(), &policy)
            .expect("pool should connect");
        let catalog = Catalog::parse(TEST_COMMANDS, "<test>").expect("commands should parse");

        assert!(create_table(&pool, &catalog, "create.table.001").expect("create should succeed"));
        let total =
            insert_rows(&pool, &catalog, &insert_keys()).expect("inserts should commit");
        assert_eq!(total, 2);

        let rows = select_rows(&pool, &catalog, "select.table.001").expect("select should run");
        assert_eq!(rows.len(), 2, "committed rows should be visible");

        pool.close();
        server.stop();
    }
}
