//! Embedded database server supervisor.
//!
//! The server owns two handles: the primary engine handle (an anchor
//! connection that opens the database read-write in WAL mode and keeps it
//! open) and an auxiliary management endpoint (a small axum router serving
//! `/status`). Startup is all-or-nothing: if either handle fails to come up,
//! no partial server state survives. Shutdown is idempotent, stops the
//! primary before the auxiliary, and never propagates an error — it runs
//! from termination paths where no caller can react.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::oneshot;

/// Lifecycle state of the embedded server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No handles are live.
    Stopped,
    /// `start()` is bringing the handles up.
    Starting,
    /// Both handles are live and accepting work.
    Running,
    /// `stop()` is tearing the handles down.
    Stopping,
}

/// Bind and engine configuration for the embedded server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Address the auxiliary management endpoint binds to. Port 0 asks the
    /// OS for a free port.
    pub admin_addr: SocketAddr,

    /// Busy timeout applied to engine connections, in milliseconds.
    pub busy_timeout_ms: u64,
}

/// Errors that can occur when starting the embedded server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The primary engine handle could not be opened.
    #[error("failed to open embedded database engine: {0}")]
    Engine(#[source] rusqlite::Error),

    /// The engine refused WAL journal mode.
    #[error("engine refused WAL journal mode, got '{0}'")]
    JournalMode(String),

    /// The auxiliary management endpoint could not bind its address.
    #[error("failed to bind management endpoint: {0}")]
    AdminBind(#[source] std::io::Error),

    /// The auxiliary management endpoint thread or runtime failed to start.
    #[error("failed to start management endpoint: {0}")]
    AdminSpawn(#[source] std::io::Error),
}

/// Primary handle: the database engine, held open by an anchor connection.
#[derive(Debug)]
struct EngineHandle {
    conn: Connection,
}

impl EngineHandle {
    fn open(settings: &ServerSettings) -> Result<Self, ServerError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&settings.database_path, flags)
            .map_err(ServerError::Engine)?;

        // Set WAL mode and verify it was accepted. In-memory databases
        // report "memory" which is expected and acceptable.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(ServerError::Engine)?;
        if journal_mode != "wal" && journal_mode != "memory" {
            return Err(ServerError::JournalMode(journal_mode));
        }

        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};",
            settings.busy_timeout_ms
        ))
        .map_err(ServerError::Engine)?;

        Ok(Self { conn })
    }

    fn close(self) {
        if let Err((_conn, err)) = self.conn.close() {
            tracing::warn!(error = %err, "engine connection did not close cleanly");
        }
    }
}

/// Shared state for the management endpoint handlers.
#[derive(Clone)]
struct AdminState {
    database: String,
    version: &'static str,
}

/// Status handler for the management endpoint.
///
/// Returns `200 OK` with engine and database info, so an operator can verify
/// the server is up without touching the data endpoint.
async fn status(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "engine": "sqlite",
        "database": state.database,
        "version": state.version,
    }))
}

fn admin_router(state: AdminState) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}

/// Auxiliary handle: the management endpoint thread and its shutdown channel.
#[derive(Debug)]
struct AdminHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AdminHandle {
    fn bind(settings: &ServerSettings) -> Result<Self, ServerError> {
        // Bind synchronously so a failure surfaces in start(); the listener
        // is handed to the endpoint runtime afterwards.
        let listener = std::net::TcpListener::bind(settings.admin_addr)
            .map_err(ServerError::AdminBind)?;
        listener
            .set_nonblocking(true)
            .map_err(ServerError::AdminBind)?;
        let local_addr = listener.local_addr().map_err(ServerError::AdminBind)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ServerError::AdminSpawn)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = admin_router(AdminState {
            database: settings.database_path.clone(),
            version: env!("CARGO_PKG_VERSION"),
        });

        let thread = std::thread::Builder::new()
            .name("hearth-admin".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            tracing::error!(error = %err, "failed to adopt management listener");
                            return;
                        }
                    };

                    let serve = axum::serve(listener, router).with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    });
                    if let Err(err) = serve.await {
                        tracing::error!(error = %err, "management endpoint terminated with an error");
                    }
                });
            })
            .map_err(ServerError::AdminSpawn)?;

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("management endpoint thread panicked during shutdown");
            }
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: ServerState,
    engine: Option<EngineHandle>,
    admin: Option<AdminHandle>,
}

/// Supervisor for the embedded database server.
///
/// One instance per process owns the primary engine handle and the auxiliary
/// management endpoint. All methods take `&self`; the handle is safe to share
/// behind an `Arc` with a termination watcher.
#[derive(Debug)]
pub struct EmbeddedServer {
    settings: ServerSettings,
    inner: Mutex<Inner>,
}

impl EmbeddedServer {
    /// Creates a supervisor in the `Stopped` state. Nothing is opened or
    /// bound until `start()`.
    pub fn new(settings: ServerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: ServerState::Stopped,
                engine: None,
                admin: None,
            }),
        }
    }

    /// Starts the primary engine, then the auxiliary management endpoint.
    ///
    /// Startup is all-or-nothing: if the engine fails, the endpoint is never
    /// attempted; if the endpoint fails, the engine is closed again. Either
    /// way the server is left `Stopped` with no live handles. Calling
    /// `start()` on a running server is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if either handle fails to come up.
    pub fn start(&self) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == ServerState::Running {
            tracing::debug!("embedded server already running");
            return Ok(());
        }

        inner.state = ServerState::Starting;

        let engine = match EngineHandle::open(&self.settings) {
            Ok(engine) => engine,
            Err(err) => {
                inner.state = ServerState::Stopped;
                return Err(err);
            }
        };

        let admin = match AdminHandle::bind(&self.settings) {
            Ok(admin) => admin,
            Err(err) => {
                engine.close();
                inner.state = ServerState::Stopped;
                return Err(err);
            }
        };

        tracing::info!(
            database = %self.settings.database_path,
            admin = %admin.local_addr,
            "embedded database server is now accepting connections"
        );

        inner.engine = Some(engine);
        inner.admin = Some(admin);
        inner.state = ServerState::Running;
        Ok(())
    }

    /// Stops the server, primary engine first, then the auxiliary endpoint.
    ///
    /// Idempotent and infallible: a server that never fully started (either
    /// handle missing) returns immediately, repeated calls are no-ops, and
    /// teardown errors are logged rather than propagated. Safe to call from
    /// a termination handler.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.engine.is_none() || inner.admin.is_none() {
            tracing::debug!("embedded server was never fully started, nothing to stop");
            return;
        }

        inner.state = ServerState::Stopping;
        if let Some(engine) = inner.engine.take() {
            engine.close();
        }
        if let Some(admin) = inner.admin.take() {
            admin.stop();
        }
        inner.state = ServerState::Stopped;

        tracing::info!("embedded database server has been shut down");
    }

    /// Whether the server is currently `Running`.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Protocol-tagged locator for the primary data endpoint. Credentials are
    /// never part of the connection string.
    pub fn connection_string(&self) -> String {
        format!("sqlite:{}", self.settings.database_path)
    }

    /// Path of the database file the engine serves.
    pub fn database_path(&self) -> &str {
        &self.settings.database_path
    }

    /// Engine busy timeout, in milliseconds.
    pub fn busy_timeout_ms(&self) -> u64 {
        self.settings.busy_timeout_ms
    }

    /// Bound address of the management endpoint while the server is running.
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .admin
            .as_ref()
            .map(|admin| admin.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn settings(dir: &tempfile::TempDir) -> ServerSettings {
        ServerSettings {
            database_path: dir
                .path()
                .join("server.db")
                .to_string_lossy()
                .into_owned(),
            admin_addr: "127.0.0.1:0".parse().expect("should parse bind addr"),
            busy_timeout_ms: 2_500,
        }
    }

    #[test]
    fn stop_before_start_is_a_noop() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let server = EmbeddedServer::new(settings(&dir));

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn start_stop_lifecycle() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let server = EmbeddedServer::new(settings(&dir));

        server.start().expect("server should start");
        assert!(server.is_running());
        assert!(server.admin_addr().is_some(), "admin endpoint should be bound");
        assert_eq!(
            server.connection_string(),
            format!("sqlite:{}", server.database_path())
        );

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.admin_addr().is_none());

        // Second stop sees no live handles and returns quietly.
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn start_when_running_is_a_noop() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let server = EmbeddedServer::new(settings(&dir));

        server.start().expect("server should start");
        let addr = server.admin_addr();
        server.start().expect("second start should be a no-op");
        assert_eq!(server.admin_addr(), addr, "handles should be untouched");

        server.stop();
    }

    #[test]
    fn engine_failure_leaves_no_partial_state() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        // A directory is not a valid database file, so the engine fails.
        let mut settings = settings(&dir);
        settings.database_path = dir.path().to_string_lossy().into_owned();

        let server = EmbeddedServer::new(settings);
        let err = server.start().expect_err("engine open should fail");
        assert!(matches!(err, ServerError::Engine(_)));
        assert_eq!(server.state(), ServerState::Stopped);

        // Nothing was started, so there is nothing to stop.
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn admin_bind_failure_unwinds_the_engine() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        // Occupy a port so the management endpoint cannot bind it.
        let blocker =
            std::net::TcpListener::bind("127.0.0.1:0").expect("should bind blocker port");
        let taken = blocker.local_addr().expect("should read blocker addr");

        let mut settings = settings(&dir);
        settings.admin_addr = taken;

        let server = EmbeddedServer::new(settings);
        let err = server.start().expect_err("admin bind should fail");
        assert!(matches!(err, ServerError::AdminBind(_)));
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn status_endpoint_reports_engine_info() {
        let app = admin_router(AdminState {
            database: "demo.db".to_string(),
            version: "0.1.0",
        });

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["engine"], "sqlite");
        assert_eq!(json["database"], "demo.db");
    }
}
