//! Hearth service binary — starts the embedded database server, runs the
//! demonstration sequence against the connection pool, and shuts the server
//! down on completion or on SIGTERM/SIGINT.

use hearth_server::{bootstrap, run_sequence, CommandKeys};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("HEARTH_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = hearth_server::load_config(selected_config_path)
        .expect("failed to load configuration — the service cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Catalog, server, pool — in dependency order, fatal on failure.
    let (catalog, server, pool) = match bootstrap(&config) {
        Ok(parts) => parts,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };

    // Termination handler: stops the server even if the sequence never
    // finishes. Runs at most once; stop() is idempotent against the normal
    // completion path below.
    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_server.stop();
        std::process::exit(0);
    });

    let keys = CommandKeys::from_config(&config.catalog);
    let report = run_sequence(&pool, &catalog, &keys);
    tracing::info!(
        table_created = report.table_created,
        rows_inserted = report.rows_inserted,
        rows_selected = report.rows.len(),
        "demonstration sequence finished"
    );

    pool.close();
    server.stop();
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
