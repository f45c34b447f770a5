//! Service configuration loading from file and environment variables.

use hearth_db::{Credentials, PoolPolicy, ServerSettings};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Auxiliary management endpoint settings.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Embedded database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Command catalog settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bind configuration for the management endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on. Port 0 asks the OS for a free port.
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

/// Embedded database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for engine connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Username presented by the pool.
    #[serde(default = "default_username")]
    pub username: String,

    /// Password presented by the pool.
    #[serde(default)]
    pub password: String,
}

/// Connection pool configuration. Timeouts are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of live connections.
    #[serde(default = "default_pool_max_size")]
    pub max_size: u32,

    /// Floor on pre-warmed idle connections.
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,

    /// Maximum wait to obtain a connection.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Upper bound on a connection's unused age.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Upper bound on a connection's total age.
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,

    /// Whether borrowed connections commit each statement implicitly.
    #[serde(default = "default_true")]
    pub auto_commit: bool,

    /// Prepared-statement cache capacity per connection.
    #[serde(default = "default_statement_cache_size")]
    pub statement_cache_size: usize,
}

/// Command catalog configuration: where the commands live and which keys the
/// demonstration sequence runs.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Path to the TOML command resource.
    #[serde(default = "default_catalog_path")]
    pub path: String,

    /// Key of the create-table command.
    #[serde(default = "default_create_key")]
    pub create_key: String,

    /// Ordered keys of the insert sequence.
    #[serde(default = "default_insert_keys")]
    pub insert_keys: Vec<String>,

    /// Key of the select command.
    #[serde(default = "default_select_key")]
    pub select_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "hearth_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_admin_port() -> u16 {
    8082
}

fn default_db_path() -> String {
    "hearth.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_username() -> String {
    "sa".to_string()
}

fn default_pool_max_size() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

fn default_max_lifetime_ms() -> u64 {
    1_800_000
}

fn default_true() -> bool {
    true
}

fn default_statement_cache_size() -> usize {
    500
}

fn default_catalog_path() -> String {
    "commands.toml".to_string()
}

fn default_create_key() -> String {
    "create.table.001".to_string()
}

fn default_insert_keys() -> Vec<String> {
    (1..=5).map(|n| format!("insert.table.{n:03}")).collect()
}

fn default_select_key() -> String {
    "select.table.001".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_admin_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            username: default_username(),
            password: String::new(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            min_idle: default_min_idle(),
            connection_timeout_ms: default_connection_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
            auto_commit: true,
            statement_cache_size: default_statement_cache_size(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
            create_key: default_create_key(),
            insert_keys: default_insert_keys(),
            select_key: default_select_key(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Supervisor settings derived from the database and admin sections.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            database_path: self.database.path.clone(),
            admin_addr: SocketAddr::new(self.admin.host, self.admin.port),
            busy_timeout_ms: self.database.busy_timeout_ms,
        }
    }

    /// Pool policy derived from the pool section.
    pub fn pool_policy(&self) -> PoolPolicy {
        PoolPolicy {
            max_size: self.pool.max_size,
            min_idle: self.pool.min_idle,
            connection_timeout: Duration::from_millis(self.pool.connection_timeout_ms),
            idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
            max_lifetime: Duration::from_millis(self.pool.max_lifetime_ms),
            auto_commit: self.pool.auto_commit,
            statement_cache_size: self.pool.statement_cache_size,
        }
    }

    /// Pool credentials derived from the database section.
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.database.username.clone(),
            password: self.database.password.clone(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `HEARTH_ADMIN_PORT` overrides `admin.port`
/// - `HEARTH_DB_PATH` overrides `database.path`
/// - `HEARTH_CATALOG_PATH` overrides `catalog.path`
/// - `HEARTH_LOG_LEVEL` overrides `logging.level`
/// - `HEARTH_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(port) = std::env::var("HEARTH_ADMIN_PORT") {
        if let Ok(parsed) = port.parse() {
            config.admin.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("HEARTH_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(catalog_path) = std::env::var("HEARTH_CATALOG_PATH") {
        config.catalog.path = catalog_path;
    }
    if let Ok(level) = std::env::var("HEARTH_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("HEARTH_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_the_demonstration_sequence() {
        let config = Config::default();
        assert_eq!(config.catalog.create_key, "create.table.001");
        assert_eq!(config.catalog.insert_keys.len(), 5);
        assert_eq!(config.catalog.insert_keys[0], "insert.table.001");
        assert_eq!(config.catalog.insert_keys[4], "insert.table.005");
        assert_eq!(config.catalog.select_key, "select.table.001");
        assert_eq!(config.database.username, "sa");
        assert!(config.database.password.is_empty());
        assert!(config.pool.auto_commit);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            load_config(Some("/nonexistent/hearth.toml")).expect("missing file should fall back");
        assert_eq!(config.database.path, "hearth.db");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).expect("should create config");
        writeln!(
            file,
            "[database]\npath = \"other.db\"\n\n[pool]\nmax_size = 1\nauto_commit = false"
        )
        .expect("should write config");

        let config =
            load_config(path.to_str()).expect("config should load");
        assert_eq!(config.database.path, "other.db");
        assert_eq!(config.pool.max_size, 1);
        assert!(!config.pool.auto_commit);
        // Untouched sections keep their defaults.
        assert_eq!(config.admin.port, 8082);
    }

    #[test]
    fn derived_settings_carry_config_values() {
        let config = Config::default();
        let settings = config.server_settings();
        assert_eq!(settings.database_path, "hearth.db");
        assert_eq!(settings.busy_timeout_ms, 5_000);

        let policy = config.pool_policy();
        assert_eq!(policy.connection_timeout, Duration::from_secs(10));
        assert_eq!(policy.max_lifetime, Duration::from_secs(1_800));
    }
}
