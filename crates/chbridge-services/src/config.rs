//! TOML configuration
//!
//! Sources are layered in order, later ones winning per key:
//! built-in defaults, `<config dir>/chbridge/config.toml`, an explicit file,
//! then `CHBRIDGE_*` environment variables for the connection defaults.

use std::path::{Path, PathBuf};

use chbridge_connection::PoolConfig;
use chbridge_core::{DEFAULT_CLICKHOUSE_PORT, DatabaseEndpoint};
use chbridge_interchange::{
    DEFAULT_BATCH_SIZE, DEFAULT_EVENT_CAPACITY, DEFAULT_PREVIEW_ROWS, DEFAULT_SAMPLE_SIZE,
    ExportOptions, IfTableExists, ImportOptions, MAX_PREVIEW_ROWS, PreviewOptions,
    ProgressReporter,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub pool: PoolConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
    pub connection: ConnectionDefaults,
}

/// `[transfer]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub batch_size: usize,
    pub inference_sample_rows: usize,
    pub preview_limit: usize,
    /// Upper bound on `preview_limit`; a caller's explicit limit is not capped
    pub max_preview_limit: usize,
    pub progress_channel_capacity: usize,
    pub count_before_export: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inference_sample_rows: DEFAULT_SAMPLE_SIZE,
            preview_limit: DEFAULT_PREVIEW_ROWS,
            max_preview_limit: MAX_PREVIEW_ROWS,
            progress_channel_capacity: DEFAULT_EVENT_CAPACITY,
            count_before_export: true,
        }
    }
}

impl TransferConfig {
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            batch_size: self.batch_size,
            count_rows_first: self.count_before_export,
        }
    }

    pub fn import_options(&self, if_table_exists: IfTableExists) -> ImportOptions {
        ImportOptions {
            batch_size: self.batch_size,
            sample_size: self.inference_sample_rows,
            if_table_exists,
        }
    }

    pub fn preview_options(&self) -> PreviewOptions {
        PreviewOptions {
            default_rows: self.preview_limit.min(self.max_preview_limit),
            max_rows: self.max_preview_limit,
        }
    }

    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.progress_channel_capacity.max(1))
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Directory for daily JSON log files; console only when unset
    pub json_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_dir: None,
        }
    }
}

/// `[connection]` section: endpoint used when the caller names none
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionDefaults {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    pub secure: bool,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_CLICKHOUSE_PORT,
            database: "default".to_string(),
            username: "default".to_string(),
            password: None,
            secure: false,
        }
    }
}

impl std::fmt::Debug for ConnectionDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDefaults")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("secure", &self.secure)
            .finish()
    }
}

impl ConnectionDefaults {
    pub fn endpoint(&self) -> DatabaseEndpoint {
        DatabaseEndpoint::clickhouse(&self.host, self.port, &self.database)
            .with_credentials(&self.username, self.password.clone())
            .with_secure(self.secure)
    }

    /// Override fields from `CHBRIDGE_*` variables found through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CHBRIDGE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("CHBRIDGE_PORT") {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "CHBRIDGE_PORT",
                value: port,
            })?;
        }
        if let Some(database) = lookup("CHBRIDGE_DATABASE") {
            self.database = database;
        }
        if let Some(username) = lookup("CHBRIDGE_USER") {
            self.username = username;
        }
        if let Some(password) = lookup("CHBRIDGE_PASSWORD") {
            self.password = Some(password).filter(|p| !p.is_empty());
        }
        Ok(())
    }
}

impl BridgeConfig {
    /// `<config dir>/chbridge/config.toml`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chbridge").join("config.toml"))
    }

    /// Load every source in order. A missing default file is skipped; a
    /// missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut layers = Vec::new();
        if let Some(path) = Self::default_path().filter(|p| p.is_file()) {
            layers.push(read_table(&path)?);
        }
        if let Some(path) = explicit {
            layers.push(read_table(path)?);
        }

        let path = explicit.map(Path::to_path_buf).unwrap_or_default();
        let mut config = Self::from_layers(layers).map_err(|source| ConfigError::Parse { path, source })?;
        config
            .connection
            .apply_env(|name| std::env::var(name).ok())?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Parse a single TOML document over the defaults
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let table: toml::Table = content.parse()?;
        Self::from_layers(vec![table])
    }

    fn from_layers(layers: Vec<toml::Table>) -> Result<Self, toml::de::Error> {
        let mut merged = toml::Table::new();
        for layer in layers {
            merge(&mut merged, layer);
        }
        toml::Value::Table(merged).try_into()
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    content.parse().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Overlay `upper` onto `base`, recursing into nested tables
fn merge(base: &mut toml::Table, upper: toml::Table) {
    for (key, value) in upper {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge(existing, nested)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
