use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Database connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection URL. Default: "sqlite:stratum.db?mode=rwc".
    #[serde(default = "default_url")]
    pub url: String,
    /// Pool upper bound. Default: 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Pool lower bound. Default: 1.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a connection. Default: 8.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Log every statement through sqlx. Default: false.
    #[serde(default)]
    pub sqlx_logging: bool,
}

fn default_url() -> String {
    "sqlite:stratum.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            sqlx_logging: false,
        }
    }
}

/// Chunked payload settings.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DataConfig {
    /// Maximum bytes per chunk. Default: 5,000,000.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pending chunks written per batch insert. Default: 10.
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

fn default_chunk_size() -> usize {
    5_000_000
}
fn default_flush_every() -> usize {
    10
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            flush_every: default_flush_every(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub data: DataConfig,
}

impl StoreConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("STRATUM_CONFIG").unwrap_or_else(|_| "config/stratum".to_string());
        Self::load_from(&config_path)
    }

    /// Defaults, then the file at `config_path` if present, then environment.
    pub fn load_from(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("database.url", default_url())?
            .set_default("database.max_connections", 10_i64)?
            .set_default("database.min_connections", 1_i64)?
            .set_default("database.connect_timeout_secs", 8_i64)?
            .set_default("database.sqlx_logging", false)?
            .set_default("data.chunk_size", 5_000_000_i64)?
            .set_default("data.flush_every", 10_i64)?
            // Load from config/stratum.toml (or any format `config` knows)
            .add_source(File::with_name(config_path).required(false))
            // Override from environment (e.g., STRATUM__DATABASE__URL)
            .add_source(Environment::with_prefix("STRATUM").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
