use anyhow::{anyhow, Context};
use metron_common::retry::{Backoff, DEFAULT_BACKOFF_SECS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    /// Seconds between snapshot writes; 0 writes on every update.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Snapshot file. Empty keeps metrics in memory only.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    /// Load the snapshot file on startup.
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// When set, metrics live in this SQLite database instead.
    #[serde(default)]
    pub database_path: Option<String>,
    /// CIDR that callers must come from, e.g. `10.0.0.0/8`.
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: Vec<u64>,
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_grpc_addr() -> String {
    "0.0.0.0:3200".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> String {
    "data/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_retry_backoff() -> Vec<u64> {
    DEFAULT_BACKOFF_SECS.to_vec()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            grpc_addr: default_grpc_addr(),
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_path: None,
            trusted_subnet: None,
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

impl ServerConfig {
    /// Reads `path`, falling back to defaults when the file does not exist,
    /// then applies `METRON_*` environment overrides.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            toml::from_str(&content).with_context(|| format!("Failed to parse {path}"))?
        } else {
            tracing::warn!(path, "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overrides fields from variables returned by `lookup`. An empty
    /// `METRON_DATABASE_PATH` or `METRON_TRUSTED_SUBNET` clears the setting.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = lookup("METRON_HTTP_ADDR") {
            self.http_addr = v;
        }
        if let Some(v) = lookup("METRON_GRPC_ADDR") {
            self.grpc_addr = v;
        }
        override_parsed(&lookup, "METRON_STORE_INTERVAL", &mut self.store_interval_secs)?;
        if let Some(v) = lookup("METRON_FILE_STORAGE_PATH") {
            self.file_storage_path = v;
        }
        override_parsed(&lookup, "METRON_RESTORE", &mut self.restore)?;
        if let Some(v) = lookup("METRON_DATABASE_PATH") {
            self.database_path = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("METRON_TRUSTED_SUBNET") {
            self.trusted_subnet = Some(v).filter(|v| !v.is_empty());
        }
        Ok(())
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::from_secs(&self.retry_backoff_secs)
    }
}

fn override_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .parse()
            .map_err(|e| anyhow!("{key}={raw} is invalid: {e}"))?;
    }
    Ok(())
}
