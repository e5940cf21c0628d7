//! Application settings. Every field has a default so a partial JSON file is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store; state is lost on restart.
    #[default]
    Memory,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            _ => Err(crate::error::ConfigError::Validation(format!(
                "invalid store backend: {} (expected memory or postgres)",
                s
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Required for the postgres backend.
    pub database_url: Option<String>,
    /// PostgreSQL schema holding the object table.
    pub schema: String,
    pub max_connections: u32,
    /// Capacity of the watch channel feeding the cache. A slow cache beyond this triggers a relist.
    pub watch_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            database_url: None,
            schema: "notification".into(),
            max_connections: 5,
            watch_buffer: 1024,
        }
    }
}

/// Defaults applied to list requests that omit ordering or limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub order_by: String,
    pub ascending: bool,
    /// Zero means "no pagination".
    pub limit: usize,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        QueryDefaults {
            order_by: "createTime".into(),
            ascending: true,
            limit: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen_addr: String,
    /// Prefix the notification routes are nested under.
    pub api_prefix: String,
    pub request_timeout_ms: u64,
    pub body_limit_bytes: usize,
    pub store: StoreConfig,
    pub query: QueryDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            listen_addr: "0.0.0.0:9090".into(),
            api_prefix: "/apis/notification/v2".into(),
            request_timeout_ms: 30_000,
            body_limit_bytes: 1024 * 1024,
            store: StoreConfig::default(),
            query: QueryDefaults::default(),
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
