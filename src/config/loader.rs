//! Load settings from an optional JSON file, then apply environment overrides.

use crate::config::{validate, AppConfig};
use crate::error::ConfigError;
use std::path::Path;
use std::str::FromStr;

pub const ENV_CONFIG_PATH: &str = "NOTIFY_CONFIG_PATH";
pub const ENV_LISTEN_ADDR: &str = "NOTIFY_LISTEN_ADDR";
pub const ENV_API_PREFIX: &str = "NOTIFY_API_PREFIX";
pub const ENV_STORE: &str = "NOTIFY_STORE";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_SCHEMA: &str = "NOTIFY_SCHEMA";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "NOTIFY_REQUEST_TIMEOUT_MS";
pub const ENV_BODY_LIMIT_BYTES: &str = "NOTIFY_BODY_LIMIT_BYTES";
pub const ENV_WATCH_BUFFER: &str = "NOTIFY_WATCH_BUFFER";
pub const ENV_DEFAULT_ORDER_BY: &str = "NOTIFY_DEFAULT_ORDER_BY";
pub const ENV_DEFAULT_ASCENDING: &str = "NOTIFY_DEFAULT_ASCENDING";
pub const ENV_DEFAULT_LIMIT: &str = "NOTIFY_DEFAULT_LIMIT";

/// Read `NOTIFY_CONFIG_PATH` (if set), overlay process environment, and validate.
pub async fn load_config() -> Result<AppConfig, ConfigError> {
    let base = match std::env::var(ENV_CONFIG_PATH) {
        Ok(path) => load_from_path(&path).await?,
        Err(_) => AppConfig::default(),
    };
    let config = apply_env(base, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Parse a JSON settings file. Missing fields take their defaults.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}

fn parsed<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{}: cannot parse '{}'", key, raw)))
}

/// Overlay settings from `lookup` (normally the process environment).
pub fn apply_env<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(ENV_LISTEN_ADDR) {
        config.listen_addr = v;
    }
    if let Some(v) = lookup(ENV_API_PREFIX) {
        config.api_prefix = v;
    }
    if let Some(v) = lookup(ENV_STORE) {
        config.store.backend = v.parse()?;
    }
    if let Some(v) = lookup(ENV_DATABASE_URL).filter(|s| !s.is_empty()) {
        config.store.database_url = Some(v);
    }
    if let Some(v) = lookup(ENV_SCHEMA) {
        config.store.schema = v;
    }
    if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_MS) {
        config.request_timeout_ms = parsed(ENV_REQUEST_TIMEOUT_MS, &v)?;
    }
    if let Some(v) = lookup(ENV_BODY_LIMIT_BYTES) {
        config.body_limit_bytes = parsed(ENV_BODY_LIMIT_BYTES, &v)?;
    }
    if let Some(v) = lookup(ENV_WATCH_BUFFER) {
        config.store.watch_buffer = parsed(ENV_WATCH_BUFFER, &v)?;
    }
    if let Some(v) = lookup(ENV_DEFAULT_ORDER_BY) {
        config.query.order_by = v;
    }
    if let Some(v) = lookup(ENV_DEFAULT_ASCENDING) {
        config.query.ascending = parsed(ENV_DEFAULT_ASCENDING, &v)?;
    }
    if let Some(v) = lookup(ENV_DEFAULT_LIMIT) {
        config.query.limit = parsed(ENV_DEFAULT_LIMIT, &v)?;
    }
    Ok(config)
}
