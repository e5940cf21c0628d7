//! Settings validation: catch misconfiguration at startup rather than on the first request.

use crate::config::{AppConfig, StoreBackend};
use crate::error::ConfigError;
use crate::query::SortField;

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.store.backend == StoreBackend::Postgres
        && config.store.database_url.as_deref().map(str::is_empty).unwrap_or(true)
    {
        return Err(ConfigError::MissingSetting("store.database_url"));
    }
    if !is_identifier(&config.store.schema) {
        return Err(ConfigError::Validation(format!(
            "store.schema '{}' is not a valid identifier",
            config.store.schema
        )));
    }
    if config.store.watch_buffer == 0 {
        return Err(ConfigError::Validation("store.watch_buffer must be positive".into()));
    }
    if config.request_timeout_ms == 0 {
        return Err(ConfigError::Validation("request_timeout_ms must be positive".into()));
    }
    if !config.api_prefix.is_empty() && !config.api_prefix.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "api_prefix '{}' must start with '/'",
            config.api_prefix
        )));
    }
    config
        .query
        .order_by
        .parse::<SortField>()
        .map_err(|e| ConfigError::Validation(format!("query.order_by: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate(&AppConfig::default()).unwrap();
    }

    #[test]
    fn postgres_requires_database_url() {
        let mut config = AppConfig::default();
        config.store.backend = StoreBackend::Postgres;
        assert!(matches!(validate(&config), Err(ConfigError::MissingSetting("store.database_url"))));
        config.store.database_url = Some("postgres://localhost/notify".into());
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = AppConfig::default();
        config.query.order_by = "colour".into();
        assert!(validate(&config).is_err());

        let mut config = AppConfig::default();
        config.store.schema = "drop table;".into();
        assert!(validate(&config).is_err());

        let mut config = AppConfig::default();
        config.store.watch_buffer = 0;
        assert!(validate(&config).is_err());

        let mut config = AppConfig::default();
        config.api_prefix = "apis".into();
        assert!(validate(&config).is_err());
    }
}
