//! Shared application state for all routes. Everything in it is built once at startup.

use crate::config::{AppConfig, StoreBackend};
use crate::error::AppError;
use crate::registry::Registry;
use crate::service::ResourceService;
use crate::store::{AdapterTable, MemoryStore, ObjectStore, PgStore, ResourceCache};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub service: Arc<ResourceService>,
    /// Read replica; also consulted by readiness.
    pub cache: ResourceCache,
    pub store: Arc<dyn ObjectStore>,
}

impl AppState {
    /// Wire the registry's adapters over `store`, starting the watch cache first.
    pub async fn new(config: AppConfig, registry: Registry, store: Arc<dyn ObjectStore>) -> Result<Self, AppError> {
        let cache = ResourceCache::start(Arc::clone(&store), AdapterTable::resources(&registry)).await?;
        let adapters = AdapterTable::build(&registry, Arc::clone(&store), &cache);
        let service = ResourceService::new(Arc::new(registry), adapters, config.query.clone());
        tracing::info!(kinds = service.registry().len(), backend = ?config.store.backend, "notification state ready");
        Ok(AppState {
            config: Arc::new(config),
            service: Arc::new(service),
            cache,
            store,
        })
    }

    /// Build the configured backend and the built-in catalog.
    pub async fn from_config(config: AppConfig) -> Result<Self, AppError> {
        let store: Arc<dyn ObjectStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new(config.store.watch_buffer)),
            StoreBackend::Postgres => Arc::new(PgStore::connect(&config.store).await?),
        };
        AppState::new(config, Registry::builtin(), store).await
    }
}
