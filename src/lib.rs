//! Notification API: uniform CRUD over notification configs, receivers and their secrets,
//! at global and per-user scope.

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod model;
pub mod query;
pub mod registry;
pub mod response;
pub mod routes;
pub mod scope;
pub mod secret;
pub mod service;
pub mod state;
pub mod store;

pub use config::{load_config, AppConfig, QueryDefaults, StoreBackend};
pub use context::RequestContext;
pub use error::{AppError, ConfigError};
pub use model::{GenericObject, ListResult, ObjectMeta};
pub use query::{ListQuery, Selector};
pub use registry::{Registry, ResourceKind, ScopeClass, Shape};
pub use routes::{common_routes, notification_routes};
pub use scope::{Scope, ScopeResolver};
pub use secret::{ConfigWithSecret, Secret, SecretBinder};
pub use service::ResourceService;
pub use state::AppState;
pub use store::{MemoryStore, ObjectKey, ObjectStore, PgStore, ResourceCache};
