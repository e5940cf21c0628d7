//! Per-kind backing store adapters: cached reads, direct writes, scope enforcement.

use super::{ObjectKey, ObjectStore, ResourceCache, SECRETS_RESOURCE};
use crate::context::RequestContext;
use crate::error::AppError;
use crate::model::GenericObject;
use crate::query::Selector;
use crate::registry::{Registry, ResourceKind, ScopeClass};
use crate::scope::Scope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability set every resource kind exposes to the generic layer.
///
/// Reads are served from the watch-fed cache and may trail recent writes; `fetch` and the writes go
/// straight to the authoritative store. Tenant-scoped calls only see and touch objects owned by that tenant.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    fn resource(&self) -> &str;

    async fn get(&self, ctx: &RequestContext, scope: &Scope, name: &str) -> Result<GenericObject, AppError>;

    async fn list(
        &self,
        ctx: &RequestContext,
        scope: &Scope,
        selector: Option<&Selector>,
    ) -> Result<Vec<GenericObject>, AppError>;

    /// Current state from the authoritative store, for read-modify-write paths.
    async fn fetch(&self, ctx: &RequestContext, scope: &Scope, name: &str) -> Result<Option<GenericObject>, AppError>;

    async fn create(&self, ctx: &RequestContext, scope: &Scope, object: GenericObject) -> Result<GenericObject, AppError>;

    async fn update(&self, ctx: &RequestContext, scope: &Scope, object: GenericObject) -> Result<GenericObject, AppError>;

    async fn update_status(
        &self,
        ctx: &RequestContext,
        scope: &Scope,
        object: GenericObject,
    ) -> Result<GenericObject, AppError>;

    async fn delete(&self, ctx: &RequestContext, scope: &Scope, name: &str) -> Result<GenericObject, AppError>;
}

pub struct KindStore {
    resource: String,
    scope_class: ScopeClass,
    store: Arc<dyn ObjectStore>,
    cache: ResourceCache,
}

impl KindStore {
    pub fn new(resource: &str, scope_class: ScopeClass, store: Arc<dyn ObjectStore>, cache: ResourceCache) -> Self {
        KindStore {
            resource: resource.to_string(),
            scope_class,
            store,
            cache,
        }
    }

    pub fn for_kind(kind: &ResourceKind, store: Arc<dyn ObjectStore>, cache: ResourceCache) -> Self {
        KindStore::new(&kind.id, kind.scope_class, store, cache)
    }

    /// Global-only kinds ignore the caller's scope.
    fn effective(&self, scope: &Scope) -> Scope {
        match self.scope_class {
            ScopeClass::Global => Scope::Global,
            _ => scope.clone(),
        }
    }

    /// The object must belong to the partition the call is scoped to.
    fn admit(&self, scope: &Scope, object: &GenericObject) -> Result<Scope, AppError> {
        let scope = self.effective(scope);
        let owner = object.owner();
        if owner != scope {
            return Err(AppError::forbidden(
                &self.resource,
                object.name(),
                format!("object owned by {} cannot be written at {} scope", owner, scope),
            ));
        }
        Ok(scope)
    }
}

#[async_trait]
impl ResourceAdapter for KindStore {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn get(&self, ctx: &RequestContext, scope: &Scope, name: &str) -> Result<GenericObject, AppError> {
        ctx.check("get")?;
        let scope = self.effective(scope);
        self.cache
            .get(&self.resource, &scope, name)
            .map(|o| GenericObject::clone(&o))
            .ok_or_else(|| AppError::not_found(&self.resource, name))
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        scope: &Scope,
        selector: Option<&Selector>,
    ) -> Result<Vec<GenericObject>, AppError> {
        ctx.check("list")?;
        let scope = self.effective(scope);
        Ok(self
            .cache
            .list(&self.resource, &scope)
            .into_iter()
            .filter(|o| selector.map_or(true, |s| s.matches(o.labels())))
            .map(|o| GenericObject::clone(&o))
            .collect())
    }

    async fn fetch(&self, ctx: &RequestContext, scope: &Scope, name: &str) -> Result<Option<GenericObject>, AppError> {
        let key = ObjectKey::new(&self.resource, &self.effective(scope), name);
        ctx.run("fetch", self.store.get(&key)).await
    }

    async fn create(&self, ctx: &RequestContext, scope: &Scope, object: GenericObject) -> Result<GenericObject, AppError> {
        self.admit(scope, &object)?;
        let (store, resource) = (Arc::clone(&self.store), self.resource.clone());
        ctx.commit("create", async move { store.create(&resource, object).await }).await
    }

    async fn update(&self, ctx: &RequestContext, scope: &Scope, object: GenericObject) -> Result<GenericObject, AppError> {
        self.admit(scope, &object)?;
        let (store, resource) = (Arc::clone(&self.store), self.resource.clone());
        ctx.commit("update", async move { store.update(&resource, object).await }).await
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        scope: &Scope,
        object: GenericObject,
    ) -> Result<GenericObject, AppError> {
        self.admit(scope, &object)?;
        let (store, resource) = (Arc::clone(&self.store), self.resource.clone());
        ctx.commit("update status", async move { store.update_status(&resource, object).await }).await
    }

    async fn delete(&self, ctx: &RequestContext, scope: &Scope, name: &str) -> Result<GenericObject, AppError> {
        let key = ObjectKey::new(&self.resource, &self.effective(scope), name);
        let store = Arc::clone(&self.store);
        ctx.commit("delete", async move { store.delete(&key).await }).await
    }
}

/// Startup-built table from kind identifier to its adapter, plus the secrets adapter.
#[derive(Clone)]
pub struct AdapterTable {
    by_kind: HashMap<String, Arc<dyn ResourceAdapter>>,
    secrets: Arc<dyn ResourceAdapter>,
}

impl AdapterTable {
    pub fn build(registry: &Registry, store: Arc<dyn ObjectStore>, cache: &ResourceCache) -> Self {
        let by_kind = registry
            .kinds()
            .map(|kind| {
                let adapter: Arc<dyn ResourceAdapter> =
                    Arc::new(KindStore::for_kind(kind, Arc::clone(&store), cache.clone()));
                (kind.id.clone(), adapter)
            })
            .collect();
        // Secrets of both scopes share one resource; tenant-owned secrets back tenant configs.
        let secrets: Arc<dyn ResourceAdapter> =
            Arc::new(KindStore::new(SECRETS_RESOURCE, ScopeClass::Both, store, cache.clone()));
        AdapterTable { by_kind, secrets }
    }

    /// Every resource the cache must watch.
    pub fn resources(registry: &Registry) -> Vec<String> {
        registry
            .kinds()
            .map(|k| k.id.clone())
            .chain(std::iter::once(SECRETS_RESOURCE.to_string()))
            .collect()
    }

    pub fn for_kind(&self, kind: &ResourceKind) -> Result<Arc<dyn ResourceAdapter>, AppError> {
        self.by_kind
            .get(&kind.id)
            .cloned()
            .ok_or_else(|| AppError::KindNotFound { kind: kind.id.clone() })
    }

    pub fn secrets(&self) -> Arc<dyn ResourceAdapter> {
        Arc::clone(&self.secrets)
    }
}
