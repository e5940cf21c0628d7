//! Generic resource handler: one code path for every kind, at either scope.

use super::RequestValidator;
use crate::config::QueryDefaults;
use crate::context::RequestContext;
use crate::error::AppError;
use crate::model::{GenericObject, ListResult};
use crate::query::ListQuery;
use crate::registry::{Registry, ResourceKind};
use crate::scope::{Scope, ScopeResolver};
use crate::secret::{ConfigWithSecret, Secret, SecretBinder, SecretChange, SecretWrite};
use crate::store::{AdapterTable, ResourceAdapter, SECRETS_RESOURCE};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A request resolved to its kind, scope and adapter.
struct Target {
    kind: Arc<ResourceKind>,
    scope: Scope,
    adapter: Arc<dyn ResourceAdapter>,
}

pub struct ResourceService {
    registry: Arc<Registry>,
    adapters: AdapterTable,
    defaults: QueryDefaults,
}

impl ResourceService {
    pub fn new(registry: Arc<Registry>, adapters: AdapterTable, defaults: QueryDefaults) -> Self {
        ResourceService {
            registry,
            adapters,
            defaults,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Kind first, so an unknown kind is reported before anything about the scope.
    fn target(&self, resource: &str, user: Option<&str>) -> Result<Target, AppError> {
        let kind = self.registry.resolve(resource)?;
        let scope = ScopeResolver::from_user(user)?;
        ScopeResolver::check(&kind, &scope)?;
        let adapter = self.adapters.for_kind(&kind)?;
        Ok(Target { kind, scope, adapter })
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        resource: &str,
        user: Option<&str>,
        params: &HashMap<String, String>,
    ) -> Result<ListResult<GenericObject>, AppError> {
        let t = self.target(resource, user)?;
        let query = ListQuery::from_params(params, &self.defaults)?;
        let objects = t.adapter.list(ctx, &t.scope, query.selector.as_ref()).await?;
        let result = query.apply(objects);
        debug!(kind = %t.kind.id, scope = %t.scope, total = result.total_items, "list");
        Ok(result)
    }

    /// Configs come back with their secret attached and masked.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        resource: &str,
        user: Option<&str>,
        name: &str,
    ) -> Result<ConfigWithSecret, AppError> {
        let t = self.target(resource, user)?;
        let object = t.adapter.get(ctx, &t.scope, name).await?;
        if !t.kind.is_config() {
            return Ok(ConfigWithSecret { object, secret: None });
        }
        let secret = self.stored_secret(ctx, &t.kind, &t.scope, name).await?;
        Ok(SecretBinder::attach(object, secret)?.redacted())
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        resource: &str,
        user: Option<&str>,
        body: ConfigWithSecret,
    ) -> Result<ConfigWithSecret, AppError> {
        let t = self.target(resource, user)?;
        let (object, change) = self.prepare(&t, body, None)?;
        let created = t.adapter.create(ctx, &t.scope, object).await?;
        debug!(kind = %t.kind.id, scope = %t.scope, name = %created.name(), "created");

        match self.write_secret(&t.kind, &t.scope, created.name(), change).await {
            Ok(secret) => Ok(SecretBinder::attach(created, secret)?.redacted()),
            Err(e) => {
                // Undo the config so a failed create leaves nothing behind.
                warn!(kind = %t.kind.id, scope = %t.scope, name = %created.name(), error = %e, "secret write failed; removing config");
                if let Err(undo) = t.adapter.delete(&RequestContext::detached(), &t.scope, created.name()).await {
                    warn!(kind = %t.kind.id, name = %created.name(), error = %undo, "compensating delete failed");
                }
                Err(e)
            }
        }
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        resource: &str,
        user: Option<&str>,
        name: &str,
        body: ConfigWithSecret,
    ) -> Result<ConfigWithSecret, AppError> {
        let t = self.target(resource, user)?;
        let (object, change) = self.prepare(&t, body, Some(name))?;
        let updated = t.adapter.update(ctx, &t.scope, object).await?;
        debug!(kind = %t.kind.id, scope = %t.scope, name, revision = updated.resource_version(), "updated");
        let secret = match self.write_secret(&t.kind, &t.scope, name, change).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(kind = %t.kind.id, scope = %t.scope, name, error = %e, "config updated but its secret was not");
                return Err(e);
            }
        };
        Ok(SecretBinder::attach(updated, secret)?.redacted())
    }

    /// Replace only `status`. The body may omit `metadata.name`; the path supplies it.
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        resource: &str,
        user: Option<&str>,
        name: &str,
        mut body: GenericObject,
    ) -> Result<GenericObject, AppError> {
        let t = self.target(resource, user)?;
        if body.metadata.name.is_empty() {
            body.metadata.name = name.to_string();
        }
        RequestValidator::identity(&t.kind.id, &t.scope, Some(name), body.name(), body.metadata.user.as_deref())?;
        body.set_owner(&t.scope);
        t.adapter.update_status(ctx, &t.scope, body).await
    }

    /// Deleting a config also deletes its secret.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        resource: &str,
        user: Option<&str>,
        name: &str,
    ) -> Result<(), AppError> {
        let t = self.target(resource, user)?;
        t.adapter.delete(ctx, &t.scope, name).await?;
        debug!(kind = %t.kind.id, scope = %t.scope, name, "deleted");
        if t.kind.is_config() {
            let secret_name = SecretBinder::secret_name(&t.kind, name);
            match self.adapters.secrets().delete(&RequestContext::detached(), &t.scope, &secret_name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(kind = %t.kind.id, scope = %t.scope, name, error = %e, "config deleted but its secret was not");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Validate, stamp owner and kind, and split off the secret.
    /// The owner is stamped first: the derived secret takes its scope from the config.
    fn prepare(
        &self,
        t: &Target,
        mut body: ConfigWithSecret,
        path_name: Option<&str>,
    ) -> Result<(GenericObject, SecretChange), AppError> {
        RequestValidator::object(&t.kind.id, &t.scope, &body.object, path_name)?;
        body.object.set_owner(&t.scope);
        let (mut object, change) = SecretBinder::split(&t.kind, body)?;
        object.kind = t.kind.kind.clone();
        Ok((object, change))
    }

    async fn stored_secret(
        &self,
        ctx: &RequestContext,
        kind: &ResourceKind,
        scope: &Scope,
        config: &str,
    ) -> Result<Option<Secret>, AppError> {
        let name = SecretBinder::secret_name(kind, config);
        match self.adapters.secrets().get(ctx, scope, &name).await {
            Ok(object) => Ok(Some(Secret::from_object(object)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Apply a config write's secret change. Runs detached: the config write has already committed,
    /// so a cancelled request must not leave the pair half-written. Unmasking and merging start from
    /// the authoritative copy; the cache may not have seen the last write yet.
    async fn write_secret(
        &self,
        kind: &ResourceKind,
        scope: &Scope,
        config: &str,
        change: SecretChange,
    ) -> Result<Option<Secret>, AppError> {
        let ctx = RequestContext::detached();
        let secrets = self.adapters.secrets();
        let name = SecretBinder::secret_name(kind, config);
        let stored = secrets
            .fetch(&ctx, scope, &name)
            .await?
            .map(Secret::from_object)
            .transpose()?;
        match change.resolve(stored.as_ref()) {
            SecretWrite::Leave => Ok(stored),
            SecretWrite::Delete => {
                match secrets.delete(&ctx, scope, &name).await {
                    Ok(_) => Ok(None),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            }
            SecretWrite::Put(secret) => {
                let written = put(secrets.as_ref(), &ctx, scope, secret.into_object()).await?;
                Ok(Some(Secret::from_object(written)?))
            }
        }
    }

    pub async fn list_secrets(
        &self,
        ctx: &RequestContext,
        params: &HashMap<String, String>,
    ) -> Result<ListResult<Secret>, AppError> {
        let query = ListQuery::from_params(params, &self.defaults)?;
        let objects = self
            .adapters
            .secrets()
            .list(ctx, &Scope::Global, query.selector.as_ref())
            .await?;
        let page = query.apply(objects);
        let items = page
            .items
            .into_iter()
            .map(Secret::from_object)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ListResult {
            items,
            total_items: page.total_items,
        })
    }

    pub async fn get_secret(&self, ctx: &RequestContext, name: &str) -> Result<Secret, AppError> {
        let object = self.adapters.secrets().get(ctx, &Scope::Global, name).await?;
        Secret::from_object(object)
    }

    /// POST and PUT both land here: create if absent, otherwise replace.
    pub async fn create_or_update_secret(
        &self,
        ctx: &RequestContext,
        path_name: Option<&str>,
        mut secret: Secret,
    ) -> Result<Secret, AppError> {
        if secret.metadata.name.is_empty() {
            if let Some(name) = path_name {
                secret.metadata.name = name.to_string();
            }
        }
        RequestValidator::name(&secret.metadata.name)?;
        RequestValidator::identity(
            SECRETS_RESOURCE,
            &Scope::Global,
            path_name,
            &secret.metadata.name,
            secret.metadata.user.as_deref(),
        )?;
        RequestValidator::labels(&secret.metadata.labels)?;
        let written = put(self.adapters.secrets().as_ref(), ctx, &Scope::Global, secret.into_object()).await?;
        debug!(name = %written.name(), revision = written.resource_version(), "secret written");
        Secret::from_object(written)
    }

    pub async fn delete_secret(&self, ctx: &RequestContext, name: &str) -> Result<(), AppError> {
        self.adapters.secrets().delete(ctx, &Scope::Global, name).await?;
        debug!(name, "secret deleted");
        Ok(())
    }
}

/// Create, or replace if it already exists.
async fn put(
    adapter: &dyn ResourceAdapter,
    ctx: &RequestContext,
    scope: &Scope,
    object: GenericObject,
) -> Result<GenericObject, AppError> {
    match adapter.create(ctx, scope, object.clone()).await {
        Err(AppError::AlreadyExists { .. }) => adapter.update(ctx, scope, object).await,
        other => other,
    }
}
