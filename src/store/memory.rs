//! In-process authoritative store.

use super::{check_version, merge_status, merge_update, ObjectKey, ObjectStore, WatchEvent};
use crate::error::AppError;
use crate::model::GenericObject;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, GenericObject>,
    revision: u64,
}

/// Events are published while the write lock is held, so the feed is in revision order.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new(watch_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(watch_buffer.max(1));
        MemoryStore {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, AppError> {
        self.inner.read().map_err(|_| AppError::Internal("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, AppError> {
        self.inner.write().map_err(|_| AppError::Internal("store lock poisoned".into()))
    }

    fn publish(&self, event: WatchEvent) {
        // No subscribers is fine; the cache may not be started yet.
        let _ = self.events.send(event);
    }

    fn commit(&self, inner: &mut Inner, resource: &str, object: GenericObject) -> GenericObject {
        inner.objects.insert(ObjectKey::of(resource, &object), object.clone());
        self.publish(WatchEvent::Applied {
            resource: resource.to_string(),
            object: Arc::new(object.clone()),
        });
        object
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(1024)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<GenericObject>, AppError> {
        Ok(self.read()?.objects.get(key).cloned())
    }

    async fn list(&self, resource: &str) -> Result<(Vec<GenericObject>, u64), AppError> {
        let inner = self.read()?;
        let items = inner
            .objects
            .iter()
            .filter(|(k, _)| k.resource == resource)
            .map(|(_, v)| v.clone())
            .collect();
        Ok((items, inner.revision))
    }

    async fn create(&self, resource: &str, mut object: GenericObject) -> Result<GenericObject, AppError> {
        let mut inner = self.write()?;
        let key = ObjectKey::of(resource, &object);
        if inner.objects.contains_key(&key) {
            return Err(AppError::AlreadyExists {
                kind: resource.to_string(),
                name: key.name,
            });
        }
        inner.revision += 1;
        object.metadata.resource_version = inner.revision;
        object.metadata.uid = Some(Uuid::new_v4());
        object.metadata.creation_timestamp = Some(Utc::now());
        tracing::debug!(resource, name = %key.name, owner = %key.owner, revision = inner.revision, "create");
        Ok(self.commit(&mut inner, resource, object))
    }

    async fn update(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError> {
        let mut inner = self.write()?;
        let key = ObjectKey::of(resource, &object);
        let current = inner
            .objects
            .get(&key)
            .ok_or_else(|| AppError::not_found(resource, &key.name))?;
        check_version(resource, current, &object)?;
        let next = merge_update(current, object, inner.revision + 1);
        inner.revision += 1;
        tracing::debug!(resource, name = %key.name, owner = %key.owner, revision = inner.revision, "update");
        Ok(self.commit(&mut inner, resource, next))
    }

    async fn update_status(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError> {
        let mut inner = self.write()?;
        let key = ObjectKey::of(resource, &object);
        let current = inner
            .objects
            .get(&key)
            .ok_or_else(|| AppError::not_found(resource, &key.name))?;
        check_version(resource, current, &object)?;
        let next = merge_status(current, object, inner.revision + 1);
        inner.revision += 1;
        tracing::debug!(resource, name = %key.name, owner = %key.owner, revision = inner.revision, "update status");
        Ok(self.commit(&mut inner, resource, next))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<GenericObject, AppError> {
        let mut inner = self.write()?;
        let removed = inner
            .objects
            .remove(key)
            .ok_or_else(|| AppError::not_found(&key.resource, &key.name))?;
        inner.revision += 1;
        tracing::debug!(resource = %key.resource, name = %key.name, owner = %key.owner, revision = inner.revision, "delete");
        self.publish(WatchEvent::Deleted {
            key: key.clone(),
            revision: inner.revision,
        });
        Ok(removed)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use serde_json::json;

    const R: &str = "emailconfigs";

    #[tokio::test]
    async fn create_stamps_identity_and_rejects_duplicates() {
        let store = MemoryStore::default();
        let created = store
            .create(R, GenericObject::new("smtp", &Scope::Global, json!({ "host": "a" })))
            .await
            .unwrap();
        assert_eq!(created.resource_version(), 1);
        assert!(created.metadata.uid.is_some());
        assert!(created.creation_timestamp().is_some());

        let dup = store
            .create(R, GenericObject::new("smtp", &Scope::Global, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(dup, AppError::AlreadyExists { .. }));

        // Same name under another owner is a different object.
        store
            .create(R, GenericObject::new("smtp", &Scope::tenant("alice"), json!({})))
            .await
            .unwrap();
        assert_eq!(store.list(R).await.unwrap().0.len(), 2);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::default();
        let created = store
            .create(R, GenericObject::new("smtp", &Scope::Global, json!({ "host": "a" })))
            .await
            .unwrap();

        let mut first = created.clone();
        first.spec = json!({ "host": "b" });
        let updated = store.update(R, first).await.unwrap();
        assert_eq!(updated.resource_version(), 2);
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(updated.creation_timestamp(), created.creation_timestamp());

        let mut stale = created.clone();
        stale.spec = json!({ "host": "c" });
        match store.update(R, stale).await.unwrap_err() {
            AppError::Conflict { expected, actual, .. } => assert_eq!((expected, actual), (1, 2)),
            other => panic!("expected conflict, got {:?}", other),
        }

        let mut unconditional = created;
        unconditional.metadata.resource_version = 0;
        unconditional.spec = json!({ "host": "d" });
        assert_eq!(store.update(R, unconditional).await.unwrap().spec["host"], "d");
    }

    #[tokio::test]
    async fn status_and_spec_updates_do_not_clobber_each_other() {
        let store = MemoryStore::default();
        let created = store
            .create(R, GenericObject::new("smtp", &Scope::Global, json!({ "host": "a" })))
            .await
            .unwrap();
        let mut status = created.clone();
        status.status = Some(json!({ "ready": true }));
        status.spec = json!({ "host": "ignored" });
        let with_status = store.update_status(R, status).await.unwrap();
        assert_eq!(with_status.spec["host"], "a");
        assert_eq!(with_status.status, Some(json!({ "ready": true })));

        let mut spec = with_status.clone();
        spec.spec = json!({ "host": "b" });
        spec.status = None;
        let updated = store.update(R, spec).await.unwrap();
        assert_eq!(updated.status, Some(json!({ "ready": true })));
    }

    #[tokio::test]
    async fn watch_feed_is_ordered() {
        let store = MemoryStore::default();
        let mut rx = store.watch();
        store
            .create(R, GenericObject::new("a", &Scope::Global, json!({})))
            .await
            .unwrap();
        store
            .delete(&ObjectKey::new(R, &Scope::Global, "a"))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), WatchEvent::Applied { .. }));
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, WatchEvent::Deleted { .. }));
        assert_eq!(ev.revision(), 2);
        assert!(store
            .delete(&ObjectKey::new(R, &Scope::Global, "a"))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
