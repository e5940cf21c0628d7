//! Authoritative object storage, its watch feed, the cached read replica, and per-kind adapters.

mod adapter;
mod cache;
mod memory;
mod postgres;

pub use adapter::{AdapterTable, KindStore, ResourceAdapter};
pub use cache::ResourceCache;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::AppError;
use crate::model::GenericObject;
use crate::scope::Scope;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Resource identifier under which secrets are stored.
pub const SECRETS_RESOURCE: &str = "secrets";

/// Identity of a stored object: resource kind, owner partition, and name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub resource: String,
    pub owner: Scope,
    pub name: String,
}

impl ObjectKey {
    pub fn new(resource: &str, owner: &Scope, name: &str) -> Self {
        ObjectKey {
            resource: resource.to_string(),
            owner: owner.clone(),
            name: name.to_string(),
        }
    }

    pub fn of(resource: &str, object: &GenericObject) -> Self {
        ObjectKey::new(resource, &object.owner(), object.name())
    }
}

/// One committed write, in revision order.
#[derive(Clone, Debug)]
pub enum WatchEvent {
    /// Created or updated; the object's resourceVersion is the event's revision.
    Applied {
        resource: String,
        object: Arc<GenericObject>,
    },
    Deleted { key: ObjectKey, revision: u64 },
}

impl WatchEvent {
    pub fn resource(&self) -> &str {
        match self {
            WatchEvent::Applied { resource, .. } => resource,
            WatchEvent::Deleted { key, .. } => &key.resource,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            WatchEvent::Applied { object, .. } => object.resource_version(),
            WatchEvent::Deleted { revision, .. } => *revision,
        }
    }
}

/// The authoritative write path. Every successful write is assigned a new, strictly increasing
/// revision, stamped into `metadata.resourceVersion` and published on the watch feed.
///
/// A write future dropped between commit and publish leaves the cache behind, so callers drive writes
/// to completion (`RequestContext::commit`).
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, key: &ObjectKey) -> Result<Option<GenericObject>, AppError>;

    /// Every object of `resource` across all owners, with the revision the listing reflects.
    async fn list(&self, resource: &str) -> Result<(Vec<GenericObject>, u64), AppError>;

    /// Fails `AlreadyExists` if the key is taken. Stamps uid and creationTimestamp.
    async fn create(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError>;

    /// Replaces metadata labels and spec; status, uid and creationTimestamp are kept.
    /// A non-zero resourceVersion that differs from the stored one fails `Conflict`.
    async fn update(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError>;

    /// Replaces only status. Same version check as `update`.
    async fn update_status(&self, resource: &str, object: GenericObject) -> Result<GenericObject, AppError>;

    async fn delete(&self, key: &ObjectKey) -> Result<GenericObject, AppError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Merge an update onto the stored object: identity fields come from `current`.
pub(crate) fn merge_update(current: &GenericObject, incoming: GenericObject, revision: u64) -> GenericObject {
    let mut next = incoming;
    next.kind = if next.kind.is_empty() { current.kind.clone() } else { next.kind };
    next.metadata.user = current.metadata.user.clone();
    next.metadata.uid = current.metadata.uid;
    next.metadata.creation_timestamp = current.metadata.creation_timestamp;
    next.metadata.resource_version = revision;
    next.status = current.status.clone();
    next
}

pub(crate) fn merge_status(current: &GenericObject, incoming: GenericObject, revision: u64) -> GenericObject {
    let mut next = current.clone();
    next.status = incoming.status;
    next.metadata.resource_version = revision;
    next
}

/// Version precondition shared by both backends.
pub(crate) fn check_version(resource: &str, current: &GenericObject, incoming: &GenericObject) -> Result<(), AppError> {
    let expected = incoming.resource_version();
    let actual = current.resource_version();
    if expected != 0 && expected != actual {
        return Err(AppError::Conflict {
            kind: resource.to_string(),
            name: current.name().to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}
