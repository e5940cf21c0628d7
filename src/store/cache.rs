//! Watch-fed read replica of the authoritative store.
//!
//! Readers load an immutable snapshot without locking; a single background task applies watch
//! events and swaps in the next snapshot. Reads therefore lag writes until the task has applied
//! the corresponding event; `wait_for` lets callers wait for a given revision.

use super::{ObjectStore, WatchEvent};
use crate::error::AppError;
use crate::model::GenericObject;
use crate::scope::Scope;
use arc_swap::ArcSwap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

type KindIndex = BTreeMap<(Scope, String), Arc<GenericObject>>;

#[derive(Clone, Debug, Default)]
struct Snapshot {
    /// Every write at or below this revision is reflected in this snapshot.
    revision: u64,
    /// Revision each resource was last listed at; its listing already covers older events.
    listed: HashMap<String, u64>,
    kinds: HashMap<String, Arc<KindIndex>>,
}

impl Snapshot {
    /// Events at or below their resource's listing revision are already reflected; they only move
    /// the revision forward.
    fn apply(&mut self, event: WatchEvent) {
        let revision = event.revision();
        let listed = self.listed.get(event.resource()).copied().unwrap_or(0);
        if revision > listed {
            match event {
                WatchEvent::Applied { resource, object } => {
                    let index = Arc::make_mut(self.kinds.entry(resource).or_default());
                    index.insert((object.owner(), object.name().to_string()), object);
                }
                WatchEvent::Deleted { key, .. } => {
                    if let Some(index) = self.kinds.get_mut(&key.resource) {
                        Arc::make_mut(index).remove(&(key.owner, key.name));
                    }
                }
            }
        }
        self.revision = self.revision.max(revision);
    }
}

#[derive(Clone)]
pub struct ResourceCache {
    snapshot: Arc<ArcSwap<Snapshot>>,
    revision_rx: watch::Receiver<u64>,
    synced_rx: watch::Receiver<bool>,
}

impl ResourceCache {
    /// Subscribe to the store's watch feed, seed from a full listing of `resources`, and spawn the
    /// task that keeps the snapshot current. Returns once the initial listing is loaded.
    pub async fn start(store: Arc<dyn ObjectStore>, resources: Vec<String>) -> Result<Self, AppError> {
        let events = store.watch();
        let seed = list_all(store.as_ref(), &resources, 0).await?;
        info!(revision = seed.revision, kinds = resources.len(), "cache seeded");

        let (revision_tx, revision_rx) = watch::channel(seed.revision);
        let (synced_tx, synced_rx) = watch::channel(true);
        let snapshot = Arc::new(ArcSwap::from_pointee(seed));

        tokio::spawn(run(
            store,
            resources,
            events,
            Arc::clone(&snapshot),
            revision_tx,
            synced_tx,
        ));

        Ok(ResourceCache {
            snapshot,
            revision_rx,
            synced_rx,
        })
    }

    pub fn get(&self, resource: &str, owner: &Scope, name: &str) -> Option<Arc<GenericObject>> {
        self.snapshot
            .load()
            .kinds
            .get(resource)
            .and_then(|index| index.get(&(owner.clone(), name.to_string())).cloned())
    }

    /// Objects of `resource` owned by `owner`, in (owner, name) order.
    pub fn list(&self, resource: &str, owner: &Scope) -> Vec<Arc<GenericObject>> {
        let snapshot = self.snapshot.load();
        let Some(index) = snapshot.kinds.get(resource) else {
            return Vec::new();
        };
        index
            .iter()
            .filter(|((o, _), _)| o == owner)
            .map(|(_, v)| Arc::clone(v))
            .collect()
    }

    pub fn revision(&self) -> u64 {
        *self.revision_rx.borrow()
    }

    /// False while the cache is relisting after falling behind the watch feed.
    pub fn is_synced(&self) -> bool {
        *self.synced_rx.borrow()
    }

    /// Wait until the cache reflects `revision`. Returns false on timeout or if the feed stopped.
    pub async fn wait_for(&self, revision: u64, timeout: Duration) -> bool {
        let mut rx = self.revision_rx.clone();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|r| *r >= revision)).await,
            Ok(Ok(_))
        );
        reached
    }
}

/// Resources are listed one at a time, so writes can land between listings. The snapshot only claims
/// the lowest listing revision; events above each resource's own listing are applied on top.
async fn list_all(store: &dyn ObjectStore, resources: &[String], floor: u64) -> Result<Snapshot, AppError> {
    let mut snapshot = Snapshot::default();
    let mut lowest = None;
    for resource in resources {
        let (objects, revision) = store.list(resource).await?;
        let index: KindIndex = objects
            .into_iter()
            .map(|o| ((o.owner(), o.name().to_string()), Arc::new(o)))
            .collect();
        snapshot.kinds.insert(resource.clone(), Arc::new(index));
        snapshot.listed.insert(resource.clone(), revision);
        lowest = Some(lowest.map_or(revision, |l: u64| l.min(revision)));
    }
    snapshot.revision = floor.max(lowest.unwrap_or(0));
    Ok(snapshot)
}

async fn run(
    store: Arc<dyn ObjectStore>,
    resources: Vec<String>,
    mut events: broadcast::Receiver<WatchEvent>,
    snapshot: Arc<ArcSwap<Snapshot>>,
    revision_tx: watch::Sender<u64>,
    synced_tx: watch::Sender<bool>,
) {
    loop {
        let mut batch = Vec::new();
        let mut lagged = false;
        match events.recv().await {
            Ok(event) => batch.push(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "cache fell behind the watch feed");
                lagged = true;
            }
            Err(RecvError::Closed) => break,
        }
        // Drain whatever else is ready so one snapshot swap covers the burst.
        loop {
            match events.try_recv() {
                Ok(event) => batch.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "cache fell behind the watch feed");
                    lagged = true;
                }
                Err(_) => break,
            }
        }

        if lagged {
            let _ = synced_tx.send(false);
            let floor = snapshot.load().revision;
            let mut attempt = 0u32;
            let relisted = loop {
                match list_all(store.as_ref(), &resources, floor).await {
                    Ok(s) => break s,
                    Err(e) => {
                        attempt += 1;
                        warn!(error = %e, attempt, "cache relist failed");
                        tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt.min(50)))).await;
                    }
                }
            };
            let mut next = relisted;
            for event in batch {
                next.apply(event);
            }
            info!(revision = next.revision, "cache resynced");
            let revision = next.revision;
            snapshot.store(Arc::new(next));
            let _ = revision_tx.send(revision);
            let _ = synced_tx.send(true);
            continue;
        }

        if batch.is_empty() {
            continue;
        }
        let mut next = Snapshot::clone(&snapshot.load());
        for event in batch {
            next.apply(event);
        }
        debug!(revision = next.revision, "cache advanced");
        let revision = next.revision;
        snapshot.store(Arc::new(next));
        let _ = revision_tx.send(revision);
    }
    info!("watch feed closed; cache stopped");
}
