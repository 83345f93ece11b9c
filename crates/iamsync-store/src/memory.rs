//! Canonical in-memory object store.
//!
//! Objects are indexed by `(kind, namespace/name)` in a `BTreeMap`, so list
//! and snapshot order is deterministic. One store-wide counter hands out
//! resource versions; every successful write takes the next one.

use crate::snapshot::{read_resources_from_path, write_resources_to_path};
use crate::store::{ObjectStore, StoreError, WatchAction, WatchEvent};
use async_trait::async_trait;
use chrono::Utc;
use iamsync_kernel::{AwsObjectStatus, Kind, LabelSelector, ObjectKey, Resource};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

const WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<(Kind, ObjectKey), Resource>,
    last_version: u64,
}

impl Inner {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn current(&self, kind: Kind, key: &ObjectKey) -> Result<&Resource, StoreError> {
        self.objects
            .get(&(kind, key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                key: key.clone(),
            })
    }

    fn check_version(&self, incoming: &Resource) -> Result<&Resource, StoreError> {
        let kind = incoming.kind();
        let key = incoming.key();
        let stored = self.current(kind, &key)?;
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind,
                key,
                expected: incoming.metadata.resource_version,
                actual: stored.metadata.resource_version,
            });
        }
        Ok(stored)
    }
}

/// In-process `ObjectStore` with watch notifications.
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Build a store from fully-materialized objects (e.g. a snapshot).
    ///
    /// Versions are kept as recorded; an identity listed twice is refused.
    pub fn from_resources(resources: Vec<Resource>) -> Result<Self, StoreError> {
        let mut inner = Inner::default();
        for resource in resources {
            let identity = (resource.kind(), resource.key());
            if inner.objects.contains_key(&identity) {
                let (kind, key) = identity;
                return Err(StoreError::AlreadyExists { kind, key });
            }
            inner.last_version = inner.last_version.max(resource.metadata.resource_version);
            inner.objects.insert(identity, resource);
        }
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Ok(Self {
            inner: RwLock::new(inner),
            events,
        })
    }

    /// Load store state from a JSONL snapshot.
    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let resources = read_resources_from_path(path)?;
        Self::from_resources(resources)
    }

    /// Persist every object to a JSONL snapshot.
    pub async fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let resources = self.snapshot().await;
        write_resources_to_path(path, &resources)?;
        Ok(())
    }

    /// All objects in deterministic `(kind, namespace, name)` order.
    pub async fn snapshot(&self) -> Vec<Resource> {
        self.inner.read().await.objects.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.objects.is_empty()
    }

    fn notify(&self, kind: Kind, key: ObjectKey, action: WatchAction, resource_version: u64) {
        debug!(%kind, %key, ?action, resource_version, "store change");
        // No receivers is not an error: nobody is watching yet.
        let _ = self.events.send(WatchEvent {
            kind,
            key,
            action,
            resource_version,
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<Resource, StoreError> {
        self.inner.read().await.current(kind, key).cloned()
    }

    async fn list(&self, kind: Kind, selector: &LabelSelector) -> Result<Vec<Resource>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .objects
            .iter()
            .filter(|((k, _), resource)| *k == kind && selector.matches(&resource.metadata.labels))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn create(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        if resource.metadata.name.is_empty() || resource.metadata.namespace.is_empty() {
            return Err(StoreError::Invalid(
                "metadata.name and metadata.namespace are required".to_string(),
            ));
        }
        let kind = resource.kind();
        let key = resource.key();
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&(kind, key.clone())) {
            return Err(StoreError::AlreadyExists { kind, key });
        }
        let version = inner.next_version();
        let meta = &mut resource.metadata;
        meta.uid = uuid::Uuid::new_v4().to_string();
        meta.generation = 1;
        meta.resource_version = version;
        meta.created_at = Some(Utc::now());
        meta.deletion_requested_at = None;
        resource.status = AwsObjectStatus::default();
        inner.objects.insert((kind, key.clone()), resource.clone());
        drop(inner);
        self.notify(kind, key, WatchAction::Added, version);
        Ok(resource)
    }

    async fn apply(&self, resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut inner = self.inner.write().await;
        let Some(stored) = inner.objects.get(&(kind, key.clone())).cloned() else {
            drop(inner);
            return self.create(resource).await;
        };
        if stored.metadata.deletion_requested() {
            return Err(StoreError::Terminating { kind, key });
        }
        let spec_changed = stored.spec != resource.spec;
        let labels_changed = stored.metadata.labels != resource.metadata.labels;
        if !spec_changed && !labels_changed {
            return Ok(stored);
        }
        let mut next = stored;
        next.metadata.labels = resource.metadata.labels;
        if spec_changed {
            next.spec = resource.spec;
            next.metadata.generation += 1;
        }
        next.metadata.resource_version = inner.next_version();
        let version = next.metadata.resource_version;
        inner.objects.insert((kind, key.clone()), next.clone());
        drop(inner);
        self.notify(kind, key, WatchAction::Modified, version);
        Ok(next)
    }

    async fn update(&self, resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut inner = self.inner.write().await;
        let mut next = inner.check_version(&resource)?.clone();
        next.metadata.labels = resource.metadata.labels;
        next.metadata.finalizers = resource.metadata.finalizers;
        if next.spec != resource.spec {
            next.spec = resource.spec;
            next.metadata.generation += 1;
        }
        let version = inner.next_version();
        next.metadata.resource_version = version;

        if next.metadata.deletion_requested() && next.metadata.finalizers.is_empty() {
            inner.objects.remove(&(kind, key.clone()));
            drop(inner);
            self.notify(kind, key, WatchAction::Deleted, version);
            return Ok(next);
        }

        inner.objects.insert((kind, key.clone()), next.clone());
        drop(inner);
        self.notify(kind, key, WatchAction::Modified, version);
        Ok(next)
    }

    async fn update_status(&self, resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut inner = self.inner.write().await;
        let mut next = inner.check_version(&resource)?.clone();
        next.status = resource.status;
        let version = inner.next_version();
        next.metadata.resource_version = version;
        inner.objects.insert((kind, key.clone()), next.clone());
        drop(inner);
        self.notify(kind, key, WatchAction::StatusModified, version);
        Ok(next)
    }

    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.current(kind, key)?.clone();
        if stored.metadata.deletion_requested() && !stored.metadata.finalizers.is_empty() {
            return Ok(());
        }
        let version = inner.next_version();
        if stored.metadata.finalizers.is_empty() {
            inner.objects.remove(&(kind, key.clone()));
            drop(inner);
            self.notify(kind, key.clone(), WatchAction::Deleted, version);
            return Ok(());
        }
        let mut next = stored;
        next.metadata.deletion_requested_at = Some(Utc::now());
        next.metadata.resource_version = version;
        inner.objects.insert((kind, key.clone()), next);
        drop(inner);
        self.notify(kind, key.clone(), WatchAction::Modified, version);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
