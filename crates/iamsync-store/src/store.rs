//! The store contract consumed by the convergence engine.

use crate::snapshot::SnapshotError;
use async_trait::async_trait;
use iamsync_kernel::{Kind, LabelSelector, ObjectKey, Resource};
use tokio::sync::broadcast;

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: Kind, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: Kind, key: ObjectKey },

    /// The write was conditioned on a resource version that is no longer current.
    #[error("{kind} {key} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: Kind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("{kind} {key} is being deleted")]
    Terminating { kind: Kind, key: ObjectKey },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Added,
    /// Metadata or spec changed.
    Modified,
    /// Only the status block changed.
    StatusModified,
    Deleted,
}

/// Change notification keyed by kind and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: Kind,
    pub key: ObjectKey,
    pub action: WatchAction,
    pub resource_version: u64,
}

/// Generic declared-object store with optimistic concurrency.
///
/// Every write returns the stored object with its new `resource_version`.
/// `update` and `update_status` are conditioned on the caller's
/// `resource_version` and fail with `StoreError::Conflict` when stale.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, kind: Kind, key: &ObjectKey) -> Result<Resource, StoreError>;

    async fn list(&self, kind: Kind, selector: &LabelSelector) -> Result<Vec<Resource>, StoreError>;

    async fn create(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Declarative upsert of labels and spec. Status and finalizers are kept.
    async fn apply(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Write metadata and spec. Removes the record when deletion was
    /// requested and no finalizers remain.
    async fn update(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Write the status block only. Never bumps `generation`.
    async fn update_status(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Request deletion. Immediate when no finalizers are present.
    async fn delete(&self, kind: Kind, key: &ObjectKey) -> Result<(), StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
