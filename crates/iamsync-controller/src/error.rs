//! Reconcile failure taxonomy.
//!
//! Every failure is caught at the controller boundary, written into the
//! object's status, and handed back to the manager as a requeue signal.

use iamsync_kernel::{KernelError, Kind, ObjectKey};
use iamsync_remote::{RemoteError, RemoteErrorClass};
use iamsync_store::StoreError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A referenced object is not declared.
    #[error("{kind} {key} referenced by {referrer} does not exist")]
    Unresolved {
        kind: Kind,
        key: ObjectKey,
        referrer: String,
    },

    /// A referenced object is declared but has no remote identity yet.
    #[error("{kind} {key} referenced by {referrer} has no remote identity yet")]
    NotYetProvisioned {
        kind: Kind,
        key: ObjectKey,
        referrer: String,
    },

    #[error("remote call failed: {0}")]
    RemoteTransient(RemoteError),

    #[error("remote limit exceeded: {0}")]
    RemoteLimitExceeded(RemoteError),

    #[error("remote rejected the request: {0}")]
    RemoteInvalid(RemoteError),

    #[error("remote object already exists: {0}")]
    RemoteAlreadyExists(RemoteError),

    #[error("remote object still in use: {0}")]
    RemoteConflict(RemoteError),

    #[error("deletion blocked: {0}")]
    DependencyBlocked(String),

    #[error("{kind} {key} was modified concurrently")]
    ConcurrentModification { kind: Kind, key: ObjectKey },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("reconcile exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error(transparent)]
    Store(StoreError),
}

/// How the manager schedules the next attempt after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Re-run from a fresh read without delay.
    Immediate,
    /// Bounded exponential backoff per key.
    Backoff,
    /// Wait for the declared spec to change.
    Never,
}

impl ReconcileError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::ConcurrentModification { .. } => RetryClass::Immediate,
            Self::RemoteInvalid(_) | Self::InvalidSpec(_) => RetryClass::Never,
            _ => RetryClass::Backoff,
        }
    }

    /// Status is left untouched for these: the next attempt re-reads it.
    pub fn skips_status(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. } | Self::Timeout(_))
    }
}

impl From<RemoteError> for ReconcileError {
    fn from(err: RemoteError) -> Self {
        match err.class() {
            RemoteErrorClass::Transient | RemoteErrorClass::NotFound => Self::RemoteTransient(err),
            RemoteErrorClass::LimitExceeded => Self::RemoteLimitExceeded(err),
            RemoteErrorClass::Invalid => Self::RemoteInvalid(err),
            RemoteErrorClass::AlreadyExists => Self::RemoteAlreadyExists(err),
            RemoteErrorClass::Conflict => Self::RemoteConflict(err),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { kind, key, .. } | StoreError::Terminating { kind, key } => {
                Self::ConcurrentModification { kind, key }
            }
            other => Self::Store(other),
        }
    }
}

impl From<KernelError> for ReconcileError {
    fn from(err: KernelError) -> Self {
        Self::InvalidSpec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_classes_map_onto_taxonomy() {
        let limit: ReconcileError = RemoteError::LimitExceeded("versions".into()).into();
        assert!(matches!(limit, ReconcileError::RemoteLimitExceeded(_)));
        assert_eq!(limit.retry_class(), RetryClass::Backoff);

        let invalid: ReconcileError = RemoteError::Invalid("bad name".into()).into();
        assert_eq!(invalid.retry_class(), RetryClass::Never);

        let missing: ReconcileError = RemoteError::not_found("role/app").into();
        assert!(matches!(missing, ReconcileError::RemoteTransient(_)));
    }

    #[test]
    fn store_conflict_is_concurrent_modification() {
        let err: ReconcileError = StoreError::Conflict {
            kind: Kind::Role,
            key: ObjectKey::new("default", "r1"),
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(matches!(err, ReconcileError::ConcurrentModification { .. }));
        assert_eq!(err.retry_class(), RetryClass::Immediate);
        assert!(err.skips_status());
    }
}
