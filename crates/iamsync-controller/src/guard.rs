//! Deletion guard.
//!
//! A full scan of declared objects without locking. The answer may be
//! stale by the time the caller acts on it; the remote service's own
//! delete-conflict rules are the backstop.

use crate::error::ReconcileError;
use iamsync_kernel::{Kind, LabelSelector, ObjectKey};
use iamsync_store::ObjectStore;
use std::sync::Arc;

pub struct DependencyGuard<S> {
    store: Arc<S>,
}

impl<S: ObjectStore> DependencyGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Declared objects that name `kind`/`key` in their spec.
    pub async fn referrers(
        &self,
        kind: Kind,
        key: &ObjectKey,
    ) -> Result<Vec<(Kind, ObjectKey)>, ReconcileError> {
        let everything = LabelSelector::everything();
        let mut found = Vec::new();
        for referrer_kind in Kind::ALL {
            for resource in self.store.list(referrer_kind, &everything).await? {
                if resource.refers_to(kind, key) {
                    found.push((referrer_kind, resource.key()));
                }
            }
        }
        Ok(found)
    }

    pub async fn check_deletable(&self, kind: Kind, key: &ObjectKey) -> Result<(), ReconcileError> {
        let referrers = self.referrers(kind, key).await?;
        if referrers.is_empty() {
            return Ok(());
        }
        let names: Vec<String> = referrers
            .iter()
            .map(|(kind, key)| format!("{kind} {key}"))
            .collect();
        Err(ReconcileError::DependencyBlocked(format!(
            "{kind} {key} is still referenced by {}",
            names.join(", ")
        )))
    }
}
