//! The generic convergence controller.
//!
//! One `Controller` per reconciled kind, parameterized by that kind's
//! `RemoteAdapter`. A reconcile pass reads the declared object, then either
//! tears down its remote counterpart (deletion requested) or drives it
//! towards the declared spec. Every failure is written into status before
//! being returned, except those that must leave status untouched.
//!
//! Out-of-band changes to remote objects are not detected: once an object
//! is at its fixpoint, no remote read happens until the spec or one of its
//! dependencies changes.

use crate::config::ControllerConfig;
use crate::desired::{Resolution, resolve_desired};
use crate::error::ReconcileError;
use crate::guard::DependencyGuard;
use crate::resolver::Resolver;
use chrono::Utc;
use iamsync_kernel::{Arn, Kind, Lifecycle, ObjectKey, Resource};
use iamsync_remote::{
    Desired, RemoteAdapter, RemoteConfig, RemoteError, RemoteIdentity, UpdateStrategy,
};
use iamsync_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What the caller should do once a pass succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

pub struct Controller<S> {
    kind: Kind,
    store: Arc<S>,
    adapter: Arc<dyn RemoteAdapter>,
    resolver: Resolver<S>,
    guard: DependencyGuard<S>,
    remote: RemoteConfig,
    config: ControllerConfig,
}

impl<S: ObjectStore> Controller<S> {
    pub fn new(
        store: Arc<S>,
        adapter: Arc<dyn RemoteAdapter>,
        remote: RemoteConfig,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kind: adapter.kind(),
            resolver: Resolver::new(Arc::clone(&store)),
            guard: DependencyGuard::new(Arc::clone(&store)),
            store,
            adapter,
            remote,
            config,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Run one convergence pass for `key`.
    #[instrument(skip(self, key), fields(kind = %self.kind, key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let resource = match self.store.get(self.kind, key).await {
            Ok(resource) => resource,
            Err(err) if err.is_not_found() => {
                debug!("object no longer declared");
                return Ok(Action::done());
            }
            Err(err) => return Err(err.into()),
        };
        match resource.metadata.lifecycle(self.kind.finalizer()) {
            Lifecycle::Gone => Ok(Action::done()),
            Lifecycle::Deleting => self.finalize(resource).await,
            Lifecycle::Active { .. } => self.converge(resource).await,
        }
    }

    async fn converge(&self, resource: Resource) -> Result<Action, ReconcileError> {
        let resolution = resolve_desired(&self.resolver, &self.remote, &resource).await;
        if let Ok(resolved) = &resolution {
            if resource
                .status
                .is_fixpoint(resource.metadata.generation, &resolved.dependency_version)
            {
                debug!("already converged");
                return Ok(Action::requeue(self.config.resync_interval()));
            }
        }

        let resource = self.register(resource).await?;
        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(err) => return self.fail(resource, err).await,
        };

        let resource = self.mark_syncing(resource).await?;
        let current = recorded_identity(&resource);
        let outcome = match &current {
            None => self.adapter.create(&resolution.desired).await,
            Some(current) if self.updates_in_place(current, &resolution.desired) => {
                self.adapter.update(current, &resolution.desired).await
            }
            Some(current) => self.recreate(current, &resolution.desired).await,
        };
        match outcome {
            Ok(identity) => self.succeed(resource, identity, resolution).await,
            Err(err) => self.fail(resource, err.into()).await,
        }
    }

    fn updates_in_place(&self, current: &RemoteIdentity, desired: &Desired) -> bool {
        let renamed = desired
            .name()
            .is_some_and(|name| name != current.arn.resource_name());
        self.adapter.strategy() == UpdateStrategy::InPlace && !renamed
    }

    async fn recreate(
        &self,
        current: &RemoteIdentity,
        desired: &Desired,
    ) -> Result<RemoteIdentity, RemoteError> {
        match self.adapter.delete(current).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        debug!(arn = %current.arn, "previous remote object removed");
        self.adapter.create(desired).await
    }

    /// Record our cleanup obligation before any remote object can exist.
    async fn register(&self, mut resource: Resource) -> Result<Resource, ReconcileError> {
        if !resource.metadata.register_finalizer(self.kind.finalizer())? {
            return Ok(resource);
        }
        let stored = self.store.update(resource).await?;
        debug!("finalizer registered");
        Ok(stored)
    }

    /// Announce remote work before it starts. A pass cancelled after this
    /// point leaves the object `SYNCING` with its previous ARN.
    async fn mark_syncing(&self, mut resource: Resource) -> Result<Resource, ReconcileError> {
        resource.status.mark_syncing(Utc::now());
        Ok(self.store.update_status(resource).await?)
    }

    async fn succeed(
        &self,
        mut resource: Resource,
        identity: RemoteIdentity,
        resolution: Resolution,
    ) -> Result<Action, ReconcileError> {
        let generation = resource.metadata.generation;
        let status = &mut resource.status;
        status.arn = identity.arn.to_string();
        status.policy_arn = identity
            .policy_arn
            .as_ref()
            .map(Arn::to_string)
            .unwrap_or_default();
        status.dependency_version = resolution.dependency_version;
        status.members = match resolution.desired {
            Desired::Group(group) => group.members,
            _ => Vec::new(),
        };
        status.mark_ok(generation, Utc::now());
        let arn = status.arn.clone();
        self.store.update_status(resource).await?;
        info!(%arn, generation, "reconciled");
        Ok(Action::requeue(self.config.resync_interval()))
    }

    async fn fail(
        &self,
        mut resource: Resource,
        err: ReconcileError,
    ) -> Result<Action, ReconcileError> {
        if err.skips_status() {
            return Err(err);
        }
        warn!(error = %err, "reconcile failed");
        resource.status.mark_error(err.to_string(), Utc::now());
        self.store.update_status(resource).await?;
        Err(err)
    }

    async fn finalize(&self, mut resource: Resource) -> Result<Action, ReconcileError> {
        let key = resource.key();
        if let Err(err) = self.guard.check_deletable(self.kind, &key).await {
            return self.fail(resource, err).await;
        }
        if let Some(current) = recorded_identity(&resource) {
            match self.adapter.delete(&current).await {
                Ok(()) => info!(arn = %current.arn, "remote object deleted"),
                Err(err) if err.is_not_found() => {
                    debug!(arn = %current.arn, "remote object already gone")
                }
                Err(err) => return self.fail(resource, err.into()).await,
            }
        }
        resource.metadata.release_finalizer(self.kind.finalizer())?;
        // The store drops the record once the last finalizer is released.
        self.store.update(resource).await?;
        Ok(Action::done())
    }
}

/// Remote identity recorded by the last successful pass, if any.
fn recorded_identity(resource: &Resource) -> Option<RemoteIdentity> {
    if !resource.status.has_arn() {
        return None;
    }
    let arn = match resource.status.arn.parse::<Arn>() {
        Ok(arn) => arn,
        Err(err) => {
            warn!(error = %err, "ignoring unparsable recorded ARN");
            return None;
        }
    };
    let policy_arn = match resource.status.policy_arn.as_str() {
        "" => None,
        raw => raw.parse::<Arn>().ok(),
    };
    Some(RemoteIdentity { arn, policy_arn })
}
