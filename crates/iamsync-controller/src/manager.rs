//! Controller manager: store watches, the work queue and the worker pool.

use crate::backoff::RequeuePolicy;
use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ReconcileError;
use crate::phase::{ObjectReport, ReconcilePhase};
use crate::queue::{WorkKey, WorkQueue};
use iamsync_kernel::{Kind, LabelSelector, Resource, ResourceSpec};
use iamsync_remote::{IamApi, RemoteConfig, adapter_for};
use iamsync_store::{ObjectStore, StoreError, WatchAction, WatchEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const SETTLE_POLL: Duration = Duration::from_millis(10);

/// Outcome of `Manager::run_until_settled`.
#[derive(Debug, Clone)]
pub struct SettleReport {
    /// Every remaining declared object is converged.
    pub settled: bool,
    pub elapsed: Duration,
    pub objects: Vec<ObjectReport>,
}

impl SettleReport {
    pub fn unsettled(&self) -> impl Iterator<Item = &ObjectReport> {
        self.objects
            .iter()
            .filter(|object| object.phase != ReconcilePhase::Converged)
    }
}

pub struct Manager<S> {
    store: Arc<S>,
    controllers: BTreeMap<Kind, Arc<Controller<S>>>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    events: Option<broadcast::Receiver<WatchEvent>>,
}

impl<S: ObjectStore> Manager<S> {
    pub fn new(store: Arc<S>, config: ControllerConfig) -> Self {
        Self {
            store,
            controllers: BTreeMap::new(),
            config,
            queue: WorkQueue::new(),
            events: None,
        }
    }

    /// A manager with one controller per reconciled kind, all sharing `api`.
    pub fn for_service(
        store: Arc<S>,
        api: Arc<dyn IamApi>,
        remote: RemoteConfig,
        config: ControllerConfig,
    ) -> Self {
        let mut manager = Self::new(Arc::clone(&store), config.clone());
        for kind in Kind::RECONCILED {
            if let Some(adapter) = adapter_for(kind, Arc::clone(&api), remote.clone()) {
                manager.register(Controller::new(
                    Arc::clone(&store),
                    adapter,
                    remote.clone(),
                    config.clone(),
                ));
            }
        }
        manager
    }

    pub fn register(&mut self, controller: Controller<S>) {
        self.controllers
            .insert(controller.kind(), Arc::new(controller));
    }

    pub fn controller(&self, kind: Kind) -> Option<&Arc<Controller<S>>> {
        self.controllers.get(&kind)
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    fn kinds(&self) -> BTreeSet<Kind> {
        self.controllers.keys().copied().collect()
    }

    /// Subscribe to store changes now so nothing written before `run`
    /// starts is missed.
    pub fn setup_watches(&mut self) {
        if self.events.is_none() {
            self.events = Some(self.store.watch());
        }
    }

    /// Queue every declared object of every registered kind.
    pub async fn enqueue_all(&self) -> Result<usize, ReconcileError> {
        Ok(enqueue_all(self.store.as_ref(), &self.queue, &self.kinds()).await?)
    }

    /// Process the queue until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ReconcileError> {
        self.setup_watches();
        let events = match self.events.take() {
            Some(events) => events,
            None => self.store.watch(),
        };
        let kinds = self.kinds();
        let queued = self.enqueue_all().await?;
        let workers = self.config.workers();
        info!(kinds = kinds.len(), workers, queued, "manager started");

        let controllers = Arc::new(std::mem::take(&mut self.controllers));
        let policy = RequeuePolicy::from_config(&self.config);
        let deadline = self.config.reconcile_timeout();
        let mut tasks = JoinSet::new();
        tasks.spawn(pump(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            kinds,
            events,
            shutdown.clone(),
        ));
        for _ in 0..workers {
            tasks.spawn(work(
                Arc::clone(&controllers),
                Arc::clone(&self.queue),
                policy.clone(),
                deadline,
                shutdown.clone(),
            ));
        }

        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        self.queue.shutdown();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "manager task failed");
            }
        }
        info!("manager stopped");
        Ok(())
    }

    /// Run until every declared object is converged, nothing is left to
    /// retry, or `deadline` passes.
    pub async fn run_until_settled(
        mut self,
        deadline: Duration,
    ) -> Result<SettleReport, ReconcileError> {
        self.setup_watches();
        self.enqueue_all().await?;
        let store = Arc::clone(&self.store);
        let queue = Arc::clone(&self.queue);
        let kinds = self.kinds();
        let (stop, shutdown) = watch::channel(false);
        let runner = tokio::spawn(self.run(shutdown));

        let started = Instant::now();
        let mut idle_polls = 0;
        let (settled, objects) = loop {
            tokio::time::sleep(SETTLE_POLL).await;
            let objects = status_report(store.as_ref(), &kinds).await?;
            let converged = objects
                .iter()
                .all(|object| object.phase == ReconcilePhase::Converged);
            idle_polls = if queue.is_idle() { idle_polls + 1 } else { 0 };
            if converged && idle_polls > 0 {
                break (true, objects);
            }
            if idle_polls >= 2 || started.elapsed() >= deadline {
                break (converged, objects);
            }
        };

        let _ = stop.send(true);
        match runner.await {
            Ok(result) => result?,
            Err(err) => warn!(error = %err, "manager task failed"),
        }
        Ok(SettleReport {
            settled,
            elapsed: started.elapsed(),
            objects,
        })
    }
}

/// Phase of every declared object of `kinds`.
pub async fn status_report<S: ObjectStore + ?Sized>(
    store: &S,
    kinds: &BTreeSet<Kind>,
) -> Result<Vec<ObjectReport>, ReconcileError> {
    let everything = LabelSelector::everything();
    let mut reports = Vec::new();
    for kind in kinds {
        for resource in store.list(*kind, &everything).await? {
            reports.push(ObjectReport::of(&resource));
        }
    }
    Ok(reports)
}

async fn enqueue_all<S: ObjectStore + ?Sized>(
    store: &S,
    queue: &WorkQueue,
    kinds: &BTreeSet<Kind>,
) -> Result<usize, StoreError> {
    let everything = LabelSelector::everything();
    let mut count = 0;
    for kind in kinds {
        for resource in store.list(*kind, &everything).await? {
            queue.add((*kind, resource.key()));
            count += 1;
        }
    }
    Ok(count)
}

/// Kinds whose specs can name an object of `kind`.
fn referrer_kinds(kind: Kind) -> &'static [Kind] {
    match kind {
        Kind::Policy | Kind::Role => &[Kind::PolicyAttachment],
        Kind::User => &[Kind::PolicyAttachment, Kind::Group],
        Kind::Group => &[Kind::PolicyAttachment],
        Kind::AssumeRolePolicy => &[Kind::Role],
        Kind::PolicyAttachment => &[],
    }
}

/// Kinds an object of `kind` can name in its spec.
fn referent_kinds(kind: Kind) -> &'static [Kind] {
    match kind {
        Kind::PolicyAttachment => &[Kind::Policy, Kind::Role, Kind::User, Kind::Group],
        Kind::Group => &[Kind::User],
        Kind::Role => &[Kind::AssumeRolePolicy],
        Kind::Policy | Kind::User | Kind::AssumeRolePolicy => &[],
    }
}

/// Keys to reconcile because of `event`.
async fn affected_keys<S: ObjectStore + ?Sized>(
    store: &S,
    event: &WatchEvent,
) -> Result<Vec<WorkKey>, StoreError> {
    let everything = LabelSelector::everything();
    let mut keys = Vec::new();
    // The object's own status writes must not bypass its backoff.
    if event.action != WatchAction::StatusModified {
        keys.push((event.kind, event.key.clone()));
    }

    // Dependents resolve the changed object on their next pass.
    for &referrer in referrer_kinds(event.kind) {
        for resource in store.list(referrer, &everything).await? {
            if resource.refers_to(event.kind, &event.key) || selects_users(&resource, event.kind)
            {
                keys.push((referrer, resource.key()));
            }
        }
    }

    // Deletions blocked on the changed object are retried promptly. Its
    // references are unknown once it is gone, so every deleting candidate
    // is queued.
    for &referent in referent_kinds(event.kind) {
        for resource in store.list(referent, &everything).await? {
            if resource.metadata.deletion_requested() {
                keys.push((referent, resource.key()));
            }
        }
    }
    Ok(keys)
}

/// Selector groups are re-evaluated on any user change: a label removed
/// from a user no longer matches but must still leave the group.
fn selects_users(resource: &Resource, changed: Kind) -> bool {
    changed == Kind::User
        && matches!(&resource.spec, ResourceSpec::Group(spec) if spec.user_selector.is_some())
}

async fn pump<S: ObjectStore>(
    store: Arc<S>,
    queue: Arc<WorkQueue>,
    kinds: BTreeSet<Kind>,
    mut events: broadcast::Receiver<WatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = events.recv() => received,
        };
        match received {
            Ok(event) => match affected_keys(store.as_ref(), &event).await {
                Ok(keys) => {
                    for key in keys.into_iter().filter(|(kind, _)| kinds.contains(kind)) {
                        queue.add(key);
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        kind = %event.kind,
                        key = %event.key,
                        "cannot map watch event"
                    );
                    if kinds.contains(&event.kind) {
                        queue.add((event.kind, event.key));
                    }
                }
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "watch stream lagged, requeueing everything");
                if let Err(err) = enqueue_all(store.as_ref(), &queue, &kinds).await {
                    warn!(error = %err, "resync after lag failed");
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn work<S: ObjectStore>(
    controllers: Arc<BTreeMap<Kind, Arc<Controller<S>>>>,
    queue: Arc<WorkQueue>,
    policy: RequeuePolicy,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(key) = queue.next().await {
        let Some(controller) = controllers.get(&key.0) else {
            queue.done(&key);
            continue;
        };
        let pass = tokio::time::timeout(deadline, controller.reconcile(&key.1));
        let result = tokio::select! {
            result = pass => result.unwrap_or_else(|_| Err(ReconcileError::Timeout(deadline))),
            // Dropping the pass cancels its in-flight remote calls.
            _ = shutdown.changed() => {
                queue.done(&key);
                break;
            }
        };
        let requeue = match &result {
            Ok(action) => {
                queue.forget(&key);
                action.requeue_after.map(|after| (after, false))
            }
            Err(err) => {
                let failures = queue.record_failure(&key);
                let delay = policy.delay_for(err, failures);
                debug!(
                    kind = %key.0,
                    key = %key.1,
                    failures,
                    ?delay,
                    error = %err,
                    "requeue after failure"
                );
                delay.map(|after| (after, true))
            }
        };
        queue.done(&key);
        if let Some((after, retry)) = requeue {
            queue.add_after(key, after, retry);
        }
    }
}
