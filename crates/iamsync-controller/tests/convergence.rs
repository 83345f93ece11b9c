use iamsync_controller::{ControllerConfig, Manager, ReconcileError, ReconcilePhase};
use iamsync_kernel::{
    AssumeRolePolicySpec, GroupSpec, Kind, LabelSelector, ObjectKey, PolicyAttachmentSpec,
    PolicyDocument, PolicySpec, PolicyStatementEntry, Resource, ResourceReference, ResourceSpec,
    RoleSpec, SyncState, TargetReference, TargetType, UserSpec, marshal,
};
use iamsync_remote::{IamApi, InMemoryIam, Principal, RemoteConfig, RemoteError};
use iamsync_store::{MemoryStore, ObjectStore};
use std::sync::Arc;
use std::time::Duration;

const ACCOUNT: &str = "123456789012";

fn remote() -> RemoteConfig {
    RemoteConfig {
        account_id: ACCOUNT.to_string(),
        ..RemoteConfig::default()
    }
}

fn fast() -> ControllerConfig {
    ControllerConfig {
        error_backoff_base_ms: 5,
        error_backoff_max_ms: 40,
        ..ControllerConfig::default()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    iam: Arc<InMemoryIam>,
    manager: Manager<MemoryStore>,
}

fn harness() -> Harness {
    harness_with(InMemoryIam::new(remote()), fast())
}

fn harness_with(iam: InMemoryIam, config: ControllerConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let iam = Arc::new(iam);
    let manager = Manager::for_service(store.clone(), iam.clone(), remote(), config);
    Harness {
        store,
        iam,
        manager,
    }
}

impl Harness {
    async fn declare(&self, resource: Resource) -> Resource {
        self.store.create(resource).await.expect("declare object")
    }

    async fn reconcile(&self, kind: Kind, name: &str) -> Result<(), ReconcileError> {
        self.manager
            .controller(kind)
            .expect("controller registered")
            .reconcile(&key(name))
            .await
            .map(|_| ())
    }

    async fn get(&self, kind: Kind, name: &str) -> Resource {
        self.store.get(kind, &key(name)).await.expect("object exists")
    }
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

fn statement(action: &str) -> PolicyStatementEntry {
    PolicyStatementEntry::allow()
        .with_action(action)
        .with_resource("*")
}

fn policy(name: &str, statements: Vec<PolicyStatementEntry>) -> Resource {
    Resource::new(
        "default",
        name,
        ResourceSpec::Policy(PolicySpec {
            statement: statements,
            ..PolicySpec::default()
        }),
    )
}

fn trust() -> PolicyStatementEntry {
    PolicyStatementEntry::allow()
        .with_principal("Service", "ec2.amazonaws.com")
        .with_action("sts:AssumeRole")
}

fn role(name: &str) -> Resource {
    Resource::new(
        "default",
        name,
        ResourceSpec::Role(RoleSpec {
            assume_role_policy: vec![trust()],
            ..RoleSpec::default()
        }),
    )
}

fn user(name: &str) -> Resource {
    Resource::new("default", name, ResourceSpec::User(UserSpec::default()))
}

fn attachment(name: &str, policy: &str, target_type: TargetType, target: &str) -> Resource {
    Resource::new(
        "default",
        name,
        ResourceSpec::PolicyAttachment(PolicyAttachmentSpec {
            policy: Some(ResourceReference::new("", policy)),
            external_policy_arn: String::new(),
            target: TargetReference::new(target_type, "", target),
        }),
    )
}

fn policy_arn(name: &str) -> String {
    format!("arn:aws:iam::{ACCOUNT}:policy/{name}")
}

#[tokio::test]
async fn policy_create_then_version_on_spec_change() {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;

    h.reconcile(Kind::Policy, "p1").await.expect("first pass");
    let creates = h.iam.calls_to("create_policy");
    assert_eq!(creates.len(), 1);
    let sent = PolicyDocument::from_json(creates[0].payload.as_deref().expect("document"))
        .expect("document parses");
    assert_eq!(sent, marshal(&[statement("s3:GetObject")]));

    let stored = h.get(Kind::Policy, "p1").await;
    assert_eq!(stored.status.state, Some(SyncState::Ok));
    assert_eq!(stored.status.arn, policy_arn("p1"));
    assert_eq!(stored.status.observed_generation, 1);

    let two = vec![statement("s3:GetObject"), statement("s3:ListBucket")];
    let applied = h
        .store
        .apply(policy("p1", two.clone()))
        .await
        .expect("apply new spec");
    assert_eq!(applied.metadata.generation, 2);

    h.iam.clear_calls();
    h.reconcile(Kind::Policy, "p1").await.expect("second pass");
    let versions = h.iam.calls_to("create_policy_version");
    assert_eq!(versions.len(), 1);
    let sent = PolicyDocument::from_json(versions[0].payload.as_deref().expect("document"))
        .expect("document parses");
    assert_eq!(sent, marshal(&two));
    assert!(h.iam.calls_to("create_policy").is_empty());

    let stored = h.get(Kind::Policy, "p1").await;
    assert_eq!(stored.status.observed_generation, 2);
    assert_eq!(stored.status.arn, policy_arn("p1"));
}

#[tokio::test]
async fn converged_object_needs_no_remote_calls() {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.declare(role("r1")).await;
    h.declare(attachment("a1", "p1", TargetType::Role, "r1")).await;
    for (kind, name) in [
        (Kind::Policy, "p1"),
        (Kind::Role, "r1"),
        (Kind::PolicyAttachment, "a1"),
    ] {
        h.reconcile(kind, name).await.expect("converge");
    }

    h.iam.clear_calls();
    for (kind, name) in [
        (Kind::Policy, "p1"),
        (Kind::Role, "r1"),
        (Kind::PolicyAttachment, "a1"),
    ] {
        h.reconcile(kind, name).await.expect("fixpoint");
    }
    assert!(h.iam.calls().is_empty(), "calls: {:?}", h.iam.calls());
}

#[tokio::test]
async fn attachment_waits_for_unprovisioned_role() {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.reconcile(Kind::Policy, "p1").await.expect("policy");
    h.declare(role("r1")).await;
    h.declare(attachment("a1", "p1", TargetType::Role, "r1")).await;

    let err = h
        .reconcile(Kind::PolicyAttachment, "a1")
        .await
        .expect_err("role has no arn yet");
    assert!(matches!(
        err,
        ReconcileError::NotYetProvisioned {
            kind: Kind::Role,
            ..
        }
    ));
    let stored = h.get(Kind::PolicyAttachment, "a1").await;
    assert_eq!(stored.status.state, Some(SyncState::Error));
    assert!(
        stored.status.message.contains("Role default/r1"),
        "message: {}",
        stored.status.message
    );
    assert!(h.iam.calls_to("attach_policy").is_empty());
}

#[tokio::test]
async fn missing_reference_is_unresolved() {
    let h = harness();
    h.declare(attachment("a1", "nope", TargetType::User, "alice")).await;
    let err = h
        .reconcile(Kind::PolicyAttachment, "a1")
        .await
        .expect_err("policy is not declared");
    assert!(matches!(
        err,
        ReconcileError::Unresolved {
            kind: Kind::Policy,
            ..
        }
    ));
}

async fn final_state(order: &[(Kind, &str)]) -> (Vec<String>, Vec<String>, Vec<(Principal, String)>) {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.declare(role("r1")).await;
    h.declare(attachment("a1", "p1", TargetType::Role, "r1")).await;
    // Two sweeps: anything that hit NotYetProvisioned in the first succeeds in the second.
    for _ in 0..2 {
        for (kind, name) in order {
            let _ = h.reconcile(*kind, name).await;
        }
    }
    for (kind, name) in order {
        let stored = h.get(*kind, name).await;
        assert_eq!(stored.status.state, Some(SyncState::Ok), "{kind} {name}");
    }
    let state = h.iam.snapshot();
    (state.role_names(), state.policy_arns(), state.attachments())
}

#[tokio::test]
async fn convergence_does_not_depend_on_order() {
    let dependents_first = final_state(&[
        (Kind::PolicyAttachment, "a1"),
        (Kind::Role, "r1"),
        (Kind::Policy, "p1"),
    ])
    .await;
    let dependencies_first = final_state(&[
        (Kind::Policy, "p1"),
        (Kind::Role, "r1"),
        (Kind::PolicyAttachment, "a1"),
    ])
    .await;
    assert_eq!(dependents_first, dependencies_first);
    assert_eq!(dependents_first.2.len(), 1);
}

#[tokio::test]
async fn failed_update_keeps_arn() {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.reconcile(Kind::Policy, "p1").await.expect("create");

    h.store
        .apply(policy("p1", vec![statement("s3:PutObject")]))
        .await
        .expect("apply");
    h.iam.fail_next(
        "create_policy_version",
        RemoteError::Transient("throttled".to_string()),
    );
    let err = h
        .reconcile(Kind::Policy, "p1")
        .await
        .expect_err("injected failure");
    assert!(matches!(err, ReconcileError::RemoteTransient(_)));
    let stored = h.get(Kind::Policy, "p1").await;
    assert_eq!(stored.status.state, Some(SyncState::Error));
    assert_eq!(stored.status.arn, policy_arn("p1"));
    assert_eq!(stored.status.observed_generation, 1);

    h.reconcile(Kind::Policy, "p1").await.expect("retry succeeds");
    let stored = h.get(Kind::Policy, "p1").await;
    assert_eq!(stored.status.state, Some(SyncState::Ok));
    assert_eq!(stored.status.observed_generation, 2);
}

#[tokio::test]
async fn referenced_policy_cannot_be_deleted() {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.declare(user("alice")).await;
    h.declare(attachment("a1", "p1", TargetType::User, "alice")).await;
    for (kind, name) in [
        (Kind::Policy, "p1"),
        (Kind::User, "alice"),
        (Kind::PolicyAttachment, "a1"),
    ] {
        h.reconcile(kind, name).await.expect("converge");
    }

    h.store
        .delete(Kind::Policy, &key("p1"))
        .await
        .expect("request deletion");
    let err = h
        .reconcile(Kind::Policy, "p1")
        .await
        .expect_err("attachment still references p1");
    assert!(matches!(err, ReconcileError::DependencyBlocked(_)));
    let stored = h.get(Kind::Policy, "p1").await;
    assert_eq!(stored.status.state, Some(SyncState::Error));
    assert!(stored.status.message.contains("PolicyAttachment default/a1"));
    assert_eq!(h.iam.snapshot().policy_arns(), vec![policy_arn("p1")]);

    h.store
        .delete(Kind::PolicyAttachment, &key("a1"))
        .await
        .expect("delete attachment");
    h.reconcile(Kind::PolicyAttachment, "a1")
        .await
        .expect("detach");
    assert!(h.iam.snapshot().attachments().is_empty());
    assert!(
        h.store
            .get(Kind::PolicyAttachment, &key("a1"))
            .await
            .expect_err("attachment record removed")
            .is_not_found()
    );

    h.reconcile(Kind::Policy, "p1").await.expect("now deletable");
    assert!(h.iam.snapshot().policy_arns().is_empty());
    assert!(
        h.store
            .get(Kind::Policy, &key("p1"))
            .await
            .expect_err("policy record removed")
            .is_not_found()
    );
}

#[tokio::test]
async fn explicit_group_member_blocks_user_deletion() {
    let h = harness();
    h.declare(user("alice")).await;
    h.declare(Resource::new(
        "default",
        "devs",
        ResourceSpec::Group(GroupSpec {
            users: vec![ResourceReference::new("", "alice")],
            user_selector: None,
        }),
    ))
    .await;
    h.reconcile(Kind::User, "alice").await.expect("user");
    h.reconcile(Kind::Group, "devs").await.expect("group");

    h.store
        .delete(Kind::User, &key("alice"))
        .await
        .expect("request deletion");
    let err = h
        .reconcile(Kind::User, "alice")
        .await
        .expect_err("group names alice");
    assert!(matches!(err, ReconcileError::DependencyBlocked(_)));
    assert_eq!(h.iam.snapshot().user_names(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn remote_object_already_gone_still_finalizes() {
    let h = harness();
    h.declare(user("alice")).await;
    h.reconcile(Kind::User, "alice").await.expect("user");
    h.iam.delete_user("alice").await.expect("out-of-band delete");

    h.store
        .delete(Kind::User, &key("alice"))
        .await
        .expect("request deletion");
    h.reconcile(Kind::User, "alice")
        .await
        .expect("not-found counts as deleted");
    assert!(
        h.store
            .get(Kind::User, &key("alice"))
            .await
            .expect_err("record removed")
            .is_not_found()
    );
}

#[tokio::test]
async fn trust_policy_change_recreates_role_and_reattaches() {
    let h = harness();
    h.declare(Resource::new(
        "default",
        "ec2-trust",
        ResourceSpec::AssumeRolePolicy(AssumeRolePolicySpec {
            statement: vec![trust()],
        }),
    ))
    .await;
    h.declare(Resource::new(
        "default",
        "r1",
        ResourceSpec::Role(RoleSpec {
            assume_role_policy_ref: Some(ResourceReference::new("", "ec2-trust")),
            ..RoleSpec::default()
        }),
    ))
    .await;
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.declare(attachment("a1", "p1", TargetType::Role, "r1")).await;
    for (kind, name) in [
        (Kind::Role, "r1"),
        (Kind::Policy, "p1"),
        (Kind::PolicyAttachment, "a1"),
    ] {
        h.reconcile(kind, name).await.expect("converge");
    }

    let lambda = PolicyStatementEntry::allow()
        .with_principal("Service", "lambda.amazonaws.com")
        .with_action("sts:AssumeRole");
    h.store
        .apply(Resource::new(
            "default",
            "ec2-trust",
            ResourceSpec::AssumeRolePolicy(AssumeRolePolicySpec {
                statement: vec![lambda.clone()],
            }),
        ))
        .await
        .expect("change trust policy");

    h.iam.clear_calls();
    h.reconcile(Kind::Role, "r1").await.expect("recreate role");
    assert_eq!(h.iam.calls_to("delete_role").len(), 1);
    let created = h.iam.calls_to("create_role");
    assert_eq!(created.len(), 1);
    let sent = PolicyDocument::from_json(created[0].payload.as_deref().expect("trust"))
        .expect("trust parses");
    assert_eq!(sent, marshal(&[lambda]));
    assert!(h.iam.snapshot().attachments().is_empty());

    h.reconcile(Kind::PolicyAttachment, "a1")
        .await
        .expect("re-attach");
    assert_eq!(
        h.iam.snapshot().attachments(),
        vec![(Principal::Role("r1".to_string()), policy_arn("p1"))]
    );
}

#[tokio::test]
async fn selector_group_tracks_labelled_users() {
    let h = harness();
    h.declare(user("alice").with_label("team", "data")).await;
    h.declare(user("bob").with_label("team", "ops")).await;
    h.declare(Resource::new(
        "default",
        "data",
        ResourceSpec::Group(GroupSpec {
            users: Vec::new(),
            user_selector: Some(LabelSelector::everything().with_label("team", "data")),
        }),
    ))
    .await;
    h.reconcile(Kind::User, "alice").await.expect("alice");
    h.reconcile(Kind::User, "bob").await.expect("bob");
    h.reconcile(Kind::Group, "data").await.expect("group");

    let stored = h.get(Kind::Group, "data").await;
    assert_eq!(stored.status.members, vec!["alice".to_string()]);
    let group = h.iam.get_group("data").await.expect("remote group");
    assert!(group.users.contains("alice"));
    assert!(!group.users.contains("bob"));
}

#[tokio::test]
async fn invalid_name_makes_no_remote_calls() {
    let h = harness();
    h.declare(Resource::new(
        "default",
        "p1",
        ResourceSpec::Policy(PolicySpec {
            statement: vec![statement("s3:GetObject")],
            aws_policy_name: "not a valid name!".to_string(),
            ..PolicySpec::default()
        }),
    ))
    .await;
    let err = h
        .reconcile(Kind::Policy, "p1")
        .await
        .expect_err("name rejected");
    assert!(matches!(err, ReconcileError::InvalidSpec(_)));
    assert!(h.iam.calls().is_empty());
    assert_eq!(
        h.get(Kind::Policy, "p1").await.status.state,
        Some(SyncState::Error)
    );
}

#[tokio::test]
async fn manager_settles_declared_graph_and_tears_it_down() {
    let h = harness();
    h.declare(attachment("a1", "p1", TargetType::Group, "devs")).await;
    h.declare(Resource::new(
        "default",
        "devs",
        ResourceSpec::Group(GroupSpec {
            users: vec![ResourceReference::new("", "alice")],
            user_selector: None,
        }),
    ))
    .await;
    h.declare(user("alice")).await;
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;

    let report = h
        .manager
        .run_until_settled(Duration::from_secs(10))
        .await
        .expect("run");
    assert!(report.settled, "unsettled: {:?}", report.objects);
    assert!(
        report
            .objects
            .iter()
            .all(|object| object.phase == ReconcilePhase::Converged)
    );
    assert_eq!(
        h.iam.snapshot().attachments(),
        vec![(Principal::Group("devs".to_string()), policy_arn("p1"))]
    );

    for (kind, name) in [
        (Kind::Policy, "p1"),
        (Kind::User, "alice"),
        (Kind::Group, "devs"),
        (Kind::PolicyAttachment, "a1"),
    ] {
        h.store.delete(kind, &key(name)).await.expect("request deletion");
    }
    let manager = Manager::for_service(h.store.clone(), h.iam.clone(), remote(), fast());
    let report = manager
        .run_until_settled(Duration::from_secs(10))
        .await
        .expect("run");
    assert!(report.settled, "unsettled: {:?}", report.objects);
    assert!(h.store.is_empty().await);
    let state = h.iam.snapshot();
    assert!(state.policy_arns().is_empty());
    assert!(state.user_names().is_empty());
    assert!(state.group_names().is_empty());
}

#[tokio::test]
async fn blocked_deletion_is_reported_at_deadline() {
    let h = harness();
    h.declare(policy("p1", vec![statement("s3:GetObject")])).await;
    h.declare(role("r1")).await;
    h.declare(attachment("a1", "p1", TargetType::Role, "r1")).await;
    let report = h
        .manager
        .run_until_settled(Duration::from_secs(10))
        .await
        .expect("run");
    assert!(report.settled);

    h.store
        .delete(Kind::Policy, &key("p1"))
        .await
        .expect("request deletion");
    let manager = Manager::for_service(h.store.clone(), h.iam.clone(), remote(), fast());
    let report = manager
        .run_until_settled(Duration::from_millis(300))
        .await
        .expect("run");
    assert!(!report.settled);
    let blocked: Vec<_> = report.unsettled().collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].phase, ReconcilePhase::Deleting);
    assert!(blocked[0].message.contains("still referenced by PolicyAttachment default/a1"));
}

#[tokio::test]
async fn slow_remote_calls_time_out_without_recording_an_error() {
    let config = ControllerConfig {
        reconcile_timeout_ms: 20,
        ..fast()
    };
    let h = harness_with(
        InMemoryIam::new(remote()).with_latency(Duration::from_millis(500)),
        config,
    );
    h.declare(user("alice")).await;
    let report = h
        .manager
        .run_until_settled(Duration::from_millis(200))
        .await
        .expect("run");
    assert!(!report.settled);
    let stored = h.store.get(Kind::User, &key("alice")).await.expect("object exists");
    assert_eq!(stored.status.state, Some(SyncState::Syncing));
    assert!(stored.status.message.is_empty());
    assert!(!stored.status.has_arn());
    assert_eq!(
        ReconcilePhase::observe(&stored),
        ReconcilePhase::Converging
    );
}

#[tokio::test]
async fn status_write_conflict_after_create_is_retried_to_convergence() {
    let h = harness_with(
        InMemoryIam::new(remote()).with_latency(Duration::from_millis(200)),
        fast(),
    );
    h.declare(role("r1")).await;

    // Relabel while create_role is in flight so the status write is stale.
    let store = h.store.clone();
    let relabel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .apply(role("r1").with_label("team", "data"))
            .await
            .expect("relabel");
    });
    let err = h
        .reconcile(Kind::Role, "r1")
        .await
        .expect_err("status write conflicts");
    relabel.await.expect("relabel task");
    assert!(matches!(err, ReconcileError::ConcurrentModification { .. }));
    assert_eq!(h.iam.snapshot().role_names(), vec!["r1".to_string()]);
    let stored = h.get(Kind::Role, "r1").await;
    assert!(!stored.status.has_arn());
    assert_ne!(stored.status.state, Some(SyncState::Error));

    h.reconcile(Kind::Role, "r1")
        .await
        .expect("retry replaces the unrecorded role");
    let stored = h.get(Kind::Role, "r1").await;
    assert_eq!(stored.status.state, Some(SyncState::Ok));
    assert_eq!(stored.status.arn, format!("arn:aws:iam::{ACCOUNT}:role/r1"));
    assert_eq!(h.iam.snapshot().role_names(), vec!["r1".to_string()]);

    h.iam.clear_calls();
    h.reconcile(Kind::Role, "r1").await.expect("fixpoint");
    assert!(h.iam.calls().is_empty());
}

#[tokio::test]
async fn partially_created_group_is_retried_to_convergence() {
    let h = harness();
    h.declare(user("alice")).await;
    h.declare(Resource::new(
        "default",
        "devs",
        ResourceSpec::Group(GroupSpec {
            users: vec![ResourceReference::new("", "alice")],
            user_selector: None,
        }),
    ))
    .await;
    h.reconcile(Kind::User, "alice").await.expect("user");

    h.iam.fail_next(
        "add_user_to_group",
        RemoteError::Transient("throttled".to_string()),
    );
    let err = h
        .reconcile(Kind::Group, "devs")
        .await
        .expect_err("member add fails");
    assert!(matches!(err, ReconcileError::RemoteTransient(_)));
    let stored = h.get(Kind::Group, "devs").await;
    assert_eq!(stored.status.state, Some(SyncState::Error));
    assert!(!stored.status.has_arn());

    h.reconcile(Kind::Group, "devs").await.expect("retry converges");
    let stored = h.get(Kind::Group, "devs").await;
    assert_eq!(stored.status.state, Some(SyncState::Ok));
    assert_eq!(stored.status.members, vec!["alice".to_string()]);
    let record = h.iam.get_group("devs").await.expect("group exists");
    assert!(record.users.contains("alice"));
}
