//! Remote object adapters: one per reconciled kind.
//!
//! Each adapter realizes a `Desired` document through `IamApi` calls and
//! reports the resulting remote identity. Adapters never retry; a failure
//! is returned as-is for the controller to classify.

mod attachment;
mod group;
mod policy;
mod role;
mod user;

pub use attachment::AttachmentAdapter;
pub use group::GroupAdapter;
pub use policy::PolicyAdapter;
pub use role::RoleAdapter;
pub use user::UserAdapter;

use crate::api::{IamApi, Principal};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use iamsync_kernel::{Arn, Kind, PolicyDocument};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// How an adapter converges an object that already exists remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Delete the remote object, then create it from the desired document.
    Recreate,
    /// The service can replace the full content in place.
    InPlace,
}

/// Identity of a remote object as recorded in status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub arn: Arn,
    /// Attachments only: the attached policy.
    pub policy_arn: Option<Arn>,
}

impl RemoteIdentity {
    pub fn new(arn: Arn) -> Self {
        Self {
            arn,
            policy_arn: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRole {
    pub name: String,
    pub description: String,
    pub max_session_duration: u32,
    pub trust_policy: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPolicy {
    pub name: String,
    pub description: String,
    pub document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredUser {
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredGroup {
    pub name: String,
    /// Remote user names, sorted.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAttachment {
    pub policy_arn: Arn,
    pub target_arn: Arn,
}

/// Fully-resolved desired state of one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Desired {
    Role(DesiredRole),
    Policy(DesiredPolicy),
    User(DesiredUser),
    Group(DesiredGroup),
    Attachment(DesiredAttachment),
}

impl Desired {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Role(_) => Kind::Role,
            Self::Policy(_) => Kind::Policy,
            Self::User(_) => Kind::User,
            Self::Group(_) => Kind::Group,
            Self::Attachment(_) => Kind::PolicyAttachment,
        }
    }

    /// Remote name, for kinds that are keyed by one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Role(role) => Some(&role.name),
            Self::Policy(policy) => Some(&policy.name),
            Self::User(user) => Some(&user.name),
            Self::Group(group) => Some(&group.name),
            Self::Attachment(_) => None,
        }
    }
}

/// Capability set every kind-specific adapter provides.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    fn kind(&self) -> Kind;

    fn strategy(&self) -> UpdateStrategy;

    async fn create(&self, desired: &Desired) -> Result<RemoteIdentity, RemoteError>;

    /// Only called for `UpdateStrategy::InPlace` adapters.
    async fn update(
        &self,
        current: &RemoteIdentity,
        desired: &Desired,
    ) -> Result<RemoteIdentity, RemoteError> {
        let _ = (current, desired);
        Err(RemoteError::Invalid(format!(
            "{} objects cannot be updated in place",
            self.kind()
        )))
    }

    async fn delete(&self, current: &RemoteIdentity) -> Result<(), RemoteError>;
}

/// Build the adapter for `kind`, sharing one service handle and config.
pub fn adapter_for(
    kind: Kind,
    api: Arc<dyn IamApi>,
    config: RemoteConfig,
) -> Option<Arc<dyn RemoteAdapter>> {
    match kind {
        Kind::Role => Some(Arc::new(RoleAdapter::new(api, config))),
        Kind::Policy => Some(Arc::new(PolicyAdapter::new(api, config))),
        Kind::User => Some(Arc::new(UserAdapter::new(api, config))),
        Kind::Group => Some(Arc::new(GroupAdapter::new(api, config))),
        Kind::PolicyAttachment => Some(Arc::new(AttachmentAdapter::new(api))),
        Kind::AssumeRolePolicy => None,
    }
}

fn mismatch(expected: Kind, desired: &Desired) -> RemoteError {
    RemoteError::Invalid(format!(
        "{expected} adapter received a {} document",
        desired.kind()
    ))
}

/// Remove a same-named remote object whose identity was never recorded,
/// typically because the pass that created it lost its status write.
async fn clear_unrecorded<A: RemoteAdapter + ?Sized>(
    adapter: &A,
    arn: Arn,
) -> Result<(), RemoteError> {
    info!(kind = %adapter.kind(), %arn, "replacing unrecorded remote object");
    match adapter.delete(&RemoteIdentity::new(arn)).await {
        Err(err) if !err.is_not_found() => Err(err),
        _ => Ok(()),
    }
}

/// Detach every managed policy from `principal` so it can be deleted.
async fn detach_all(api: &dyn IamApi, principal: &Principal) -> Result<(), RemoteError> {
    for policy_arn in api.list_attached_policies(principal).await? {
        match api.detach_policy(principal, &policy_arn).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
