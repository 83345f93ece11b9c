//! The identity service contract.
//!
//! One method per service primitive. Every call is a plain future, so a
//! caller that stops polling (timeout, shutdown) aborts the call.

use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iamsync_kernel::{Arn, TargetType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A principal that managed policies can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name")]
pub enum Principal {
    Role(String),
    User(String),
    Group(String),
}

impl Principal {
    pub fn new(target_type: TargetType, name: impl Into<String>) -> Self {
        match target_type {
            TargetType::Role => Self::Role(name.into()),
            TargetType::User => Self::User(name.into()),
            TargetType::Group => Self::Group(name.into()),
        }
    }

    /// Principal addressed by an IAM ARN (`role/…`, `user/…`, `group/…`).
    pub fn from_arn(arn: &Arn) -> Option<Self> {
        TargetType::from_arn_resource_type(arn.resource_type())
            .map(|target_type| Self::new(target_type, arn.resource_name()))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Role(name) | Self::User(name) | Self::Group(name) => name,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(name) => write!(f, "role {name}"),
            Self::User(name) => write!(f, "user {name}"),
            Self::Group(name) => write!(f, "group {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: String,
    pub assume_role_policy_document: String,
    pub max_session_duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    pub arn: Arn,
    pub description: String,
    pub assume_role_policy_document: String,
    pub max_session_duration: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub description: String,
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub version_id: String,
    pub is_default: bool,
    pub document: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub name: String,
    pub arn: Arn,
    pub description: String,
    pub default_version_id: String,
    pub attachment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub arn: Arn,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub arn: Arn,
    pub users: BTreeSet<String>,
}

#[async_trait]
pub trait IamApi: Send + Sync {
    async fn create_role(&self, request: &CreateRoleRequest) -> Result<RoleRecord, RemoteError>;
    async fn get_role(&self, name: &str) -> Result<RoleRecord, RemoteError>;
    async fn delete_role(&self, name: &str) -> Result<(), RemoteError>;

    async fn create_policy(&self, request: &CreatePolicyRequest)
    -> Result<PolicyRecord, RemoteError>;
    async fn get_policy(&self, arn: &Arn) -> Result<PolicyRecord, RemoteError>;
    async fn create_policy_version(
        &self,
        arn: &Arn,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion, RemoteError>;
    async fn list_policy_versions(&self, arn: &Arn) -> Result<Vec<PolicyVersion>, RemoteError>;
    async fn delete_policy_version(&self, arn: &Arn, version_id: &str) -> Result<(), RemoteError>;
    async fn delete_policy(&self, arn: &Arn) -> Result<(), RemoteError>;

    async fn create_user(&self, request: &CreateUserRequest) -> Result<UserRecord, RemoteError>;
    async fn get_user(&self, name: &str) -> Result<UserRecord, RemoteError>;
    async fn tag_user(&self, name: &str, tags: &BTreeMap<String, String>)
    -> Result<(), RemoteError>;
    async fn untag_user(&self, name: &str, keys: &[String]) -> Result<(), RemoteError>;
    async fn delete_user(&self, name: &str) -> Result<(), RemoteError>;
    async fn list_groups_for_user(&self, name: &str) -> Result<Vec<String>, RemoteError>;

    async fn create_group(&self, name: &str) -> Result<GroupRecord, RemoteError>;
    async fn get_group(&self, name: &str) -> Result<GroupRecord, RemoteError>;
    async fn delete_group(&self, name: &str) -> Result<(), RemoteError>;
    async fn add_user_to_group(&self, group: &str, user: &str) -> Result<(), RemoteError>;
    async fn remove_user_from_group(&self, group: &str, user: &str) -> Result<(), RemoteError>;

    async fn attach_policy(&self, principal: &Principal, policy_arn: &Arn)
    -> Result<(), RemoteError>;
    async fn detach_policy(&self, principal: &Principal, policy_arn: &Arn)
    -> Result<(), RemoteError>;
    async fn list_attached_policies(&self, principal: &Principal) -> Result<Vec<Arn>, RemoteError>;
}
