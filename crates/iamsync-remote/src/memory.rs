//! Deterministic simulated identity service.
//!
//! Enforces the rules adapters must cope with: unique names, the policy
//! version cap, and refusal to delete entities that still have attachments,
//! members or extra versions. Every call is recorded, and single failures
//! can be queued per operation.

use crate::api::{
    CreatePolicyRequest, CreateRoleRequest, CreateUserRequest, GroupRecord, IamApi,
    PolicyRecord, PolicyVersion, Principal, RoleRecord, UserRecord,
};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use chrono::Utc;
use iamsync_kernel::{Arn, Kind, PolicyDocument, validate_remote_name};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Version cap per managed policy.
pub const MAX_POLICY_VERSIONS: usize = 5;

/// Account id used by service-managed policies (`arn:aws:iam::aws:policy/…`).
const SERVICE_MANAGED_ACCOUNT: &str = "aws";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredPolicy {
    name: String,
    arn: Arn,
    description: String,
    versions: Vec<PolicyVersion>,
    next_version: u32,
}

impl StoredPolicy {
    fn default_version(&self) -> Option<&PolicyVersion> {
        self.versions.iter().find(|v| v.is_default)
    }
}

/// Serializable service state, persisted by the CLI between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamState {
    roles: BTreeMap<String, RoleRecord>,
    policies: BTreeMap<String, StoredPolicy>,
    users: BTreeMap<String, UserRecord>,
    groups: BTreeMap<String, GroupRecord>,
    attachments: BTreeSet<(Principal, String)>,
}

impl IamState {
    pub fn role_names(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn policy_arns(&self) -> Vec<String> {
        self.policies.keys().cloned().collect()
    }

    pub fn user_names(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn attachments(&self) -> Vec<(Principal, String)> {
        self.attachments.iter().cloned().collect()
    }

    fn attachments_of(&self, principal: &Principal) -> usize {
        self.attachments.iter().filter(|(p, _)| p == principal).count()
    }

    fn attachments_to(&self, policy_arn: &str) -> usize {
        self.attachments.iter().filter(|(_, a)| a == policy_arn).count()
    }

    fn principal_exists(&self, principal: &Principal) -> bool {
        match principal {
            Principal::Role(name) => self.roles.contains_key(name),
            Principal::User(name) => self.users.contains_key(name),
            Principal::Group(name) => self.groups.contains_key(name),
        }
    }

    fn policy(&self, arn: &Arn) -> Result<&StoredPolicy, RemoteError> {
        self.policies
            .get(&arn.to_string())
            .ok_or_else(|| RemoteError::not_found(format!("policy {arn}")))
    }

    fn policy_mut(&mut self, arn: &Arn) -> Result<&mut StoredPolicy, RemoteError> {
        self.policies
            .get_mut(&arn.to_string())
            .ok_or_else(|| RemoteError::not_found(format!("policy {arn}")))
    }

    fn policy_record(&self, policy: &StoredPolicy) -> PolicyRecord {
        PolicyRecord {
            name: policy.name.clone(),
            arn: policy.arn.clone(),
            description: policy.description.clone(),
            default_version_id: policy
                .default_version()
                .map(|v| v.version_id.clone())
                .unwrap_or_default(),
            attachment_count: self.attachments_to(&policy.arn.to_string()),
        }
    }
}

/// One recorded service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub operation: &'static str,
    pub target: String,
    pub payload: Option<String>,
}

/// In-process `IamApi` implementation.
#[derive(Debug)]
pub struct InMemoryIam {
    config: RemoteConfig,
    state: Mutex<IamState>,
    calls: Mutex<Vec<RemoteCall>>,
    faults: Mutex<BTreeMap<&'static str, VecDeque<RemoteError>>>,
    latency: Duration,
}

impl InMemoryIam {
    pub fn new(config: RemoteConfig) -> Self {
        Self::from_state(config, IamState::default())
    }

    pub fn from_state(config: RemoteConfig, state: IamState) -> Self {
        Self {
            config,
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(BTreeMap::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency` before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn snapshot(&self) -> IamState {
        self.lock_state().clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation == operation)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Make the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: &'static str, error: RemoteError) {
        self.faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, IamState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(
        &self,
        operation: &'static str,
        target: impl Into<String>,
        payload: Option<&str>,
    ) -> Result<(), RemoteError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RemoteCall {
                operation,
                target: target.into(),
                payload: payload.map(str::to_string),
            });
        let injected = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_name(kind: Kind, name: &str) -> Result<(), RemoteError> {
        validate_remote_name(kind, name).map_err(|e| RemoteError::Invalid(e.to_string()))
    }

    fn check_document(document: &str) -> Result<(), RemoteError> {
        PolicyDocument::from_json(document)
            .map(|_| ())
            .map_err(|e| RemoteError::Invalid(format!("malformed policy document: {e}")))
    }
}

#[async_trait]
impl IamApi for InMemoryIam {
    async fn create_role(&self, request: &CreateRoleRequest) -> Result<RoleRecord, RemoteError> {
        self.enter("create_role", &request.name, Some(request.assume_role_policy_document.as_str()))
            .await?;
        Self::check_name(Kind::Role, &request.name)?;
        Self::check_document(&request.assume_role_policy_document)?;
        let mut state = self.lock_state();
        if state.roles.contains_key(&request.name) {
            return Err(RemoteError::already_exists(format!("role {}", request.name)));
        }
        let record = RoleRecord {
            name: request.name.clone(),
            arn: self.config.arn_for(Kind::Role, &request.name),
            description: request.description.clone(),
            assume_role_policy_document: request.assume_role_policy_document.clone(),
            max_session_duration: request.max_session_duration,
            created_at: Utc::now(),
        };
        state.roles.insert(request.name.clone(), record.clone());
        Ok(record)
    }

    async fn get_role(&self, name: &str) -> Result<RoleRecord, RemoteError> {
        self.enter("get_role", name, None).await?;
        self.lock_state()
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("role {name}")))
    }

    async fn delete_role(&self, name: &str) -> Result<(), RemoteError> {
        self.enter("delete_role", name, None).await?;
        let mut state = self.lock_state();
        if !state.roles.contains_key(name) {
            return Err(RemoteError::not_found(format!("role {name}")));
        }
        if state.attachments_of(&Principal::Role(name.to_string())) > 0 {
            return Err(RemoteError::DeleteConflict(format!(
                "role {name} still has attached policies"
            )));
        }
        state.roles.remove(name);
        Ok(())
    }

    async fn create_policy(
        &self,
        request: &CreatePolicyRequest,
    ) -> Result<PolicyRecord, RemoteError> {
        self.enter("create_policy", &request.name, Some(request.document.as_str()))
            .await?;
        Self::check_name(Kind::Policy, &request.name)?;
        Self::check_document(&request.document)?;
        let mut state = self.lock_state();
        let arn = self.config.arn_for(Kind::Policy, &request.name);
        if state.policies.contains_key(&arn.to_string()) {
            return Err(RemoteError::already_exists(format!("policy {}", request.name)));
        }
        let policy = StoredPolicy {
            name: request.name.clone(),
            arn: arn.clone(),
            description: request.description.clone(),
            versions: vec![PolicyVersion {
                version_id: "v1".to_string(),
                is_default: true,
                document: request.document.clone(),
                created_at: Utc::now(),
            }],
            next_version: 2,
        };
        let record = state.policy_record(&policy);
        state.policies.insert(arn.to_string(), policy);
        Ok(record)
    }

    async fn get_policy(&self, arn: &Arn) -> Result<PolicyRecord, RemoteError> {
        self.enter("get_policy", arn.to_string(), None).await?;
        let state = self.lock_state();
        let policy = state.policy(arn)?;
        Ok(state.policy_record(policy))
    }

    async fn create_policy_version(
        &self,
        arn: &Arn,
        document: &str,
        set_as_default: bool,
    ) -> Result<PolicyVersion, RemoteError> {
        self.enter("create_policy_version", arn.to_string(), Some(document))
            .await?;
        Self::check_document(document)?;
        let mut state = self.lock_state();
        let policy = state.policy_mut(arn)?;
        if policy.versions.len() >= MAX_POLICY_VERSIONS {
            return Err(RemoteError::LimitExceeded(format!(
                "policy {arn} already has {MAX_POLICY_VERSIONS} versions"
            )));
        }
        if set_as_default {
            for version in &mut policy.versions {
                version.is_default = false;
            }
        }
        let version = PolicyVersion {
            version_id: format!("v{}", policy.next_version),
            is_default: set_as_default,
            document: document.to_string(),
            created_at: Utc::now(),
        };
        policy.next_version += 1;
        policy.versions.push(version.clone());
        Ok(version)
    }

    async fn list_policy_versions(&self, arn: &Arn) -> Result<Vec<PolicyVersion>, RemoteError> {
        self.enter("list_policy_versions", arn.to_string(), None)
            .await?;
        Ok(self.lock_state().policy(arn)?.versions.clone())
    }

    async fn delete_policy_version(&self, arn: &Arn, version_id: &str) -> Result<(), RemoteError> {
        self.enter("delete_policy_version", format!("{arn}#{version_id}"), None)
            .await?;
        let mut state = self.lock_state();
        let policy = state.policy_mut(arn)?;
        let Some(index) = policy
            .versions
            .iter()
            .position(|v| v.version_id == version_id)
        else {
            return Err(RemoteError::not_found(format!(
                "version {version_id} of policy {arn}"
            )));
        };
        if policy.versions[index].is_default {
            return Err(RemoteError::DeleteConflict(format!(
                "version {version_id} is the default version of {arn}"
            )));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn delete_policy(&self, arn: &Arn) -> Result<(), RemoteError> {
        self.enter("delete_policy", arn.to_string(), None).await?;
        let mut state = self.lock_state();
        let policy = state.policy(arn)?;
        if policy.versions.len() > 1 {
            return Err(RemoteError::DeleteConflict(format!(
                "policy {arn} still has non-default versions"
            )));
        }
        if state.attachments_to(&arn.to_string()) > 0 {
            return Err(RemoteError::DeleteConflict(format!(
                "policy {arn} is still attached"
            )));
        }
        state.policies.remove(&arn.to_string());
        Ok(())
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<UserRecord, RemoteError> {
        self.enter("create_user", &request.name, None).await?;
        Self::check_name(Kind::User, &request.name)?;
        let mut state = self.lock_state();
        if state.users.contains_key(&request.name) {
            return Err(RemoteError::already_exists(format!("user {}", request.name)));
        }
        let record = UserRecord {
            name: request.name.clone(),
            arn: self.config.arn_for(Kind::User, &request.name),
            tags: request.tags.clone(),
        };
        state.users.insert(request.name.clone(), record.clone());
        Ok(record)
    }

    async fn get_user(&self, name: &str) -> Result<UserRecord, RemoteError> {
        self.enter("get_user", name, None).await?;
        self.lock_state()
            .users
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("user {name}")))
    }

    async fn tag_user(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), RemoteError> {
        self.enter("tag_user", name, None).await?;
        let mut state = self.lock_state();
        let user = state
            .users
            .get_mut(name)
            .ok_or_else(|| RemoteError::not_found(format!("user {name}")))?;
        user.tags.extend(tags.clone());
        Ok(())
    }

    async fn untag_user(&self, name: &str, keys: &[String]) -> Result<(), RemoteError> {
        self.enter("untag_user", name, None).await?;
        let mut state = self.lock_state();
        let user = state
            .users
            .get_mut(name)
            .ok_or_else(|| RemoteError::not_found(format!("user {name}")))?;
        for key in keys {
            user.tags.remove(key);
        }
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<(), RemoteError> {
        self.enter("delete_user", name, None).await?;
        let mut state = self.lock_state();
        if !state.users.contains_key(name) {
            return Err(RemoteError::not_found(format!("user {name}")));
        }
        if state.attachments_of(&Principal::User(name.to_string())) > 0 {
            return Err(RemoteError::DeleteConflict(format!(
                "user {name} still has attached policies"
            )));
        }
        if state.groups.values().any(|g| g.users.contains(name)) {
            return Err(RemoteError::DeleteConflict(format!(
                "user {name} is still a group member"
            )));
        }
        state.users.remove(name);
        Ok(())
    }

    async fn list_groups_for_user(&self, name: &str) -> Result<Vec<String>, RemoteError> {
        self.enter("list_groups_for_user", name, None).await?;
        let state = self.lock_state();
        if !state.users.contains_key(name) {
            return Err(RemoteError::not_found(format!("user {name}")));
        }
        Ok(state
            .groups
            .values()
            .filter(|g| g.users.contains(name))
            .map(|g| g.name.clone())
            .collect())
    }

    async fn create_group(&self, name: &str) -> Result<GroupRecord, RemoteError> {
        self.enter("create_group", name, None).await?;
        Self::check_name(Kind::Group, name)?;
        let mut state = self.lock_state();
        if state.groups.contains_key(name) {
            return Err(RemoteError::already_exists(format!("group {name}")));
        }
        let record = GroupRecord {
            name: name.to_string(),
            arn: self.config.arn_for(Kind::Group, name),
            users: BTreeSet::new(),
        };
        state.groups.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn get_group(&self, name: &str) -> Result<GroupRecord, RemoteError> {
        self.enter("get_group", name, None).await?;
        self.lock_state()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("group {name}")))
    }

    async fn delete_group(&self, name: &str) -> Result<(), RemoteError> {
        self.enter("delete_group", name, None).await?;
        let mut state = self.lock_state();
        let Some(group) = state.groups.get(name) else {
            return Err(RemoteError::not_found(format!("group {name}")));
        };
        if !group.users.is_empty() {
            return Err(RemoteError::DeleteConflict(format!(
                "group {name} still has members"
            )));
        }
        if state.attachments_of(&Principal::Group(name.to_string())) > 0 {
            return Err(RemoteError::DeleteConflict(format!(
                "group {name} still has attached policies"
            )));
        }
        state.groups.remove(name);
        Ok(())
    }

    async fn add_user_to_group(&self, group: &str, user: &str) -> Result<(), RemoteError> {
        self.enter("add_user_to_group", format!("{group}+{user}"), None)
            .await?;
        let mut state = self.lock_state();
        if !state.users.contains_key(user) {
            return Err(RemoteError::not_found(format!("user {user}")));
        }
        let record = state
            .groups
            .get_mut(group)
            .ok_or_else(|| RemoteError::not_found(format!("group {group}")))?;
        record.users.insert(user.to_string());
        Ok(())
    }

    async fn remove_user_from_group(&self, group: &str, user: &str) -> Result<(), RemoteError> {
        self.enter("remove_user_from_group", format!("{group}-{user}"), None)
            .await?;
        let mut state = self.lock_state();
        let record = state
            .groups
            .get_mut(group)
            .ok_or_else(|| RemoteError::not_found(format!("group {group}")))?;
        if !record.users.remove(user) {
            return Err(RemoteError::not_found(format!(
                "user {user} in group {group}"
            )));
        }
        Ok(())
    }

    async fn attach_policy(
        &self,
        principal: &Principal,
        policy_arn: &Arn,
    ) -> Result<(), RemoteError> {
        self.enter("attach_policy", format!("{principal} <- {policy_arn}"), None)
            .await?;
        let mut state = self.lock_state();
        if !state.principal_exists(principal) {
            return Err(RemoteError::not_found(principal.to_string()));
        }
        if policy_arn.account_id != SERVICE_MANAGED_ACCOUNT {
            state.policy(policy_arn)?;
        }
        state
            .attachments
            .insert((principal.clone(), policy_arn.to_string()));
        Ok(())
    }

    async fn detach_policy(
        &self,
        principal: &Principal,
        policy_arn: &Arn,
    ) -> Result<(), RemoteError> {
        self.enter("detach_policy", format!("{principal} -> {policy_arn}"), None)
            .await?;
        let mut state = self.lock_state();
        if !state
            .attachments
            .remove(&(principal.clone(), policy_arn.to_string()))
        {
            return Err(RemoteError::not_found(format!(
                "attachment of {policy_arn} to {principal}"
            )));
        }
        Ok(())
    }

    async fn list_attached_policies(&self, principal: &Principal) -> Result<Vec<Arn>, RemoteError> {
        self.enter("list_attached_policies", principal.to_string(), None)
            .await?;
        let state = self.lock_state();
        if !state.principal_exists(principal) {
            return Err(RemoteError::not_found(principal.to_string()));
        }
        state
            .attachments
            .iter()
            .filter(|(p, _)| p == principal)
            .map(|(_, arn)| {
                arn.parse::<Arn>()
                    .map_err(|e| RemoteError::Invalid(e.to_string()))
            })
            .collect()
    }
}
