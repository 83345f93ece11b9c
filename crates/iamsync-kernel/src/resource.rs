//! Declared resource kinds and their specs.

use crate::arn::Arn;
use crate::document::PolicyStatementEntry;
use crate::error::KernelError;
use crate::meta::{ObjectKey, ObjectMeta};
use crate::reference::{ResourceReference, TargetReference};
use crate::selector::LabelSelector;
use crate::status::AwsObjectStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Role,
    Policy,
    User,
    Group,
    PolicyAttachment,
    AssumeRolePolicy,
}

impl Kind {
    pub const ALL: [Kind; 6] = [
        Kind::Role,
        Kind::Policy,
        Kind::User,
        Kind::Group,
        Kind::PolicyAttachment,
        Kind::AssumeRolePolicy,
    ];

    /// Kinds with a remote counterpart owned by the engine.
    pub const RECONCILED: [Kind; 5] = [
        Kind::Role,
        Kind::Policy,
        Kind::User,
        Kind::Group,
        Kind::PolicyAttachment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Role => "Role",
            Self::Policy => "Policy",
            Self::User => "User",
            Self::Group => "Group",
            Self::PolicyAttachment => "PolicyAttachment",
            Self::AssumeRolePolicy => "AssumeRolePolicy",
        }
    }

    pub fn is_reconciled(self) -> bool {
        Self::RECONCILED.contains(&self)
    }

    /// Finalizer recorded on objects of this kind while a remote object may exist.
    pub fn finalizer(self) -> &'static str {
        match self {
            Self::Role => "role.iamsync.io",
            Self::Policy => "policy.iamsync.io",
            Self::User => "user.iamsync.io",
            Self::Group => "group.iamsync.io",
            Self::PolicyAttachment => "policyattachment.iamsync.io",
            Self::AssumeRolePolicy => "assumerolepolicy.iamsync.io",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| KernelError::InvalidSpec(format!("unknown kind {value:?}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assume_role_policy: Vec<PolicyStatementEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assume_role_policy_ref: Option<ResourceReference>,
    /// Append a web-identity trust statement for the configured OIDC provider.
    #[serde(default, rename = "addIRSAPolicy")]
    pub add_irsa_policy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_role_name: String,
}

impl RoleSpec {
    pub fn validate(&self) -> Result<(), KernelError> {
        match (
            self.assume_role_policy.is_empty(),
            self.assume_role_policy_ref.is_some(),
        ) {
            (false, true) => Err(KernelError::InvalidSpec(
                "only one of assumeRolePolicy and assumeRolePolicyRef may be set".to_string(),
            )),
            (true, false) if !self.add_irsa_policy => Err(KernelError::InvalidSpec(
                "one of assumeRolePolicy, assumeRolePolicyRef or addIRSAPolicy is required"
                    .to_string(),
            )),
            _ => match self.max_session_duration {
                Some(secs) if !(3600..=43200).contains(&secs) => Err(KernelError::InvalidSpec(
                    format!("maxSessionDuration {secs} must be within 3600..=43200 seconds"),
                )),
                _ => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default)]
    pub statement: Vec<PolicyStatementEntry>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_policy_name: String,
}

impl PolicySpec {
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.statement.is_empty() {
            return Err(KernelError::InvalidSpec(
                "policy needs at least one statement".to_string(),
            ));
        }
        if let Some(index) = self.statement.iter().position(|s| s.actions.is_empty()) {
            return Err(KernelError::InvalidSpec(format!(
                "statement {index} has no actions"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<ResourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_selector: Option<LabelSelector>,
}

impl GroupSpec {
    pub fn validate(&self) -> Result<(), KernelError> {
        match (self.users.is_empty(), &self.user_selector) {
            (false, Some(_)) => Err(KernelError::InvalidSpec(
                "only one of users and userSelector may be set".to_string(),
            )),
            (true, None) => Err(KernelError::InvalidSpec(
                "one of users or userSelector is required".to_string(),
            )),
            (true, Some(selector)) if selector.is_empty() => Err(KernelError::InvalidSpec(
                "userSelector must name at least one label".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAttachmentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ResourceReference>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_policy_arn: String,
    pub target: TargetReference,
}

impl PolicyAttachmentSpec {
    pub fn validate(&self) -> Result<(), KernelError> {
        match (&self.policy, self.external_policy_arn.is_empty()) {
            (Some(_), false) => Err(KernelError::InvalidSpec(
                "only one of policy and externalPolicyArn may be set".to_string(),
            )),
            (None, true) => Err(KernelError::InvalidSpec(
                "one of policy or externalPolicyArn is required".to_string(),
            )),
            (None, false) => self
                .external_policy_arn
                .parse::<Arn>()
                .map(|_| ())
                .map_err(|e| KernelError::InvalidSpec(format!("externalPolicyArn: {e}"))),
            (Some(_), true) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssumeRolePolicySpec {
    #[serde(default)]
    pub statement: Vec<PolicyStatementEntry>,
}

impl AssumeRolePolicySpec {
    pub fn validate(&self) -> Result<(), KernelError> {
        if let Some(index) = self.statement.iter().position(|s| s.principal.is_empty()) {
            return Err(KernelError::InvalidSpec(format!(
                "trust statement {index} has no principal"
            )));
        }
        Ok(())
    }
}

/// Kind-tagged spec. The `kind` key sits beside the spec fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ResourceSpec {
    Role(RoleSpec),
    Policy(PolicySpec),
    User(UserSpec),
    Group(GroupSpec),
    PolicyAttachment(PolicyAttachmentSpec),
    AssumeRolePolicy(AssumeRolePolicySpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Role(_) => Kind::Role,
            Self::Policy(_) => Kind::Policy,
            Self::User(_) => Kind::User,
            Self::Group(_) => Kind::Group,
            Self::PolicyAttachment(_) => Kind::PolicyAttachment,
            Self::AssumeRolePolicy(_) => Kind::AssumeRolePolicy,
        }
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        match self {
            Self::Role(spec) => spec.validate(),
            Self::Policy(spec) => spec.validate(),
            Self::User(_) => Ok(()),
            Self::Group(spec) => spec.validate(),
            Self::PolicyAttachment(spec) => spec.validate(),
            Self::AssumeRolePolicy(spec) => spec.validate(),
        }
    }
}

/// One declared object: metadata, desired spec, observed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub metadata: ObjectMeta,
    pub spec: ResourceSpec,
    #[serde(default)]
    pub status: AwsObjectStatus,
}

impl Resource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: AwsObjectStatus::default(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.spec.kind()
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Explicit named references to other declared objects.
    ///
    /// Selector-based group membership is not included: it depends on the
    /// current population and is evaluated by the caller.
    pub fn references(&self) -> Vec<(Kind, ObjectKey)> {
        let namespace = self.metadata.namespace.as_str();
        match &self.spec {
            ResourceSpec::Role(spec) => spec
                .assume_role_policy_ref
                .iter()
                .map(|r| (Kind::AssumeRolePolicy, r.key_in(namespace)))
                .collect(),
            ResourceSpec::Group(spec) => spec
                .users
                .iter()
                .map(|r| (Kind::User, r.key_in(namespace)))
                .collect(),
            ResourceSpec::PolicyAttachment(spec) => {
                let mut refs: Vec<(Kind, ObjectKey)> = spec
                    .policy
                    .iter()
                    .map(|r| (Kind::Policy, r.key_in(namespace)))
                    .collect();
                refs.push((spec.target.target_type.kind(), spec.target.key_in(namespace)));
                refs
            }
            ResourceSpec::Policy(_) | ResourceSpec::User(_) | ResourceSpec::AssumeRolePolicy(_) => {
                Vec::new()
            }
        }
    }

    pub fn refers_to(&self, kind: Kind, key: &ObjectKey) -> bool {
        self.references()
            .iter()
            .any(|(ref_kind, ref_key)| *ref_kind == kind && ref_key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::TargetType;

    fn attachment(target: TargetType) -> Resource {
        Resource::new(
            "default",
            "attach",
            ResourceSpec::PolicyAttachment(PolicyAttachmentSpec {
                policy: Some(ResourceReference::new("", "p1")),
                external_policy_arn: String::new(),
                target: TargetReference::new(target, "other", "t1"),
            }),
        )
    }

    #[test]
    fn manifest_line_parses_with_kind_tag() {
        let raw = r#"{
            "metadata": {"name": "reader", "labels": {"team": "data"}},
            "spec": {"kind": "Policy", "statement": [
                {"effect": "Allow", "actions": ["s3:GetObject"], "resources": ["*"]}
            ]}
        }"#;
        let resource: Resource = serde_json::from_str(raw).expect("manifest should parse");
        assert_eq!(resource.kind(), Kind::Policy);
        assert_eq!(resource.metadata.namespace, "default");
        assert_eq!(resource.status, AwsObjectStatus::default());
        resource.spec.validate().expect("policy should validate");
    }

    #[test]
    fn attachment_references_policy_and_target() {
        let resource = attachment(TargetType::User);
        assert!(resource.refers_to(Kind::Policy, &ObjectKey::new("default", "p1")));
        assert!(resource.refers_to(Kind::User, &ObjectKey::new("other", "t1")));
        assert!(!resource.refers_to(Kind::Role, &ObjectKey::new("other", "t1")));
    }

    #[test]
    fn role_trust_policy_is_exclusive() {
        let mut spec = RoleSpec {
            assume_role_policy: vec![PolicyStatementEntry::allow().with_action("sts:AssumeRole")],
            assume_role_policy_ref: Some(ResourceReference::new("", "trust")),
            ..RoleSpec::default()
        };
        assert!(spec.validate().is_err());
        spec.assume_role_policy.clear();
        spec.validate().expect("reference alone is valid");
        spec.assume_role_policy_ref = None;
        assert!(spec.validate().is_err());
        spec.add_irsa_policy = true;
        spec.validate().expect("web identity alone is valid");
    }

    #[test]
    fn attachment_policy_source_is_exclusive() {
        let mut spec = PolicyAttachmentSpec {
            policy: None,
            external_policy_arn: "arn:aws:iam::aws:policy/ReadOnlyAccess".to_string(),
            target: TargetReference::new(TargetType::Role, "", "r1"),
        };
        spec.validate().expect("external arn alone is valid");
        spec.external_policy_arn = "ReadOnlyAccess".to_string();
        assert!(spec.validate().is_err());
        spec.policy = Some(ResourceReference::new("", "p1"));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn group_needs_users_or_selector() {
        assert!(GroupSpec::default().validate().is_err());
        let by_selector = GroupSpec {
            users: Vec::new(),
            user_selector: Some(LabelSelector::everything().with_label("team", "data")),
        };
        by_selector.validate().expect("selector alone is valid");
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("policyattachment".parse::<Kind>().expect("kind"), Kind::PolicyAttachment);
        assert!("Bucket".parse::<Kind>().is_err());
    }
}
