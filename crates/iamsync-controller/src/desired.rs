//! Desired-state construction: resolve references, marshal documents and
//! compute the dependency token the fixpoint check compares against.

use crate::error::ReconcileError;
use crate::resolver::Resolver;
use iamsync_kernel::{
    Arn, GroupSpec, Kind, ObjectMeta, PolicyAttachmentSpec, PolicySpec, PolicyStatementEntry,
    Resource, ResourceSpec, RoleSpec, UserSpec, marshal, validate_remote_name,
};
use iamsync_remote::{
    Desired, DesiredAttachment, DesiredGroup, DesiredPolicy, DesiredRole, DesiredUser,
    RemoteConfig,
};
use iamsync_store::ObjectStore;
use sha2::{Digest, Sha256};

/// Audience every web-identity token is issued for.
const WEB_IDENTITY_AUDIENCE: &str = "sts.amazonaws.com";

/// A fully resolved desired document plus its dependency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub desired: Desired,
    /// Empty for kinds without references.
    pub dependency_version: String,
}

impl Resolution {
    fn standalone(desired: Desired) -> Self {
        Self {
            desired,
            dependency_version: String::new(),
        }
    }
}

/// Resolve `resource` into the document its adapter should realize.
pub async fn resolve_desired<S: ObjectStore>(
    resolver: &Resolver<S>,
    remote: &RemoteConfig,
    resource: &Resource,
) -> Result<Resolution, ReconcileError> {
    let meta = &resource.metadata;
    match &resource.spec {
        ResourceSpec::Role(spec) => role(resolver, remote, meta, spec).await,
        ResourceSpec::Policy(spec) => policy(remote, meta, spec).map(Resolution::standalone),
        ResourceSpec::User(spec) => user(remote, meta, spec).map(Resolution::standalone),
        ResourceSpec::Group(spec) => group(resolver, remote, meta, spec).await,
        ResourceSpec::PolicyAttachment(spec) => attachment(resolver, meta, spec).await,
        ResourceSpec::AssumeRolePolicy(_) => Err(ReconcileError::InvalidSpec(format!(
            "AssumeRolePolicy {} has no remote counterpart",
            meta.key()
        ))),
    }
}

fn remote_name(
    remote: &RemoteConfig,
    kind: Kind,
    meta: &ObjectMeta,
    override_name: &str,
) -> Result<String, ReconcileError> {
    let name = remote.remote_name(&meta.name, override_name);
    validate_remote_name(kind, &name)?;
    Ok(name)
}

fn referrer(kind: Kind, meta: &ObjectMeta) -> String {
    format!("{kind} {}", meta.key())
}

fn token<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

async fn role<S: ObjectStore>(
    resolver: &Resolver<S>,
    remote: &RemoteConfig,
    meta: &ObjectMeta,
    spec: &RoleSpec,
) -> Result<Resolution, ReconcileError> {
    spec.validate()?;
    let name = remote_name(remote, Kind::Role, meta, &spec.aws_role_name)?;
    let mut trust_policy = match &spec.assume_role_policy_ref {
        Some(reference) => {
            resolver
                .trust_policy(
                    &reference.key_in(&meta.namespace),
                    &referrer(Kind::Role, meta),
                )
                .await?
        }
        None => marshal(&spec.assume_role_policy),
    };
    if spec.add_irsa_policy {
        trust_policy.extend(&[web_identity_statement(remote, meta)?]);
    }
    // Covers referenced trust documents and provider changes alike.
    let dependency_version = trust_policy.digest();
    Ok(Resolution {
        desired: Desired::Role(DesiredRole {
            name,
            description: spec.description.clone(),
            max_session_duration: spec
                .max_session_duration
                .unwrap_or(remote.default_max_session_duration_secs),
            trust_policy,
        }),
        dependency_version,
    })
}

/// Trust statement letting the workload identity `<namespace>:<name>` of
/// the configured OIDC provider assume the role.
fn web_identity_statement(
    remote: &RemoteConfig,
    meta: &ObjectMeta,
) -> Result<PolicyStatementEntry, ReconcileError> {
    let provider = remote.oidc_provider_arn.as_deref().ok_or_else(|| {
        ReconcileError::InvalidSpec(
            "addIRSAPolicy is set but no OIDC provider ARN is configured".to_string(),
        )
    })?;
    let provider_arn: Arn = provider.parse()?;
    let issuer = provider_arn.resource_path();
    if issuer.is_empty() {
        return Err(ReconcileError::InvalidSpec(format!(
            "OIDC provider ARN {provider} has no issuer path"
        )));
    }
    Ok(PolicyStatementEntry::allow()
        .with_principal("Federated", provider)
        .with_action("sts:AssumeRoleWithWebIdentity")
        .with_condition(
            "StringEquals",
            format!("{issuer}:aud"),
            WEB_IDENTITY_AUDIENCE,
        )
        .with_condition(
            "StringEquals",
            format!("{issuer}:sub"),
            format!("system:serviceaccount:{}:{}", meta.namespace, meta.name),
        ))
}

fn policy(
    remote: &RemoteConfig,
    meta: &ObjectMeta,
    spec: &PolicySpec,
) -> Result<Desired, ReconcileError> {
    spec.validate()?;
    Ok(Desired::Policy(DesiredPolicy {
        name: remote_name(remote, Kind::Policy, meta, &spec.aws_policy_name)?,
        description: spec.description.clone(),
        document: marshal(&spec.statement),
    }))
}

fn user(remote: &RemoteConfig, meta: &ObjectMeta, spec: &UserSpec) -> Result<Desired, ReconcileError> {
    Ok(Desired::User(DesiredUser {
        name: remote_name(remote, Kind::User, meta, "")?,
        tags: spec.tags.clone(),
    }))
}

async fn group<S: ObjectStore>(
    resolver: &Resolver<S>,
    remote: &RemoteConfig,
    meta: &ObjectMeta,
    spec: &GroupSpec,
) -> Result<Resolution, ReconcileError> {
    spec.validate()?;
    let name = remote_name(remote, Kind::Group, meta, "")?;
    let referrer = referrer(Kind::Group, meta);
    let resolved = match &spec.user_selector {
        Some(selector) => resolver.selected_users(selector, &referrer).await?,
        None => {
            let mut resolved = Vec::with_capacity(spec.users.len());
            for reference in &spec.users {
                let key = reference.key_in(&meta.namespace);
                resolved.push(resolver.resolve(Kind::User, &key, &referrer).await?);
            }
            resolved
        }
    };
    let mut arns: Vec<String> = resolved.iter().map(|r| r.arn.to_string()).collect();
    arns.sort();
    arns.dedup();
    let mut members: Vec<String> = resolved
        .iter()
        .map(|r| r.arn.resource_name().to_string())
        .collect();
    members.sort();
    members.dedup();
    Ok(Resolution {
        desired: Desired::Group(DesiredGroup { name, members }),
        dependency_version: token(arns.iter().map(String::as_str)),
    })
}

async fn attachment<S: ObjectStore>(
    resolver: &Resolver<S>,
    meta: &ObjectMeta,
    spec: &PolicyAttachmentSpec,
) -> Result<Resolution, ReconcileError> {
    spec.validate()?;
    let referrer = referrer(Kind::PolicyAttachment, meta);
    let policy_arn = match &spec.policy {
        Some(reference) => {
            resolver
                .resolve(Kind::Policy, &reference.key_in(&meta.namespace), &referrer)
                .await?
                .arn
        }
        None => spec.external_policy_arn.parse::<Arn>()?,
    };
    let target = resolver
        .resolve(
            spec.target.target_type.kind(),
            &spec.target.key_in(&meta.namespace),
            &referrer,
        )
        .await?;
    if target.arn.resource_type() != spec.target.target_type.arn_resource_type() {
        return Err(ReconcileError::InvalidSpec(format!(
            "target {} is not a {}",
            target.arn, spec.target.target_type
        )));
    }
    // A recreated target loses its attachments; its generation and token
    // move when that happens, which forces a re-attach here.
    let policy = policy_arn.to_string();
    let target_arn = target.arn.to_string();
    let generation = target.observed_generation.to_string();
    let dependency_version = token([
        policy.as_str(),
        target_arn.as_str(),
        generation.as_str(),
        target.dependency_version.as_str(),
    ]);
    Ok(Resolution {
        desired: Desired::Attachment(DesiredAttachment {
            policy_arn,
            target_arn: target.arn,
        }),
        dependency_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamsync_kernel::OneOrMany;

    #[test]
    fn web_identity_subject_uses_declared_namespace() {
        let remote = RemoteConfig {
            oidc_provider_arn: Some(
                "arn:aws:iam::123456789012:oidc-provider/oidc.eks.eu-west-1.amazonaws.com/id/ABC"
                    .to_string(),
            ),
            ..RemoteConfig::default()
        };
        let meta = ObjectMeta::new("payments", "api");
        let statement = web_identity_statement(&remote, &meta).expect("statement");
        let block = &statement.conditions["StringEquals"];
        assert_eq!(
            block["oidc.eks.eu-west-1.amazonaws.com/id/ABC:sub"],
            OneOrMany::from("system:serviceaccount:payments:api")
        );
        assert_eq!(
            block["oidc.eks.eu-west-1.amazonaws.com/id/ABC:aud"],
            OneOrMany::from(WEB_IDENTITY_AUDIENCE)
        );
    }

    #[test]
    fn web_identity_without_provider_is_invalid() {
        let err = web_identity_statement(&RemoteConfig::default(), &ObjectMeta::new("a", "b"))
            .expect_err("provider is required");
        assert!(matches!(err, ReconcileError::InvalidSpec(_)));
    }

    #[test]
    fn prefixed_names_are_validated() {
        let remote = RemoteConfig {
            resource_prefix: "x".repeat(60),
            ..RemoteConfig::default()
        };
        let err = user(&remote, &ObjectMeta::new("default", "alice"), &UserSpec::default())
            .expect_err("too long for a user");
        assert!(matches!(err, ReconcileError::InvalidSpec(_)));
    }

    #[test]
    fn token_separates_parts() {
        assert_ne!(token(["ab", "c"]), token(["a", "bc"]));
        assert_eq!(token(["a"]).len(), 64);
    }
}
