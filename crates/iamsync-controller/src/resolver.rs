//! Identity reference resolution.
//!
//! Read-only against the store. Nothing is cached: a referent's remote
//! identity may change between passes.

use crate::error::ReconcileError;
use iamsync_kernel::{
    Arn, Kind, LabelSelector, ObjectKey, PolicyDocument, Resource, ResourceSpec, marshal,
};
use iamsync_store::ObjectStore;
use std::sync::Arc;

/// Remote identity of a referent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub arn: Arn,
    /// Generation the referent's remote object was last converged for.
    pub observed_generation: u64,
    /// The referent's own dependency token at its last success.
    pub dependency_version: String,
}

pub struct Resolver<S> {
    store: Arc<S>,
}

impl<S: ObjectStore> Resolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Resolve `kind`/`key` to its remote identity on behalf of `referrer`.
    pub async fn resolve(
        &self,
        kind: Kind,
        key: &ObjectKey,
        referrer: &str,
    ) -> Result<Resolved, ReconcileError> {
        let referent = self.lookup(kind, key, referrer).await?;
        identity_of(&referent, referrer)
    }

    /// Canonical document of a shared trust policy.
    pub async fn trust_policy(
        &self,
        key: &ObjectKey,
        referrer: &str,
    ) -> Result<PolicyDocument, ReconcileError> {
        let referent = self.lookup(Kind::AssumeRolePolicy, key, referrer).await?;
        match &referent.spec {
            ResourceSpec::AssumeRolePolicy(spec) => {
                spec.validate()?;
                Ok(marshal(&spec.statement))
            }
            other => Err(ReconcileError::InvalidSpec(format!(
                "{key} is a {}, not an AssumeRolePolicy",
                other.kind()
            ))),
        }
    }

    /// Remote identities of every declared user matching `selector`.
    ///
    /// Users matched but not yet provisioned fail the whole resolution so a
    /// group never converges onto a partial member list.
    pub async fn selected_users(
        &self,
        selector: &LabelSelector,
        referrer: &str,
    ) -> Result<Vec<Resolved>, ReconcileError> {
        let users = self.store.list(Kind::User, selector).await?;
        users
            .iter()
            .filter(|user| !user.metadata.deletion_requested())
            .map(|user| identity_of(user, referrer))
            .collect()
    }

    async fn lookup(
        &self,
        kind: Kind,
        key: &ObjectKey,
        referrer: &str,
    ) -> Result<Resource, ReconcileError> {
        match self.store.get(kind, key).await {
            Ok(resource) => Ok(resource),
            Err(err) if err.is_not_found() => Err(ReconcileError::Unresolved {
                kind,
                key: key.clone(),
                referrer: referrer.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }
}

fn identity_of(referent: &Resource, referrer: &str) -> Result<Resolved, ReconcileError> {
    if !referent.status.has_arn() {
        return Err(ReconcileError::NotYetProvisioned {
            kind: referent.kind(),
            key: referent.key(),
            referrer: referrer.to_string(),
        });
    }
    let arn = referent.status.arn.parse::<Arn>()?;
    Ok(Resolved {
        arn,
        observed_generation: referent.status.observed_generation,
        dependency_version: referent.status.dependency_version.clone(),
    })
}
