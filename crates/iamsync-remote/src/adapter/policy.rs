use super::{Desired, DesiredPolicy, RemoteAdapter, RemoteIdentity, UpdateStrategy, mismatch};
use crate::api::{CreatePolicyRequest, IamApi};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use iamsync_kernel::{Arn, Kind};
use std::sync::Arc;
use tracing::{debug, info};

/// Managed policies: content changes become a new default version.
pub struct PolicyAdapter {
    api: Arc<dyn IamApi>,
    config: RemoteConfig,
}

impl PolicyAdapter {
    pub fn new(api: Arc<dyn IamApi>, config: RemoteConfig) -> Self {
        Self { api, config }
    }

    /// Create a new default version, pruning the oldest non-default
    /// version once if the version cap is hit.
    async fn publish_version(&self, arn: &Arn, policy: &DesiredPolicy) -> Result<(), RemoteError> {
        let document = policy.document.to_json();
        match self.api.create_policy_version(arn, &document, true).await {
            Err(RemoteError::LimitExceeded(reason)) => {
                info!(policy = %arn, %reason, "version cap reached, pruning oldest version");
                self.prune_oldest_version(arn).await?;
                self.api
                    .create_policy_version(arn, &document, true)
                    .await
                    .map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    async fn prune_oldest_version(&self, arn: &Arn) -> Result<(), RemoteError> {
        let versions = self.api.list_policy_versions(arn).await?;
        let Some(oldest) = versions
            .iter()
            .filter(|v| !v.is_default)
            .min_by_key(|v| v.created_at)
        else {
            return Err(RemoteError::LimitExceeded(format!(
                "policy {arn} has no non-default version to prune"
            )));
        };
        debug!(policy = %arn, version = %oldest.version_id, "deleting policy version");
        self.api.delete_policy_version(arn, &oldest.version_id).await
    }
}

#[async_trait]
impl RemoteAdapter for PolicyAdapter {
    fn kind(&self) -> Kind {
        Kind::Policy
    }

    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::InPlace
    }

    async fn create(&self, desired: &Desired) -> Result<RemoteIdentity, RemoteError> {
        let Desired::Policy(policy) = desired else {
            return Err(mismatch(Kind::Policy, desired));
        };
        let request = CreatePolicyRequest {
            name: policy.name.clone(),
            description: policy.description.clone(),
            document: policy.document.to_json(),
        };
        match self.api.create_policy(&request).await {
            Ok(record) => Ok(RemoteIdentity::new(record.arn)),
            Err(RemoteError::AlreadyExists { .. }) => {
                // Status was lost but the policy is ours by name: adopt it.
                let arn = self.config.arn_for(Kind::Policy, &policy.name);
                info!(policy = %arn, "adopting existing policy");
                self.publish_version(&arn, policy).await?;
                Ok(RemoteIdentity::new(arn))
            }
            Err(err) => Err(err),
        }
    }

    async fn update(
        &self,
        current: &RemoteIdentity,
        desired: &Desired,
    ) -> Result<RemoteIdentity, RemoteError> {
        let Desired::Policy(policy) = desired else {
            return Err(mismatch(Kind::Policy, desired));
        };
        match self.publish_version(&current.arn, policy).await {
            Ok(()) => Ok(RemoteIdentity::new(current.arn.clone())),
            Err(err) if err.is_not_found() => self.create(desired).await,
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, current: &RemoteIdentity) -> Result<(), RemoteError> {
        for version in self.api.list_policy_versions(&current.arn).await? {
            if version.is_default {
                continue;
            }
            match self
                .api
                .delete_policy_version(&current.arn, &version.version_id)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        self.api.delete_policy(&current.arn).await
    }
}
