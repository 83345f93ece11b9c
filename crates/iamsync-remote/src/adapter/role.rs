use super::{
    Desired, RemoteAdapter, RemoteIdentity, UpdateStrategy, clear_unrecorded, detach_all, mismatch,
};
use crate::api::{CreateRoleRequest, IamApi, Principal};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use iamsync_kernel::Kind;
use std::sync::Arc;
use tracing::debug;

/// Roles: the trust policy and session settings are replaced by recreation.
pub struct RoleAdapter {
    api: Arc<dyn IamApi>,
    config: RemoteConfig,
}

impl RoleAdapter {
    pub fn new(api: Arc<dyn IamApi>, config: RemoteConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl RemoteAdapter for RoleAdapter {
    fn kind(&self) -> Kind {
        Kind::Role
    }

    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Recreate
    }

    async fn create(&self, desired: &Desired) -> Result<RemoteIdentity, RemoteError> {
        let Desired::Role(role) = desired else {
            return Err(mismatch(Kind::Role, desired));
        };
        let max_session_duration = match role.max_session_duration {
            0 => self.config.default_max_session_duration_secs,
            secs => secs,
        };
        let request = CreateRoleRequest {
            name: role.name.clone(),
            description: role.description.clone(),
            assume_role_policy_document: role.trust_policy.to_json(),
            max_session_duration,
        };
        let record = match self.api.create_role(&request).await {
            Err(err) if err.is_already_exists() => {
                // Its trust policy is unknown, so it is replaced rather than adopted as-is.
                clear_unrecorded(self, self.config.arn_for(Kind::Role, &role.name)).await?;
                self.api.create_role(&request).await?
            }
            other => other?,
        };
        debug!(role = %record.name, arn = %record.arn, "role created");
        Ok(RemoteIdentity::new(record.arn))
    }

    async fn delete(&self, current: &RemoteIdentity) -> Result<(), RemoteError> {
        let name = current.arn.resource_name();
        detach_all(self.api.as_ref(), &Principal::Role(name.to_string())).await?;
        self.api.delete_role(name).await
    }
}
