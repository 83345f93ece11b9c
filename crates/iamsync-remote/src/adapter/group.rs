use super::{
    Desired, RemoteAdapter, RemoteIdentity, UpdateStrategy, clear_unrecorded, detach_all, mismatch,
};
use crate::api::{IamApi, Principal};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use iamsync_kernel::Kind;
use std::sync::Arc;
use tracing::{debug, warn};

/// Groups: recreated with their declared members on every change.
pub struct GroupAdapter {
    api: Arc<dyn IamApi>,
    config: RemoteConfig,
}

impl GroupAdapter {
    pub fn new(api: Arc<dyn IamApi>, config: RemoteConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl RemoteAdapter for GroupAdapter {
    fn kind(&self) -> Kind {
        Kind::Group
    }

    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Recreate
    }

    async fn create(&self, desired: &Desired) -> Result<RemoteIdentity, RemoteError> {
        let Desired::Group(group) = desired else {
            return Err(mismatch(Kind::Group, desired));
        };
        let record = match self.api.create_group(&group.name).await {
            Err(err) if err.is_already_exists() => {
                clear_unrecorded(self, self.config.arn_for(Kind::Group, &group.name)).await?;
                self.api.create_group(&group.name).await?
            }
            other => other?,
        };
        let identity = RemoteIdentity::new(record.arn);

        for user in &group.members {
            if let Err(err) = self.api.add_user_to_group(&group.name, user).await {
                // Never leave a half-populated group behind an unrecorded ARN.
                if let Err(rollback) = self.delete(&identity).await {
                    warn!(group = %group.name, error = %rollback, "cannot roll back partial group");
                }
                return Err(err);
            }
        }
        debug!(group = %group.name, members = group.members.len(), "group created");
        Ok(identity)
    }

    async fn delete(&self, current: &RemoteIdentity) -> Result<(), RemoteError> {
        let name = current.arn.resource_name();
        let record = self.api.get_group(name).await?;
        for user in &record.users {
            match self.api.remove_user_from_group(name, user).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        detach_all(self.api.as_ref(), &Principal::Group(name.to_string())).await?;
        self.api.delete_group(name).await
    }
}
