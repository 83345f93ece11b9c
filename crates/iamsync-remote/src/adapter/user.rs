use super::{Desired, RemoteAdapter, RemoteIdentity, UpdateStrategy, detach_all, mismatch};
use crate::api::{CreateUserRequest, IamApi, Principal};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use iamsync_kernel::Kind;
use std::sync::Arc;
use tracing::info;

/// Users: tags are the only mutable content and are reconciled in place.
pub struct UserAdapter {
    api: Arc<dyn IamApi>,
    config: RemoteConfig,
}

impl UserAdapter {
    pub fn new(api: Arc<dyn IamApi>, config: RemoteConfig) -> Self {
        Self { api, config }
    }
}

#[async_trait]
impl RemoteAdapter for UserAdapter {
    fn kind(&self) -> Kind {
        Kind::User
    }

    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::InPlace
    }

    async fn create(&self, desired: &Desired) -> Result<RemoteIdentity, RemoteError> {
        let Desired::User(user) = desired else {
            return Err(mismatch(Kind::User, desired));
        };
        let request = CreateUserRequest {
            name: user.name.clone(),
            tags: user.tags.clone(),
        };
        match self.api.create_user(&request).await {
            Ok(record) => Ok(RemoteIdentity::new(record.arn)),
            Err(err) if err.is_already_exists() => {
                let existing = RemoteIdentity::new(self.config.arn_for(Kind::User, &user.name));
                info!(user = %existing.arn, "adopting existing user");
                self.update(&existing, desired).await
            }
            Err(err) => Err(err),
        }
    }

    async fn update(
        &self,
        current: &RemoteIdentity,
        desired: &Desired,
    ) -> Result<RemoteIdentity, RemoteError> {
        let Desired::User(user) = desired else {
            return Err(mismatch(Kind::User, desired));
        };
        let existing = match self.api.get_user(current.arn.resource_name()).await {
            Ok(existing) => existing,
            Err(err) if err.is_not_found() => return self.create(desired).await,
            Err(err) => return Err(err),
        };
        let stale: Vec<String> = existing
            .tags
            .keys()
            .filter(|key| !user.tags.contains_key(*key))
            .cloned()
            .collect();
        if !stale.is_empty() {
            self.api.untag_user(&existing.name, &stale).await?;
        }
        if existing.tags != user.tags && !user.tags.is_empty() {
            self.api.tag_user(&existing.name, &user.tags).await?;
        }
        Ok(RemoteIdentity::new(self.config.arn_for(Kind::User, &existing.name)))
    }

    async fn delete(&self, current: &RemoteIdentity) -> Result<(), RemoteError> {
        let name = current.arn.resource_name();
        for group in self.api.list_groups_for_user(name).await? {
            match self.api.remove_user_from_group(&group, name).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        detach_all(self.api.as_ref(), &Principal::User(name.to_string())).await?;
        self.api.delete_user(name).await
    }
}
