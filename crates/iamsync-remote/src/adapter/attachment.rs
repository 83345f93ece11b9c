use super::{Desired, RemoteAdapter, RemoteIdentity, UpdateStrategy, mismatch};
use crate::api::{IamApi, Principal};
use crate::error::RemoteError;
use async_trait::async_trait;
use iamsync_kernel::{Arn, Kind};
use std::sync::Arc;

/// Policy attachments to roles, users and groups alike.
///
/// The identity is the `(policy, target)` pair; any change is a detach of
/// the recorded pair followed by an attach of the desired one.
pub struct AttachmentAdapter {
    api: Arc<dyn IamApi>,
}

impl AttachmentAdapter {
    pub fn new(api: Arc<dyn IamApi>) -> Self {
        Self { api }
    }
}

fn principal_of(target: &Arn) -> Result<Principal, RemoteError> {
    Principal::from_arn(target).ok_or_else(|| {
        RemoteError::Invalid(format!(
            "{target} is not a role, user or group identity"
        ))
    })
}

#[async_trait]
impl RemoteAdapter for AttachmentAdapter {
    fn kind(&self) -> Kind {
        Kind::PolicyAttachment
    }

    fn strategy(&self) -> UpdateStrategy {
        UpdateStrategy::Recreate
    }

    async fn create(&self, desired: &Desired) -> Result<RemoteIdentity, RemoteError> {
        let Desired::Attachment(attachment) = desired else {
            return Err(mismatch(Kind::PolicyAttachment, desired));
        };
        let principal = principal_of(&attachment.target_arn)?;
        self.api
            .attach_policy(&principal, &attachment.policy_arn)
            .await?;
        Ok(RemoteIdentity {
            arn: attachment.target_arn.clone(),
            policy_arn: Some(attachment.policy_arn.clone()),
        })
    }

    async fn delete(&self, current: &RemoteIdentity) -> Result<(), RemoteError> {
        let Some(policy_arn) = &current.policy_arn else {
            // Nothing was ever attached under this identity.
            return Ok(());
        };
        let principal = principal_of(&current.arn)?;
        self.api.detach_policy(&principal, policy_arn).await
    }
}
