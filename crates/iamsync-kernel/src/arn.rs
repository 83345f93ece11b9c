//! Remote object identities.

use crate::error::KernelError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// `arn:<partition>:<service>:<region>:<account>:<resource>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl Arn {
    /// Global IAM identity, e.g. `arn:aws:iam::123456789012:role/app`.
    pub fn iam(
        partition: impl Into<String>,
        account_id: impl Into<String>,
        resource_type: &str,
        name: &str,
    ) -> Self {
        Self {
            partition: partition.into(),
            service: "iam".to_string(),
            region: String::new(),
            account_id: account_id.into(),
            resource: format!("{resource_type}/{name}"),
        }
    }

    /// Segment before the first `/` (`role`, `policy`, `oidc-provider`, ...).
    pub fn resource_type(&self) -> &str {
        self.resource
            .split_once('/')
            .map_or(self.resource.as_str(), |(kind, _)| kind)
    }

    /// Segment after the last `/`: the name the identity service keys on.
    pub fn resource_name(&self) -> &str {
        self.resource
            .rsplit_once('/')
            .map_or(self.resource.as_str(), |(_, name)| name)
    }

    /// Everything after the resource type, e.g. an OIDC provider's host path.
    pub fn resource_path(&self) -> &str {
        self.resource
            .split_once('/')
            .map_or("", |(_, path)| path)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl FromStr for Arn {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| KernelError::InvalidArn {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = value.splitn(6, ':');
        if parts.next() != Some("arn") {
            return Err(invalid("must start with `arn:`"));
        }
        let mut next = |field: &str| {
            parts
                .next()
                .map(str::to_string)
                .ok_or_else(|| invalid(&format!("missing {field}")))
        };
        let partition = next("partition")?;
        let service = next("service")?;
        let region = next("region")?;
        let account_id = next("account")?;
        let resource = next("resource")?;
        if partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err(invalid("partition, service and resource must be non-empty"));
        }
        Ok(Self {
            partition,
            service,
            region,
            account_id,
            resource,
        })
    }
}

impl Serialize for Arn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Arn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
