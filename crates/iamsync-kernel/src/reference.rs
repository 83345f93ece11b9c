//! Named pointers between declared objects.
//!
//! References are resolved on every reconcile pass and never cached: the
//! referent's remote identity may change between passes.

use crate::meta::ObjectKey;
use crate::resource::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    pub name: String,
    /// Blank means the referring object's namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ResourceReference {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn key_in(&self, referrer_namespace: &str) -> ObjectKey {
        let namespace = if self.namespace.is_empty() {
            referrer_namespace
        } else {
            &self.namespace
        };
        ObjectKey::new(namespace, self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetType {
    Role,
    User,
    Group,
}

impl TargetType {
    pub fn kind(self) -> Kind {
        match self {
            Self::Role => Kind::Role,
            Self::User => Kind::User,
            Self::Group => Kind::Group,
        }
    }

    /// Resource-type segment of an IAM ARN for this principal type.
    pub fn arn_resource_type(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::User => "user",
            Self::Group => "group",
        }
    }

    pub fn from_arn_resource_type(value: &str) -> Option<Self> {
        match value {
            "role" => Some(Self::Role),
            "user" => Some(Self::User),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReference {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl TargetReference {
    pub fn new(target_type: TargetType, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            target_type,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn key_in(&self, referrer_namespace: &str) -> ObjectKey {
        ResourceReference::new(self.namespace.clone(), self.name.clone()).key_in(referrer_namespace)
    }
}
