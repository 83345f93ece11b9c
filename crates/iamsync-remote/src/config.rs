//! Remote connection settings, passed explicitly to every adapter.

use iamsync_kernel::{Arn, Kind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RemoteConfig {
    pub partition: String,
    pub region: String,
    pub account_id: String,
    /// Prepended to every remote role, policy, user and group name.
    pub resource_prefix: String,
    /// OIDC provider trusted by roles that ask for a web-identity statement.
    pub oidc_provider_arn: Option<String>,
    pub default_max_session_duration_secs: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            partition: "aws".to_string(),
            region: "eu-west-1".to_string(),
            account_id: "000000000000".to_string(),
            resource_prefix: String::new(),
            oidc_provider_arn: None,
            default_max_session_duration_secs: 3600,
        }
    }
}

impl RemoteConfig {
    /// Remote name for a declared object: prefix plus override or declared name.
    pub fn remote_name(&self, declared: &str, override_name: &str) -> String {
        let base = if override_name.is_empty() {
            declared
        } else {
            override_name
        };
        format!("{}{}", self.resource_prefix, base)
    }

    /// ARN the service assigns to `name` of `kind` in this account.
    pub fn arn_for(&self, kind: Kind, name: &str) -> Arn {
        let resource_type = match kind {
            Kind::Role => "role",
            Kind::User => "user",
            Kind::Group => "group",
            _ => "policy",
        };
        Arn::iam(self.partition.clone(), self.account_id.clone(), resource_type, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_name_applies_prefix_to_override() {
        let config = RemoteConfig {
            resource_prefix: "k8s-".to_string(),
            ..RemoteConfig::default()
        };
        assert_eq!(config.remote_name("reader", ""), "k8s-reader");
        assert_eq!(config.remote_name("reader", "DataReader"), "k8s-DataReader");
        assert_eq!(
            config.arn_for(Kind::Policy, "k8s-reader").to_string(),
            "arn:aws:iam::000000000000:policy/k8s-reader"
        );
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"account_id":"123456789012"}"#).expect("config should parse");
        assert_eq!(config.account_id, "123456789012");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.default_max_session_duration_secs, 3600);
    }
}
