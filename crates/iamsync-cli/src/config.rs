//! `iamsync.toml`: remote and controller settings.
//!
//! ```toml
//! [remote]
//! account_id = "123456789012"
//! resource_prefix = "k8s-"
//! oidc_provider_arn = "arn:aws:iam::123456789012:oidc-provider/oidc.example.com/id/ABC"
//!
//! [controller]
//! workers = 8
//! reconcile_timeout_ms = 10000
//! ```

use crate::cli::StateArgs;
use iamsync_controller::ControllerConfig;
use iamsync_remote::RemoteConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "iamsync.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub remote: RemoteConfig,
    pub controller: ControllerConfig,
}

impl Settings {
    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("invalid config: {e}"))
    }

    /// Load the explicit config, or `iamsync.toml` when it exists, then
    /// apply command-line overrides.
    pub fn load(args: &StateArgs) -> Result<Self, String> {
        let mut settings = match &args.config {
            Some(path) => Self::read(Path::new(path))?,
            None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                Self::read(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        if let Some(region) = &args.region {
            settings.remote.region = region.clone();
        }
        if let Some(account_id) = &args.account_id {
            settings.remote.account_id = account_id.clone();
        }
        if let Some(prefix) = &args.resource_prefix {
            settings.remote.resource_prefix = prefix.clone();
        }
        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        Self::from_toml(&raw).map_err(|e| format!("{}: {e}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tables_use_defaults() {
        let settings = Settings::from_toml("").expect("empty config");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_tables_fill_remaining_fields() {
        let settings = Settings::from_toml(
            r#"
            [remote]
            account_id = "123456789012"
            resource_prefix = "k8s-"

            [controller]
            workers = 8
            "#,
        )
        .expect("config parses");
        assert_eq!(settings.remote.account_id, "123456789012");
        assert_eq!(settings.remote.partition, "aws");
        assert_eq!(settings.controller.workers, 8);
        assert_eq!(
            settings.controller.reconcile_timeout_ms,
            ControllerConfig::default().reconcile_timeout_ms
        );
    }

    #[test]
    fn mistyped_field_is_rejected() {
        let err = Settings::from_toml("[controller]\nworkers = \"many\"\n")
            .expect_err("workers must be a number");
        assert!(err.contains("invalid config"));
    }

    #[test]
    fn flags_override_file_values() {
        let args = StateArgs {
            state_dir: ".iamsync".to_string(),
            config: None,
            region: Some("us-east-1".to_string()),
            account_id: Some("210987654321".to_string()),
            resource_prefix: None,
        };
        let settings = Settings::load(&args).expect("defaults");
        assert_eq!(settings.remote.region, "us-east-1");
        assert_eq!(settings.remote.account_id, "210987654321");
    }
}
