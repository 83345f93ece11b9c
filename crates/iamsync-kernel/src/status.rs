//! Observed status block written back by the engine.
//!
//! This is the only state the engine persists. Readers must tolerate
//! unknown fields, so everything beyond the core schema is optional and
//! omitted when empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Syncing,
    Ok,
    Error,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syncing => "SYNCING",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsObjectStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_attempt: Option<DateTime<Utc>>,
    /// Remote identity; empty until the first successful create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arn: String,
    #[serde(default)]
    pub observed_generation: u64,
    /// Attachments only: the policy half of the attached `(policy, target)` pair.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_arn: String,
    /// Version token of the resolved dependencies at the last success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dependency_version: String,
    /// Groups only: member user names synced at the last success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

impl AwsObjectStatus {
    pub fn has_arn(&self) -> bool {
        !self.arn.is_empty()
    }

    /// Converged for `generation` against dependencies at `dependency_version`.
    pub fn is_fixpoint(&self, generation: u64, dependency_version: &str) -> bool {
        self.state == Some(SyncState::Ok)
            && self.observed_generation == generation
            && self.dependency_version == dependency_version
    }

    pub fn mark_syncing(&mut self, now: DateTime<Utc>) {
        self.state = Some(SyncState::Syncing);
        self.last_sync_attempt = Some(now);
    }

    /// Record a failure. The ARN is deliberately untouched.
    pub fn mark_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.state = Some(SyncState::Error);
        self.message = message.into();
        self.last_sync_attempt = Some(now);
    }

    pub fn mark_ok(&mut self, generation: u64, now: DateTime<Utc>) {
        self.state = Some(SyncState::Ok);
        self.message = "reconciled".to_string();
        self.observed_generation = generation;
        self.last_sync_attempt = Some(now);
    }
}
