//! Reporting view of where an object sits in the convergence state machine.

use iamsync_kernel::{Kind, Lifecycle, ObjectKey, Resource, SyncState};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReconcilePhase {
    /// Declared, never touched by the engine.
    Pending,
    /// Cleanup obligation recorded, no remote work attempted yet.
    Registering,
    /// Remote work in flight, or a spec change not yet applied.
    Converging,
    Converged,
    Failed,
    Deleting,
    Gone,
}

impl ReconcilePhase {
    pub fn observe(resource: &Resource) -> Self {
        let status = &resource.status;
        match resource.metadata.lifecycle(resource.kind().finalizer()) {
            Lifecycle::Gone => Self::Gone,
            Lifecycle::Deleting => Self::Deleting,
            Lifecycle::Active { registered } => match (status.state, registered) {
                (Some(SyncState::Error), _) => Self::Failed,
                (Some(SyncState::Ok), true)
                    if status.observed_generation == resource.metadata.generation =>
                {
                    Self::Converged
                }
                (Some(_), _) => Self::Converging,
                (None, true) => Self::Registering,
                (None, false) => Self::Pending,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Registering => "Registering",
            Self::Converging => "Converging",
            Self::Converged => "Converged",
            Self::Failed => "Failed",
            Self::Deleting => "Deleting",
            Self::Gone => "Gone",
        }
    }
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReport {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
    pub phase: ReconcilePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arn: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ObjectReport {
    pub fn of(resource: &Resource) -> Self {
        let ObjectKey { namespace, name } = resource.key();
        Self {
            kind: resource.kind(),
            namespace,
            name,
            phase: ReconcilePhase::observe(resource),
            state: resource.status.state,
            arn: resource.status.arn.clone(),
            message: resource.status.message.clone(),
        }
    }
}
