//! Explicit deletion state machine layered over the finalizer list.
//!
//! The store only understands finalizer strings; the engine reasons about
//! the enum below and changes finalizers exclusively through the checked
//! transitions on `ObjectMeta`.

use crate::error::KernelError;
use crate::meta::ObjectMeta;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    /// Not deleting. `registered` is whether our cleanup obligation is recorded.
    Active { registered: bool },
    /// Deletion requested while our finalizer still holds the record.
    Deleting,
    /// Deletion requested and our finalizer released.
    Gone,
}

impl Lifecycle {
    pub fn of(meta: &ObjectMeta, finalizer: &str) -> Self {
        let registered = meta.finalizers.iter().any(|f| f == finalizer);
        match (meta.deletion_requested(), registered) {
            (false, registered) => Self::Active { registered },
            (true, true) => Self::Deleting,
            (true, false) => Self::Gone,
        }
    }
}

impl ObjectMeta {
    pub fn lifecycle(&self, finalizer: &str) -> Lifecycle {
        Lifecycle::of(self, finalizer)
    }

    /// `Active{registered: false}` → `Active{registered: true}`.
    ///
    /// Returns whether the metadata changed. Refused once deletion is requested.
    pub fn register_finalizer(&mut self, finalizer: &str) -> Result<bool, KernelError> {
        match self.lifecycle(finalizer) {
            Lifecycle::Active { registered: true } => Ok(false),
            Lifecycle::Active { registered: false } => {
                self.finalizers.push(finalizer.to_string());
                Ok(true)
            }
            Lifecycle::Deleting | Lifecycle::Gone => Err(KernelError::Lifecycle(format!(
                "cannot register {finalizer} on {} while deletion is requested",
                self.key()
            ))),
        }
    }

    /// `Deleting` → `Gone`. Only legal after deletion was requested.
    pub fn release_finalizer(&mut self, finalizer: &str) -> Result<(), KernelError> {
        match self.lifecycle(finalizer) {
            Lifecycle::Deleting => {
                self.finalizers.retain(|f| f != finalizer);
                Ok(())
            }
            Lifecycle::Gone => Ok(()),
            Lifecycle::Active { .. } => Err(KernelError::Lifecycle(format!(
                "cannot release {finalizer} on {}: deletion not requested",
                self.key()
            ))),
        }
    }
}
