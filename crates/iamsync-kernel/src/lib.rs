//! # iamsync kernel
//!
//! Pure data for the convergence engine. Nothing in this crate performs
//! I/O: it describes what an operator declares, what the engine observed,
//! and the canonical policy document sent to the remote identity service.
//!
//! ## Layout
//!
//! ```text
//! ObjectMeta / Lifecycle   ← declared identity, generation, finalizers
//!     │
//! Resource { spec, status } ← one record per declared object
//!     │
//! PolicyDocument           ← canonical, order-stable statement list
//!     │
//! Arn / naming             ← remote identities and name grammar
//! ```

pub mod arn;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod meta;
pub mod naming;
pub mod reference;
pub mod resource;
pub mod selector;
pub mod status;

pub use arn::Arn;
pub use document::{
    ConditionBlock, Effect, OneOrMany, POLICY_VERSION, PolicyDocument, PolicyStatementEntry,
    StatementEntry, marshal, normalize_conditions,
};
pub use error::KernelError;
pub use lifecycle::Lifecycle;
pub use meta::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta};
pub use naming::validate_remote_name;
pub use reference::{ResourceReference, TargetReference, TargetType};
pub use resource::{
    AssumeRolePolicySpec, GroupSpec, Kind, PolicyAttachmentSpec, PolicySpec, Resource,
    ResourceSpec, RoleSpec, UserSpec,
};
pub use selector::LabelSelector;
pub use status::{AwsObjectStatus, SyncState};
