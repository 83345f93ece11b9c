//! Remote side of iamsync.
//!
//! This crate is intentionally thin: `IamApi` mirrors the identity
//! service's own primitives, and each adapter translates one desired
//! document into the calls needed to realize it. Retry policy lives in
//! the controller, never here.

pub mod adapter;
pub mod api;
pub mod config;
pub mod error;
pub mod memory;

pub use adapter::{
    AttachmentAdapter, Desired, DesiredAttachment, DesiredGroup, DesiredPolicy, DesiredRole,
    DesiredUser, GroupAdapter, PolicyAdapter, RemoteAdapter, RemoteIdentity, RoleAdapter,
    UpdateStrategy, UserAdapter, adapter_for,
};
pub use api::{
    CreatePolicyRequest, CreateRoleRequest, CreateUserRequest, GroupRecord, IamApi,
    PolicyRecord, PolicyVersion, Principal, RoleRecord, UserRecord,
};
pub use config::RemoteConfig;
pub use error::{RemoteError, RemoteErrorClass};
pub use memory::{IamState, InMemoryIam, RemoteCall};
