//! Convergence engine for declared IAM objects.
//!
//! `Controller` is generic over the store and parameterized by a kind's
//! `RemoteAdapter`; `Manager` feeds controllers from store watches through
//! a per-key serialized work queue.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod desired;
pub mod error;
pub mod guard;
pub mod manager;
pub mod phase;
pub mod queue;
pub mod resolver;

pub use backoff::RequeuePolicy;
pub use config::ControllerConfig;
pub use controller::{Action, Controller};
pub use desired::{Resolution, resolve_desired};
pub use error::{ReconcileError, RetryClass};
pub use guard::DependencyGuard;
pub use manager::{Manager, SettleReport, status_report};
pub use phase::{ObjectReport, ReconcilePhase};
pub use queue::{WorkKey, WorkQueue};
pub use resolver::{Resolved, Resolver};
