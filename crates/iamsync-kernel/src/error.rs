//! Error types for kernel validation.

/// Errors raised while validating declared objects or remote identities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// A string is not a well-formed ARN.
    #[error("invalid ARN {value:?}: {reason}")]
    InvalidArn { value: String, reason: String },

    /// A remote object name violates the identity service's name grammar.
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: String,
        name: String,
        reason: String,
    },

    /// A declared spec is self-contradictory or incomplete.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A finalizer transition was requested from a state that forbids it.
    #[error("lifecycle transition refused: {0}")]
    Lifecycle(String),
}
