//! Typed failures surfaced by the identity service.

/// Errors returned by `IamApi` calls and adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("{entity} already exists")]
    AlreadyExists { entity: String },

    #[error("{entity} not found")]
    NotFound { entity: String },

    /// A quota such as the policy version cap was hit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// The entity still has attachments, members or versions.
    #[error("delete conflict: {0}")]
    DeleteConflict(String),

    /// Network failure or throttling.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed input; retrying the same request cannot succeed.
    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorClass {
    AlreadyExists,
    NotFound,
    LimitExceeded,
    Conflict,
    Transient,
    Invalid,
}

impl RemoteError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn already_exists(entity: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
        }
    }

    pub fn class(&self) -> RemoteErrorClass {
        match self {
            Self::AlreadyExists { .. } => RemoteErrorClass::AlreadyExists,
            Self::NotFound { .. } => RemoteErrorClass::NotFound,
            Self::LimitExceeded(_) => RemoteErrorClass::LimitExceeded,
            Self::DeleteConflict(_) => RemoteErrorClass::Conflict,
            Self::Transient(_) => RemoteErrorClass::Transient,
            Self::Invalid(_) => RemoteErrorClass::Invalid,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == RemoteErrorClass::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.class() == RemoteErrorClass::AlreadyExists
    }
}
