use std::fmt;
use thiserror::Error;

/// Classification of a failed collaborator call, decided once at the SDK boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryErrorKind {
    NotFound,
    /// The policy and target exist but the policy is not attached to it.
    NotAttached,
    Throttled,
    AccessDenied,
    InvalidRequest,
    Unavailable,
    Other,
}

impl fmt::Display for DirectoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirectoryErrorKind::NotFound => "not found",
            DirectoryErrorKind::NotAttached => "not attached",
            DirectoryErrorKind::Throttled => "throttled",
            DirectoryErrorKind::AccessDenied => "access denied",
            DirectoryErrorKind::InvalidRequest => "invalid request",
            DirectoryErrorKind::Unavailable => "unavailable",
            DirectoryErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {kind}: {message}")]
pub struct DirectoryError {
    pub kind: DirectoryErrorKind,
    pub operation: String,
    pub message: String,
}

impl DirectoryError {
    pub fn new(kind: DirectoryErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind, operation: operation.into(), message: message.into() }
    }

    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DirectoryErrorKind::NotFound, operation, message)
    }

    pub fn not_attached(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DirectoryErrorKind::NotAttached, operation, message)
    }

    pub fn is_not_found(&self) -> bool { self.kind == DirectoryErrorKind::NotFound }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind { Certificate, ThingType, Policy, PolicyAttachment }

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Certificate => "certificate",
            ResourceKind::ThingType => "thing type",
            ResourceKind::Policy => "policy",
            ResourceKind::PolicyAttachment => "policy attachment",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason { Requested, DeadlineExceeded }

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CancelReason::Requested => "cancellation requested",
            CancelReason::DeadlineExceeded => "deadline exceeded",
        })
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("policy directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    #[error("operation cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unexpected format for import id ({0}), expected <policy-name>|<target>")]
    InvalidImportId(String),

    #[error("{operation}: resource still present after {attempts} attempts")]
    StillPresent { operation: String, attempts: u32 },
}

impl ReconcileError {
    pub fn invalid(msg: impl Into<String>) -> Self { Self::InvalidInput(msg.into()) }

    /// Collaborator error kind, if this error came from the directory.
    pub fn directory_kind(&self) -> Option<DirectoryErrorKind> {
        match self {
            ReconcileError::Directory(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, ReconcileError::Cancelled(_)) }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
