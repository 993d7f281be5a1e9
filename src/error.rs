//! Error taxonomy shared by backends, the registry and the profile applier.
//!
//! Every failure that can happen while talking to hardware is classified into one
//! of a small set of kinds so callers can decide what to show the user without
//! string matching. Nothing in the core turns one of these into a fatal error.

use std::io;

use thiserror::Error;

/// Classified failure of a backend or device operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Device absent from the current discovery pass, or gone since.
    #[error("device not found: {0}")]
    NotFound(String),

    /// The OS rejected a sysfs or USB write. Fixed by provisioning permissions,
    /// never by retrying.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The device or backend cannot honour the requested mode, color or speed.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A backend dependency or driver is missing.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Persisted data could not be read back.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl ControlError {
    /// Classifies an I/O error raised while touching `what`.
    pub fn from_io(err: &io::Error, what: impl std::fmt::Display) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(format!("{what}: {err}")),
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                Self::PermissionDenied(format!("{what}: {err}"))
            }
            _ => Self::UnsupportedOperation(format!("{what}: {err}")),
        }
    }

    /// Short machine-friendly name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::PermissionDenied(_) => "permission-denied",
            Self::UnsupportedOperation(_) => "unsupported",
            Self::BackendUnavailable(_) => "backend-unavailable",
            Self::Corrupt(_) => "corrupt",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<hidapi::HidError> for ControlError {
    fn from(err: hidapi::HidError) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("no such device") || lowered.contains("not found") {
            Self::NotFound(message)
        } else if lowered.contains("permission denied") {
            Self::PermissionDenied(message)
        } else {
            Self::UnsupportedOperation(message)
        }
    }
}

/// Failure while registering a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a backend named '{0}' is already registered")]
    DuplicateBackendName(String),
}

pub type ControlResult<T> = Result<T, ControlError>;
