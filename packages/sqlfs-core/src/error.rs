//! Filesystem session error types.

use thiserror::Error;

/// Errors returned by lookups, mutations, the connection pool and the deploy engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Path or object is absent, or masked by a pending drop
    #[error("'{path}' not found")]
    NotFound { path: String },

    /// Operation has no DDL equivalent or crosses incompatible scopes
    #[error("Unsupported operation on '{path}': {reason}")]
    Unsupported { path: String, reason: String },

    /// Classifier could not understand the written text
    #[error("Cannot parse definition for '{path}': {reason}")]
    ParseFailed { path: String, reason: String },

    /// Connection could not be opened or re-opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Session transport is dead and could not be revived
    #[error("Session {slot} is dead")]
    SessionDead { slot: usize },

    /// Statement failed inside a flush transaction or a catalog query
    #[error("Execution failed: {message} (statement: {statement})")]
    ExecutionFailed { statement: String, message: String },

    /// Pool shutdown found a slot still checked out
    #[error("Pool is busy: {outstanding} slot(s) still checked out")]
    Busy { outstanding: usize },

    /// Transport failure while walking a path
    #[error("Resolution of '{path}' failed: {reason}")]
    ResolutionFailed { path: String, reason: String },

    /// Creation over a path that is already live
    #[error("'{path}' already exists")]
    AlreadyExists { path: String },

    /// Profile or credential loading failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pool or deploy engine has already been stopped
    #[error("{0} has been shut down")]
    ShutDown(&'static str),
}

/// Coarse error class surfaced at the filesystem boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrnoClass {
    /// ENOENT
    NoEntry,
    /// ENOTSUP
    NotSupported,
    /// EEXIST
    Exists,
    /// EIO
    Io,
}

impl FsError {
    /// Shorthand for [`FsError::NotFound`].
    pub fn not_found(path: impl Into<String>) -> Self {
        FsError::NotFound { path: path.into() }
    }

    /// Shorthand for [`FsError::Unsupported`].
    pub fn unsupported(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FsError::Unsupported {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`FsError::ParseFailed`].
    pub fn parse_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FsError::ParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures that a reconnect may cure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FsError::ConnectionFailed(_) | FsError::SessionDead { .. }
        )
    }

    /// Maps the error to the class an OS-level adapter reports.
    pub fn errno_class(&self) -> ErrnoClass {
        match self {
            FsError::NotFound { .. } => ErrnoClass::NoEntry,
            FsError::Unsupported { .. } => ErrnoClass::NotSupported,
            FsError::AlreadyExists { .. } => ErrnoClass::Exists,
            _ => ErrnoClass::Io,
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        assert!(FsError::ConnectionFailed("reset".into()).is_transport());
        assert!(FsError::SessionDead { slot: 2 }.is_transport());
        assert!(!FsError::not_found("/dbo").is_transport());
        assert!(!FsError::ExecutionFailed {
            statement: "SELECT 1".into(),
            message: "boom".into(),
        }
        .is_transport());
    }

    #[test]
    fn errno_mapping_is_coarse() {
        assert_eq!(FsError::not_found("/x").errno_class(), ErrnoClass::NoEntry);
        assert_eq!(
            FsError::unsupported("/x", "nope").errno_class(),
            ErrnoClass::NotSupported
        );
        assert_eq!(FsError::Busy { outstanding: 1 }.errno_class(), ErrnoClass::Io);
        assert_eq!(
            FsError::parse_failed("/x", "junk").errno_class(),
            ErrnoClass::Io
        );
    }
}
