//! Error types for the dirmirror system.

use crate::dn::DnParseError;

/// Result type alias for dirmirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Classification of a remote directory failure.
///
/// The transport maps server result codes onto these kinds; the engines make
/// policy decisions by matching on them (limit downgrade, conflict
/// resolution, simulated rename).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The named entry does not exist.
    NoSuchObject,
    /// An entry already exists at the target name.
    AlreadyExists,
    /// The operation is not allowed on a non-leaf entry.
    NotAllowedOnNonLeaf,
    /// The server-side size limit was exceeded.
    SizeLimitExceeded,
    /// The server-side time limit was exceeded.
    TimeLimitExceeded,
    /// An administrative limit was exceeded.
    AdminLimitExceeded,
    /// The server answered with a referral.
    Referral,
    /// The server is unavailable or the connection dropped.
    Unavailable,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Limit kinds are downgraded to a flag on the search, never a failure.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::SizeLimitExceeded | Self::TimeLimitExceeded | Self::AdminLimitExceeded
        )
    }
}

/// A classified error raised by the directory transport.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {diagnostic}")]
pub struct DirectoryError {
    pub kind: ErrorKind,
    pub diagnostic: String,
}

impl DirectoryError {
    pub fn new(kind: ErrorKind, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn no_such_object(diagnostic: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSuchObject, diagnostic)
    }

    pub fn already_exists(diagnostic: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, diagnostic)
    }

    pub fn not_allowed_on_non_leaf(diagnostic: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAllowedOnNonLeaf, diagnostic)
    }

    pub fn other(diagnostic: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, diagnostic)
    }

    pub fn is_limit(&self) -> bool {
        self.kind.is_limit()
    }
}

/// Main error type for the dirmirror system.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// A classified remote failure
    #[error("Transport error: {0}")]
    Transport(#[from] DirectoryError),

    /// Malformed distinguished name
    #[error("DN error: {0}")]
    Dn(#[from] DnParseError),

    /// Malformed input record or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MirrorError {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The transport error kind, if this is a transport error.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Transport(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_kinds() {
        assert!(ErrorKind::SizeLimitExceeded.is_limit());
        assert!(ErrorKind::TimeLimitExceeded.is_limit());
        assert!(ErrorKind::AdminLimitExceeded.is_limit());
        assert!(!ErrorKind::NoSuchObject.is_limit());
        assert!(!ErrorKind::AlreadyExists.is_limit());
    }

    #[test]
    fn test_kind_extraction() {
        let err = MirrorError::from(DirectoryError::already_exists("entry exists"));
        assert_eq!(err.kind(), Some(ErrorKind::AlreadyExists));
        assert_eq!(MirrorError::validation("bad record").kind(), None);
    }
}
