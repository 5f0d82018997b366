//! Common error types for labjournal.

use thiserror::Error;

/// Top-level error type for labjournal operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Stored document was written by a build with a newer major version.
    ///
    /// Never retried and never auto-corrected.
    #[error("Document version too new: found major {found}, supported major {supported}")]
    VersionTooNew { found: u32, supported: u32 },

    /// Bytes do not decode as the expected document.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether this error reports a missing file or entry.
    ///
    /// Raw `io::ErrorKind::NotFound` counts as well, so callers do not need
    /// to care which layer noticed the absence.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error is a forward-incompatible document.
    pub fn is_version_too_new(&self) -> bool {
        matches!(self, Error::VersionTooNew { .. })
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
