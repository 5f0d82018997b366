//! Storage trait definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labjournal_common::{RelativePath, Result};

/// Metadata for a stored object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Name of the object (last path component).
    pub name: String,
    /// Size in bytes (None for directories).
    pub size: Option<u64>,
    /// Whether this is a directory.
    pub is_directory: bool,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Keyed byte storage with atomic replace semantics.
///
/// Paths are relative to the storage root. Implementations must guarantee
/// that a concurrent reader sees either the previous or the new content of
/// a document, never a mix.
pub trait DocumentStorage: Send + Sync {
    /// Get the storage name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Read a whole document.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored at `path`
    /// - I/O errors
    fn read(&self, path: &RelativePath) -> Result<Vec<u8>>;

    /// Atomically replace the document at `path`.
    ///
    /// # Postconditions
    /// - Missing parent directories exist
    /// - `path` holds exactly `data`
    ///
    /// # Errors
    /// - I/O errors; prior content is left unchanged
    fn write(&self, path: &RelativePath, data: &[u8]) -> Result<()>;

    /// Check if a path exists.
    ///
    /// # Errors
    /// - I/O errors other than absence, e.g. permission denied
    fn exists(&self, path: &RelativePath) -> Result<bool>;

    /// Remove a single document.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored at `path`
    fn remove(&self, path: &RelativePath) -> Result<()>;

    /// List the direct children of a directory.
    ///
    /// # Errors
    /// - `NotFound` if the directory does not exist
    fn list(&self, path: &RelativePath) -> Result<Vec<Metadata>>;
}
