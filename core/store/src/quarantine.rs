//! Recoverable deletion.
//!
//! Deleting a record or asset moves it from the live tree into a
//! quarantine tree that mirrors the live layout. It can be moved back until
//! the quarantine is purged, which happens at the start of every session.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::layout::{LEGACY_QUARANTINE_DIRNAME, QUARANTINE_DIRNAME, RECORDS_DIRNAME};
use labjournal_common::{Error, RecordId, RelativePath, Result};
use labjournal_storage::local::{ensure_dir, write_atomic};

/// Marker that keeps backup tools out of the quarantine.
pub const CACHEDIR_TAG_FILENAME: &str = "CACHEDIR.TAG";

const CACHEDIR_TAG: &[u8] = b"Signature: 8a477f597d28d172789f06886806bc55\n\
# This file marks deleted labjournal data awaiting purge.\n";

/// Quarantine for deleted records and assets.
///
/// Paths are given relative to the live root and mirrored below the
/// quarantine root, so objects under different paths never collide.
pub struct StagedDeletionArea {
    live_root: PathBuf,
    root: PathBuf,
    legacy_root: PathBuf,
}

impl StagedDeletionArea {
    /// Quarantine for the tree at `live_root`, kept under `deleted_root`.
    pub fn new(live_root: impl Into<PathBuf>, deleted_root: impl AsRef<Path>) -> Self {
        let deleted_root = deleted_root.as_ref();
        Self {
            live_root: live_root.into(),
            root: deleted_root.join(QUARANTINE_DIRNAME),
            legacy_root: deleted_root.join(LEGACY_QUARANTINE_DIRNAME),
        }
    }

    /// Root of the quarantine tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn live_path(&self, path: &RelativePath) -> PathBuf {
        path.to_fs_path(&self.live_root)
    }

    fn staged_path(&self, path: &RelativePath) -> PathBuf {
        path.to_fs_path(&self.root)
    }

    /// Move a live file or directory into quarantine.
    ///
    /// # Postconditions
    /// - `path` no longer exists in the live tree
    /// - The quarantine holds exactly this object at `path`; an older
    ///   staged object at the same path is replaced
    ///
    /// # Errors
    /// - `NotFound` if nothing lives at `path`
    /// - `InvalidInput` for the root path
    /// - I/O failure; the live object stays where it was
    pub fn delete(&self, path: &RelativePath) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot stage the store root".to_string()));
        }
        let source = self.live_path(path);
        if !exists(&source)? {
            return Err(Error::NotFound(format!("Nothing to delete at {}", path)));
        }

        self.ensure_root()?;
        let target = self.staged_path(path);
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        if remove_any(&target)? {
            debug!(path = %path, "Replaced previously staged object");
        }

        fs::rename(&source, &target).map_err(|e| not_found(path, e))?;
        info!(path = %path, "Staged for deletion");
        Ok(())
    }

    /// Move a staged object back into the live tree.
    ///
    /// # Errors
    /// - `NotFound` if nothing is staged at `path`
    /// - `AlreadyExists` if a live object took its place meanwhile
    pub fn restore(&self, path: &RelativePath) -> Result<()> {
        let source = self.staged_path(path);
        if path.is_root() || !exists(&source)? {
            return Err(Error::NotFound(format!("Nothing staged at {}", path)));
        }
        let target = self.live_path(path);
        if exists(&target)? {
            return Err(Error::AlreadyExists(format!("Live object at {}", path)));
        }
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }

        fs::rename(&source, &target).map_err(|e| not_found(path, e))?;
        info!(path = %path, "Restored from quarantine");
        Ok(())
    }

    /// Whether something is staged at `path`.
    pub fn is_staged(&self, path: &RelativePath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        exists(&self.staged_path(path))
    }

    /// Permanently remove one staged object. Returns whether one existed.
    pub fn remove_one(&self, path: &RelativePath) -> Result<bool> {
        if path.is_root() {
            return Err(Error::InvalidInput("Use purge_all for the whole quarantine".to_string()));
        }
        let removed = remove_any(&self.staged_path(path))?;
        if removed {
            info!(path = %path, "Purged staged object");
        }
        Ok(removed)
    }

    /// Permanently remove everything staged, including the quarantine of
    /// older builds. Succeeds when there is nothing to purge.
    pub fn purge_all(&self) -> Result<()> {
        for dir in [&self.root, &self.legacy_root] {
            if remove_any(dir)? {
                info!(dir = %dir.display(), "Purged quarantine");
            }
        }
        Ok(())
    }

    /// Records currently in quarantine.
    pub fn staged_records(&self) -> Result<Vec<RecordId>> {
        let dir = self.root.join(RECORDS_DIRNAME);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().to_str().map(RecordId::new) {
                Some(Ok(id)) => ids.push(id),
                _ => warn!(entry = ?entry.file_name(), "Skipping unexpected quarantine entry"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn ensure_root(&self) -> Result<()> {
        ensure_dir(&self.root)?;
        let tag = self.root.join(CACHEDIR_TAG_FILENAME);
        if !exists(&tag)? {
            write_atomic(&tag, CACHEDIR_TAG)?;
        }
        Ok(())
    }
}

fn exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Remove a file or directory tree; `false` if there was nothing.
fn remove_any(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::Io(e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

fn not_found(path: &RelativePath, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(format!("Not found: {}", path))
    } else {
        Error::Io(e)
    }
}
