//! Local filesystem storage with atomic writes.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{DocumentStorage, Metadata};
use labjournal_common::{Error, RelativePath, Result};

/// Local filesystem storage.
///
/// Every write goes to a uniquely named temp file next to the target, is
/// flushed to disk, then renamed over the target.
pub struct AtomicFileStore {
    root: PathBuf,
}

impl AtomicFileStore {
    /// Create a new store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied or other I/O failure creating the root
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a RelativePath to a filesystem path.
    pub fn to_fs_path(&self, path: &RelativePath) -> PathBuf {
        path.to_fs_path(&self.root)
    }

    fn create_metadata(name: String, fs_meta: &fs::Metadata) -> Metadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        Metadata {
            name,
            size: if fs_meta.is_file() {
                Some(fs_meta.len())
            } else {
                None
            },
            is_directory: fs_meta.is_dir(),
            modified,
        }
    }
}

/// Create `dir` and its parents, tolerating a concurrent creator.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Write `data` to `target` via temp file and rename.
///
/// The temp file is removed again if any step fails, so a failed write
/// leaves the previous content of `target` untouched.
pub fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("No parent for {}", target.display())))?;
    ensure_dir(parent)?;

    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("Invalid file name {}", target.display())))?;
    let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp, target)
    })();

    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&temp) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(Error::Io(e));
    }

    debug!(path = %target.display(), size = data.len(), "Document written");
    Ok(())
}

fn not_found(path: &RelativePath, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("Not found: {}", path))
    } else {
        Error::Io(e)
    }
}

impl DocumentStorage for AtomicFileStore {
    fn name(&self) -> &str {
        "local"
    }

    fn read(&self, path: &RelativePath) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);

        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!("Cannot read directory {}", path)));
        }

        fs::read(&fs_path).map_err(|e| not_found(path, e))
    }

    fn write(&self, path: &RelativePath, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to store root".to_string()));
        }
        write_atomic(&self.to_fs_path(path), data)
    }

    fn exists(&self, path: &RelativePath) -> Result<bool> {
        Ok(self.to_fs_path(path).try_exists()?)
    }

    fn remove(&self, path: &RelativePath) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Refusing to remove directory {}",
                path
            )));
        }

        fs::remove_file(&fs_path).map_err(|e| not_found(path, e))
    }

    fn list(&self, path: &RelativePath) -> Result<Vec<Metadata>> {
        let fs_path = self.to_fs_path(path);

        if fs_path.exists() && !fs_path.is_dir() {
            return Err(Error::InvalidInput(format!("Not a directory: {}", path)));
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&fs_path).map_err(|e| not_found(path, e))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            // In-flight temp files are not documents.
            if name.starts_with('.') && name.ends_with(".tmp") {
                continue;
            }
            let fs_meta = entry.metadata()?;
            results.push(Self::create_metadata(name, &fs_meta));
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parents_and_reads_back() {
        let temp = TempDir::new().unwrap();
        let store = AtomicFileStore::new(temp.path()).unwrap();
        let path = RelativePath::parse("records/abc/record.doc").unwrap();

        store.write(&path, b"hello").unwrap();

        assert_eq!(store.read(&path).unwrap(), b"hello");
        assert!(store.exists(&path).unwrap());
    }

    #[test]
    fn test_write_replaces_existing() {
        let temp = TempDir::new().unwrap();
        let store = AtomicFileStore::new(temp.path()).unwrap();
        let path = RelativePath::parse("ledger.doc").unwrap();

        store.write(&path, b"first version").unwrap();
        store.write(&path, b"second").unwrap();

        assert_eq!(store.read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = AtomicFileStore::new(temp.path()).unwrap();
        let err = store.read(&RelativePath::parse("nope.doc").unwrap()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_skips_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = AtomicFileStore::new(temp.path()).unwrap();
        let dir = RelativePath::parse("dir").unwrap();

        store.write(&dir.join("b.doc").unwrap(), b"2").unwrap();
        store.write(&dir.join("a.doc").unwrap(), b"1").unwrap();
        std::fs::write(temp.path().join("dir/.a.doc.123.tmp"), b"partial").unwrap();

        let names: Vec<String> = store.list(&dir).unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a.doc", "b.doc"]);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let store = AtomicFileStore::new(temp.path()).unwrap();
        let path = RelativePath::parse("x.doc").unwrap();

        store.write(&path, b"x").unwrap();
        store.remove(&path).unwrap();

        assert!(!store.exists(&path).unwrap());
        assert!(store.remove(&path).unwrap_err().is_not_found());
    }

    #[test]
    fn test_exists_reports_io_errors() {
        let temp = TempDir::new().unwrap();
        let store = AtomicFileStore::new(temp.path()).unwrap();
        store.write(&RelativePath::parse("records").unwrap(), b"not a dir").unwrap();

        let err = store
            .exists(&RelativePath::parse("records/abc").unwrap())
            .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(AtomicFileStore::new(temp.path()).unwrap());
        let path = RelativePath::parse("shared/doc").unwrap();

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = store.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    let body = vec![i; 4096];
                    for _ in 0..20 {
                        store.write(&path, &body).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = store.read(&path).unwrap();
        assert_eq!(content.len(), 4096);
        assert!(content.iter().all(|b| *b == content[0]));
    }
}
