//! In-memory storage for testing.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::provider::{DocumentStorage, Metadata};
use labjournal_common::{Error, RelativePath, Result};

/// In-memory storage.
///
/// Useful for testing ledger logic without a filesystem. Directories are
/// implicit: a directory exists while some document lives below it.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    documents: Arc<RwLock<BTreeMap<RelativePath, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStorage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn read(&self, path: &RelativePath) -> Result<Vec<u8>> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Not found: {}", path)))
    }

    fn write(&self, path: &RelativePath, data: &[u8]) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot write to store root".to_string()));
        }
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), data.to_vec());
        Ok(())
    }

    fn exists(&self, path: &RelativePath) -> Result<bool> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.keys().any(|key| key.starts_with(path)))
    }

    fn remove(&self, path: &RelativePath) -> Result<()> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Not found: {}", path)))
    }

    fn list(&self, path: &RelativePath) -> Result<Vec<Metadata>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let depth = path.components().len();

        let mut files = BTreeMap::new();
        let mut dirs = BTreeSet::new();
        for (key, data) in documents.iter() {
            if !key.starts_with(path) || key.components().len() <= depth {
                continue;
            }
            let name = key.components()[depth].clone();
            if key.components().len() == depth + 1 {
                files.insert(name, data.len() as u64);
            } else {
                dirs.insert(name);
            }
        }

        if files.is_empty() && dirs.is_empty() && !path.is_root() {
            return Err(Error::NotFound(format!("Directory not found: {}", path)));
        }

        let now = Utc::now();
        let mut results: Vec<Metadata> = dirs
            .into_iter()
            .map(|name| Metadata {
                name,
                size: None,
                is_directory: true,
                modified: now,
            })
            .chain(files.into_iter().map(|(name, size)| Metadata {
                name,
                size: Some(size),
                is_directory: false,
                modified: now,
            }))
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_write_read() {
        let storage = MemoryStorage::new();
        let path = RelativePath::parse("a/b.doc").unwrap();

        storage.write(&path, b"data").unwrap();

        assert_eq!(storage.read(&path).unwrap(), b"data");
        assert!(storage.exists(&RelativePath::parse("a").unwrap()).unwrap());
    }

    #[test]
    fn test_memory_list_mixes_files_and_dirs() {
        let storage = MemoryStorage::new();
        storage.write(&RelativePath::parse("r/x/record.doc").unwrap(), b"1").unwrap();
        storage.write(&RelativePath::parse("r/y.doc").unwrap(), b"22").unwrap();

        let listing = storage.list(&RelativePath::parse("r").unwrap()).unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing[0].is_directory);
        assert_eq!(listing[1].size, Some(2));
    }

    #[test]
    fn test_memory_missing() {
        let storage = MemoryStorage::new();
        let path = RelativePath::parse("nothing").unwrap();
        assert!(storage.read(&path).unwrap_err().is_not_found());
        assert!(storage.list(&path).unwrap_err().is_not_found());
        assert!(storage.remove(&path).unwrap_err().is_not_found());
    }
}
