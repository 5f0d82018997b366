//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::layout::{LEGACY_QUARANTINE_DIRNAME, QUARANTINE_DIRNAME};
use labjournal_common::{Error, Result};
use labjournal_document::VersionTriple;

/// Where a store lives and which document version it writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root of the live tree.
    pub root: PathBuf,
    /// Directory holding the quarantine. Must be on the same filesystem as
    /// `root`, since staging a deletion is a rename.
    pub deleted_root: PathBuf,
    /// Version documents are migrated to and written with.
    pub current_version: VersionTriple,
}

impl StoreConfig {
    /// Configuration for a store at `root`, quarantining inside it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            deleted_root: root.clone(),
            root,
            current_version: VersionTriple::CURRENT,
        }
    }

    pub fn with_deleted_root(mut self, deleted_root: impl Into<PathBuf>) -> Self {
        self.deleted_root = deleted_root.into();
        self
    }

    pub fn with_current_version(mut self, version: VersionTriple) -> Self {
        self.current_version = version;
        self
    }

    /// Root of the quarantine tree.
    pub fn quarantine_root(&self) -> PathBuf {
        self.deleted_root.join(QUARANTINE_DIRNAME)
    }

    /// Quarantine directory of older builds.
    pub fn legacy_quarantine_root(&self) -> PathBuf {
        self.deleted_root.join(LEGACY_QUARANTINE_DIRNAME)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labjournal_document::Platform;

    #[test]
    fn test_defaults_quarantine_inside_root() {
        let config = StoreConfig::new("/data/lab");
        assert_eq!(config.quarantine_root(), PathBuf::from("/data/lab/DeletedData"));
        assert_eq!(
            config.legacy_quarantine_root(),
            PathBuf::from("/data/lab/DeletedAssets")
        );
        assert_eq!(config.current_version, VersionTriple::CURRENT);
    }

    #[test]
    fn test_builders() {
        let version = VersionTriple::new(1, 2, Platform::Ios, 706);
        let config = StoreConfig::new("/data/lab")
            .with_deleted_root("/data/trash")
            .with_current_version(version);
        assert_eq!(config.quarantine_root(), PathBuf::from("/data/trash/DeletedData"));
        assert_eq!(config.current_version, version);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = StoreConfig::new("/data/lab").with_deleted_root("/data/trash");
        let parsed = StoreConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert!(StoreConfig::from_json("{").is_err());
    }
}
