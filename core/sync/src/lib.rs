//! labjournal sync bookkeeping
//!
//! This module provides the local state an external sync service reconciles
//! against:
//! - `RemoteLibrary`: archived/modified/deleted flags per record
//! - `LocalSyncStatus`: downloaded/dirty flags per record
//! - `Ledger`: a persisted document with its own serialization point
//!
//! The two ledgers are persisted independently and never locked together.

pub mod ledger;
pub mod library;
pub mod status;

pub use ledger::{Ledger, LedgerDocument};
pub use library::{LibraryEntry, RemoteLibrary};
pub use status::{LocalSyncStatus, SyncStatusEntry};

use std::collections::BTreeSet;
use std::sync::Arc;

use labjournal_common::{RecordId, RelativePath, Result};
use labjournal_document::Overview;
use labjournal_storage::DocumentStorage;

/// File name of the remote library ledger, relative to the store root.
pub const LIBRARY_FILENAME: &str = "experiment_library.doc";

/// File name of the local sync status ledger, relative to the store root.
pub const SYNC_STATUS_FILENAME: &str = "local_sync_status.doc";

/// Both sync ledgers of a store.
pub struct SyncLedgers {
    library: Ledger<RemoteLibrary>,
    status: Ledger<LocalSyncStatus>,
}

impl SyncLedgers {
    /// Load both ledgers, creating any that are missing or unreadable.
    ///
    /// A fresh library is seeded from `overviews`.
    pub fn open(storage: Arc<dyn DocumentStorage>, overviews: &[Overview]) -> Result<Self> {
        let library = Ledger::load_or_create(
            storage.clone(),
            RelativePath::parse(LIBRARY_FILENAME)?,
            || RemoteLibrary::seeded(overviews),
        );
        let status = Ledger::load_or_create(
            storage,
            RelativePath::parse(SYNC_STATUS_FILENAME)?,
            LocalSyncStatus::new,
        );
        Ok(Self { library, status })
    }

    /// Record a user-visible content change.
    pub fn mark_modified(&self, id: &RecordId) -> Result<()> {
        self.library.update(|lib| lib.mark_modified(id))
    }

    pub fn set_archived(&self, id: &RecordId, archived: bool) -> Result<()> {
        self.library.update(|lib| lib.set_archived(id, archived))
    }

    pub fn set_deleted(&self, id: &RecordId, deleted: bool) -> Result<()> {
        self.library.update(|lib| lib.set_deleted(id, deleted))
    }

    pub fn mark_dirty(&self, id: &RecordId, dirty: bool) -> Result<()> {
        self.status.update(|status| status.mark_dirty(id, dirty))
    }

    pub fn mark_downloaded(&self, id: &RecordId, downloaded: bool) -> Result<()> {
        self.status.update(|status| status.mark_downloaded(id, downloaded))
    }

    /// Forget a record in both ledgers.
    pub fn remove(&self, id: &RecordId) -> Result<()> {
        self.library.update(|lib| {
            lib.remove(id);
        })?;
        self.status.update(|status| {
            status.remove(id);
        })
    }

    /// Drop every entry whose record fails `keep`; returns how many IDs went.
    pub fn prune(&self, keep: impl Fn(&RecordId) -> bool) -> Result<usize> {
        let from_library = self.library.update(|lib| lib.retain(&keep))?;
        let from_status = self.status.update(|status| status.retain(&keep))?;
        Ok(from_library.max(from_status))
    }

    /// Every record either ledger has an entry for.
    pub fn record_ids(&self) -> BTreeSet<RecordId> {
        let mut ids: BTreeSet<RecordId> =
            self.library.read(|lib| lib.entries().map(|e| e.record_id.clone()).collect());
        self.status
            .read(|status| ids.extend(status.entries().map(|e| e.record_id.clone())));
        ids
    }

    /// Copy of the remote library ledger.
    pub fn library(&self) -> RemoteLibrary {
        self.library.snapshot()
    }

    /// Copy of the local sync status ledger.
    pub fn sync_status(&self) -> LocalSyncStatus {
        self.status.snapshot()
    }

    /// Library entry for a record.
    pub fn library_entry(&self, id: &RecordId) -> Option<LibraryEntry> {
        self.library.read(|lib| lib.entry(id).cloned())
    }

    pub fn is_dirty(&self, id: &RecordId) -> bool {
        self.status.read(|status| status.is_dirty(id))
    }

    pub fn is_downloaded(&self, id: &RecordId) -> bool {
        self.status.read(|status| status.is_downloaded(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labjournal_document::{codec, Record, VersionTriple};
    use labjournal_storage::{AtomicFileStore, MemoryStorage};
    use std::thread;
    use tempfile::TempDir;

    fn id(s: &str) -> RecordId {
        RecordId::new(s).unwrap()
    }

    #[test]
    fn test_fresh_library_is_seeded_from_overviews() {
        let storage = Arc::new(MemoryStorage::new());
        let record = Record::new(id("a"), "A", VersionTriple::CURRENT);
        let overviews = vec![Overview::from_record(&record, true, 99)];

        let ledgers = SyncLedgers::open(storage.clone(), &overviews).unwrap();

        let entry = ledgers.library_entry(&id("a")).unwrap();
        assert!(entry.is_archived);
        assert_eq!(entry.last_modified_ms, 99);
        // Both ledgers were persisted right away.
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_corrupt_ledger_is_regenerated() {
        let storage = Arc::new(MemoryStorage::new());
        let path = RelativePath::parse(SYNC_STATUS_FILENAME).unwrap();
        storage.write(&path, b"{ not json").unwrap();

        let ledgers = SyncLedgers::open(storage.clone(), &[]).unwrap();
        assert!(ledgers.sync_status().is_empty());

        let healed: LocalSyncStatus = codec::decode(&storage.read(&path).unwrap()).unwrap();
        assert!(healed.is_empty());
    }

    #[test]
    fn test_remove_clears_both_ledgers() {
        let storage = Arc::new(MemoryStorage::new());
        let ledgers = SyncLedgers::open(storage, &[]).unwrap();

        ledgers.mark_modified(&id("a")).unwrap();
        ledgers.mark_dirty(&id("a"), true).unwrap();
        ledgers.remove(&id("a")).unwrap();

        assert!(ledgers.library_entry(&id("a")).is_none());
        assert!(!ledgers.is_dirty(&id("a")));
    }

    #[test]
    fn test_ledgers_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let storage: Arc<dyn DocumentStorage> = Arc::new(AtomicFileStore::new(temp.path()).unwrap());
        {
            let ledgers = SyncLedgers::open(storage.clone(), &[]).unwrap();
            ledgers.mark_dirty(&id("a"), true).unwrap();
            ledgers.mark_downloaded(&id("a"), true).unwrap();
            ledgers.set_archived(&id("b"), true).unwrap();
        }
        let ledgers = SyncLedgers::open(storage, &[]).unwrap();
        assert!(ledgers.is_dirty(&id("a")));
        assert!(ledgers.is_downloaded(&id("a")));
        assert!(ledgers.library_entry(&id("b")).unwrap().is_archived);
    }

    #[test]
    fn test_concurrent_writers_on_both_ledgers() {
        let temp = TempDir::new().unwrap();
        let storage: Arc<dyn DocumentStorage> = Arc::new(AtomicFileStore::new(temp.path()).unwrap());
        let ledgers = Arc::new(SyncLedgers::open(storage.clone(), &[]).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledgers = ledgers.clone();
                thread::spawn(move || {
                    let record = id(&format!("r{i}"));
                    for _ in 0..10 {
                        ledgers.mark_dirty(&record, true).unwrap();
                        ledgers.mark_modified(&record).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let status: LocalSyncStatus = codec::decode(
            &storage
                .read(&RelativePath::parse(SYNC_STATUS_FILENAME).unwrap())
                .unwrap(),
        )
        .unwrap();
        let library: RemoteLibrary = codec::decode(
            &storage
                .read(&RelativePath::parse(LIBRARY_FILENAME).unwrap())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(status.dirty_ids().count(), 16);
        assert_eq!(library.entries().count(), 16);
    }

    #[test]
    fn test_prune() {
        let storage = Arc::new(MemoryStorage::new());
        let ledgers = SyncLedgers::open(storage, &[]).unwrap();
        ledgers.mark_dirty(&id("keep"), true).unwrap();
        ledgers.mark_dirty(&id("drop"), true).unwrap();
        ledgers.mark_modified(&id("drop")).unwrap();

        let removed = ledgers.prune(|rid| rid.as_str() == "keep").unwrap();

        assert_eq!(removed, 1);
        assert!(ledgers.is_dirty(&id("keep")));
        assert!(!ledgers.is_dirty(&id("drop")));
        assert!(ledgers.library_entry(&id("drop")).is_none());
    }

    #[test]
    fn test_record_ids_spans_both_ledgers() {
        let storage = Arc::new(MemoryStorage::new());
        let ledgers = SyncLedgers::open(storage, &[]).unwrap();
        ledgers.mark_modified(&id("library-only")).unwrap();
        ledgers.mark_dirty(&id("status-only"), true).unwrap();
        ledgers.set_archived(&id("both"), true).unwrap();
        ledgers.mark_downloaded(&id("both"), true).unwrap();

        let ids = ledgers.record_ids();
        let names: Vec<&str> = ids.iter().map(|r| r.as_str()).collect();
        assert_eq!(names, vec!["both", "library-only", "status-only"]);
    }
}
