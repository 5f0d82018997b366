//! Local download and dirty tracking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::LedgerDocument;
use labjournal_common::RecordId;

/// Local sync flags for a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusEntry {
    pub record_id: RecordId,
    /// Record content is present locally.
    #[serde(default)]
    pub is_downloaded: bool,
    /// Local changes not yet pushed.
    #[serde(default)]
    pub is_dirty: bool,
}

impl SyncStatusEntry {
    fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            is_downloaded: false,
            is_dirty: false,
        }
    }
}

/// The local sync status ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSyncStatus {
    #[serde(default)]
    entries: BTreeMap<RecordId, SyncStatusEntry>,
}

impl LedgerDocument for LocalSyncStatus {
    const NAME: &'static str = "local_sync_status";
}

impl LocalSyncStatus {
    /// Create an empty status ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for a record.
    pub fn get(&self, id: &RecordId) -> Option<&SyncStatusEntry> {
        self.entries.get(id)
    }

    fn entry_mut(&mut self, id: &RecordId) -> &mut SyncStatusEntry {
        self.entries
            .entry(id.clone())
            .or_insert_with(|| SyncStatusEntry::new(id.clone()))
    }

    pub fn mark_dirty(&mut self, id: &RecordId, dirty: bool) {
        self.entry_mut(id).is_dirty = dirty;
    }

    pub fn mark_downloaded(&mut self, id: &RecordId, downloaded: bool) {
        self.entry_mut(id).is_downloaded = downloaded;
    }

    pub fn is_dirty(&self, id: &RecordId) -> bool {
        self.get(id).is_some_and(|e| e.is_dirty)
    }

    pub fn is_downloaded(&self, id: &RecordId) -> bool {
        self.get(id).is_some_and(|e| e.is_downloaded)
    }

    /// Remove a record's entry.
    pub fn remove(&mut self, id: &RecordId) -> Option<SyncStatusEntry> {
        self.entries.remove(id)
    }

    /// Keep only entries whose ID passes `keep`; returns how many were removed.
    pub fn retain(&mut self, keep: impl Fn(&RecordId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| keep(id));
        before - self.entries.len()
    }

    /// Get all entries.
    pub fn entries(&self) -> impl Iterator<Item = &SyncStatusEntry> {
        self.entries.values()
    }

    /// IDs of records with local changes pending.
    pub fn dirty_ids(&self) -> impl Iterator<Item = &RecordId> {
        self.entries.values().filter(|e| e.is_dirty).map(|e| &e.record_id)
    }

    /// Check if there are pending changes.
    pub fn has_pending_changes(&self) -> bool {
        self.entries.values().any(|e| e.is_dirty)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
