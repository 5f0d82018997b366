//! Per-record bookkeeping compared against the remote library.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ledger::LedgerDocument;
use labjournal_common::RecordId;
use labjournal_document::Overview;

/// Remote-facing state of a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub record_id: RecordId,
    #[serde(default)]
    pub is_archived: bool,
    /// Last user-visible change, epoch milliseconds.
    #[serde(default)]
    pub last_modified_ms: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

impl LibraryEntry {
    fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            is_archived: false,
            last_modified_ms: 0,
            is_deleted: false,
        }
    }
}

/// The remote library ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLibrary {
    #[serde(default)]
    entries: BTreeMap<RecordId, LibraryEntry>,
}

impl LedgerDocument for RemoteLibrary {
    const NAME: &'static str = "experiment_library";
}

impl RemoteLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a library with one entry per overview.
    pub fn seeded(overviews: &[Overview]) -> Self {
        let entries = overviews
            .iter()
            .map(|o| {
                let entry = LibraryEntry {
                    record_id: o.record_id.clone(),
                    is_archived: o.is_archived,
                    last_modified_ms: o.last_used_ms,
                    is_deleted: false,
                };
                (o.record_id.clone(), entry)
            })
            .collect();
        Self { entries }
    }

    /// Get the entry for a record.
    pub fn entry(&self, id: &RecordId) -> Option<&LibraryEntry> {
        self.entries.get(id)
    }

    /// Get all entries, ordered by record ID.
    pub fn entries(&self) -> impl Iterator<Item = &LibraryEntry> {
        self.entries.values()
    }

    fn entry_mut(&mut self, id: &RecordId) -> &mut LibraryEntry {
        self.entries
            .entry(id.clone())
            .or_insert_with(|| LibraryEntry::new(id.clone()))
    }

    /// Stamp a user-visible change now.
    pub fn mark_modified(&mut self, id: &RecordId) {
        self.entry_mut(id).last_modified_ms = Utc::now().timestamp_millis();
    }

    pub fn set_archived(&mut self, id: &RecordId, archived: bool) {
        self.entry_mut(id).is_archived = archived;
    }

    pub fn set_deleted(&mut self, id: &RecordId, deleted: bool) {
        self.entry_mut(id).is_deleted = deleted;
    }

    /// Remove a record's entry.
    pub fn remove(&mut self, id: &RecordId) -> Option<LibraryEntry> {
        self.entries.remove(id)
    }

    /// Keep only entries whose ID passes `keep`; returns how many were removed.
    pub fn retain(&mut self, keep: impl Fn(&RecordId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|id, _| keep(id));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
