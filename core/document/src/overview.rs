//! Lightweight record summaries and the user metadata document holding them.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec::Versioned;
use crate::model::Record;
use crate::version::VersionTriple;
use labjournal_common::RecordId;

/// Cached summary of a record for list display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub record_id: RecordId,
    pub title: String,
    /// Mirrors `Record::image_path` whenever it is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub last_used_ms: i64,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub trial_count: usize,
    /// Carried for the UI; never computed here.
    #[serde(default)]
    pub color_tag: i32,
}

impl Overview {
    /// Derive an overview from a record.
    pub fn from_record(record: &Record, is_archived: bool, last_used_ms: i64) -> Self {
        Self {
            record_id: record.id.clone(),
            title: record.title.clone(),
            image_path: record.image_path.clone(),
            last_used_ms,
            is_archived,
            trial_count: record.trials.len(),
            color_tag: 0,
        }
    }

    /// Copy the record-derived fields from `record`, keeping archive state,
    /// color and last-used time.
    pub fn refresh_from(&mut self, record: &Record) {
        self.title = record.title.clone();
        self.image_path = record.image_path.clone();
        self.trial_count = record.trials.len();
    }

    /// Stamp the overview as used now.
    pub fn touch(&mut self) {
        self.last_used_ms = Utc::now().timestamp_millis();
    }
}

/// Root-scoped document holding every overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    #[serde(default)]
    pub file_version: VersionTriple,
    #[serde(default)]
    overviews: Vec<Overview>,
}

impl UserMetadata {
    /// Create an empty metadata document at `version`.
    pub fn new(version: VersionTriple) -> Self {
        Self {
            file_version: version,
            overviews: Vec::new(),
        }
    }

    /// All overviews, in insertion order.
    pub fn overviews(&self) -> &[Overview] {
        &self.overviews
    }

    /// Overview for a record.
    pub fn overview(&self, id: &RecordId) -> Option<&Overview> {
        self.overviews.iter().find(|o| &o.record_id == id)
    }

    /// Mutable overview for a record.
    pub fn overview_mut(&mut self, id: &RecordId) -> Option<&mut Overview> {
        self.overviews.iter_mut().find(|o| &o.record_id == id)
    }

    /// Add an overview, replacing any existing one for the same record.
    ///
    /// Returns `true` if the record had no overview before.
    pub fn add_overview(&mut self, overview: Overview) -> bool {
        match self.overview_mut(&overview.record_id) {
            Some(existing) => {
                *existing = overview;
                false
            }
            None => {
                self.overviews.push(overview);
                true
            }
        }
    }

    /// Remove the overview for a record. Removing an unknown ID is a no-op.
    pub fn remove_overview(&mut self, id: &RecordId) -> Option<Overview> {
        let index = self.overviews.iter().position(|o| &o.record_id == id)?;
        Some(self.overviews.remove(index))
    }

    /// Keep only overviews matching `keep`; returns the removed ones.
    pub fn retain_overviews(&mut self, mut keep: impl FnMut(&Overview) -> bool) -> Vec<Overview> {
        let (kept, removed): (Vec<Overview>, Vec<Overview>) = std::mem::take(&mut self.overviews)
            .into_iter()
            .partition(|o| keep(o));
        self.overviews = kept;
        removed
    }

    /// Drop repeated overviews for the same record, keeping the first.
    ///
    /// Returns how many were dropped.
    pub fn dedup_overviews(&mut self) -> usize {
        let mut seen = std::collections::BTreeSet::new();
        let before = self.overviews.len();
        self.overviews.retain(|o| seen.insert(o.record_id.clone()));
        before - self.overviews.len()
    }

    /// IDs of every record with an overview.
    pub fn record_ids(&self) -> impl Iterator<Item = &RecordId> {
        self.overviews.iter().map(|o| &o.record_id)
    }
}

impl Versioned for UserMetadata {
    fn file_version(&self) -> VersionTriple {
        self.file_version
    }

    fn set_file_version(&mut self, version: VersionTriple) {
        self.file_version = version;
    }
}
