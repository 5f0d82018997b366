//! Record assets and the cover image.
//!
//! A record's cover is one of its assets. Changing the cover evicts the
//! previous image unless a note still shows it, and removing the asset that
//! is the cover picks a replacement that can be undone.

use tracing::{debug, info, warn};

use crate::events::StoreEvent;
use crate::layout;
use crate::store::{RecordStore, SaveKind};
use labjournal_common::{Error, RecordId, Result};
use labjournal_document::Record;
use labjournal_storage::DocumentStorage;

/// Reverts the cover change made while removing an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct UndoToken {
    record_id: RecordId,
    cover: Option<String>,
}

impl UndoToken {
    fn noop(record_id: RecordId) -> Self {
        Self {
            record_id,
            cover: None,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Cover that undoing puts back, if the removal changed the cover.
    pub fn previous_cover(&self) -> Option<&str> {
        self.cover.as_deref()
    }

    /// Whether undoing changes nothing.
    pub fn is_noop(&self) -> bool {
        self.cover.is_none()
    }
}

impl RecordStore {
    /// Current cover of a record.
    ///
    /// Records written before the cover was stored in the record itself
    /// only carry it in their overview.
    pub fn cover(&self, record: &Record) -> Option<String> {
        record.image_path.clone().or_else(|| {
            self.overview(&record.id)
                .and_then(|overview| overview.image_path)
        })
    }

    /// Make `path` the record's cover, or clear it with `None`.
    ///
    /// # Postconditions
    /// - Record and overview carry the new cover
    /// - The old cover is staged for deletion and `CoverAssetEvicted` is
    ///   emitted, unless a note still references it
    /// - Setting the cover it already has does nothing
    ///
    /// # Errors
    /// - `InvalidInput` if `path` leaves the record directory
    /// - Save failure; the record keeps its old cover
    pub fn set_cover(&self, record: &mut Record, path: Option<String>) -> Result<()> {
        if let Some(path) = &path {
            layout::asset_path(&record.id, path)?;
        }

        let previous = self.cover(record);
        if previous == path {
            if record.image_path != path {
                record.image_path = path;
                self.save_record(record, SaveKind::Housekeeping)?;
            }
            return Ok(());
        }

        let before = std::mem::replace(&mut record.image_path, path);
        if let Err(e) = self.save_record(record, SaveKind::Content) {
            record.image_path = before;
            return Err(e);
        }
        debug!(record = %record.id, cover = ?record.image_path, "Cover changed");

        match previous {
            Some(old) if !record.references_asset(&old) => self.evict_cover(record, &old),
            _ => Ok(()),
        }
    }

    fn evict_cover(&self, record: &Record, path: &str) -> Result<()> {
        let staged = layout::asset_path(&record.id, path)
            .and_then(|asset| self.quarantine.delete(&asset));
        match staged {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(record = %record.id, path, "Evicted cover already gone");
            }
            Err(Error::InvalidInput(reason)) => {
                warn!(record = %record.id, path, reason = %reason, "Cannot stage evicted cover");
            }
            Err(e) => return Err(e),
        }

        self.emit(StoreEvent::CoverAssetEvicted {
            record_id: record.id.clone(),
            path: path.to_string(),
        });
        Ok(())
    }

    /// Fix up the cover after the asset at `path` was removed.
    ///
    /// If `path` was the cover, the first remaining Picture note becomes
    /// the cover, or the cover is cleared when there is none.
    pub fn handle_asset_removed(&self, record: &mut Record, path: &str) -> Result<UndoToken> {
        if self.cover(record).as_deref() != Some(path) {
            return Ok(UndoToken::noop(record.id.clone()));
        }

        let replacement = record
            .picture_paths()
            .find(|p| *p != path)
            .map(String::from);
        self.set_cover(record, replacement)?;

        Ok(UndoToken {
            record_id: record.id.clone(),
            cover: Some(path.to_string()),
        })
    }

    /// Put back the cover replaced by [`handle_asset_removed`].
    ///
    /// [`handle_asset_removed`]: RecordStore::handle_asset_removed
    ///
    /// # Errors
    /// - `InvalidInput` if the token belongs to another record
    pub fn undo(&self, record: &mut Record, token: UndoToken) -> Result<()> {
        if token.record_id != record.id {
            return Err(Error::InvalidInput(format!(
                "Undo token for {} applied to {}",
                token.record_id, record.id
            )));
        }
        match token.cover {
            Some(path) => self.set_cover(record, Some(path)),
            None => Ok(()),
        }
    }

    /// Store a new asset file and return its record-relative path.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `InvalidInput` if `file_name` is not a plain file name
    pub fn add_asset(&self, id: &RecordId, file_name: &str, data: &[u8]) -> Result<String> {
        if !self.record_exists(id)? {
            return Err(Error::NotFound(format!("Record {}", id)));
        }
        let path = layout::assets_dir(id)?.join(file_name)?;
        self.storage.write(&path, data)?;
        self.ledgers.mark_dirty(id, true)?;
        debug!(record = %id, file = file_name, size = data.len(), "Asset added");
        Ok(layout::asset_reference(file_name))
    }

    /// Stage an asset for deletion and fix up the cover.
    pub fn delete_asset(&self, record: &mut Record, path: &str) -> Result<UndoToken> {
        self.quarantine.delete(&layout::asset_path(&record.id, path)?)?;
        info!(record = %record.id, path, "Asset deleted");
        self.handle_asset_removed(record, path)
    }

    /// Bring back an asset removed by [`delete_asset`] and undo its cover
    /// change.
    ///
    /// [`delete_asset`]: RecordStore::delete_asset
    ///
    /// # Errors
    /// - `NotFound` if the asset is no longer staged
    pub fn restore_asset(&self, record: &mut Record, path: &str, token: UndoToken) -> Result<()> {
        self.quarantine.restore(&layout::asset_path(&record.id, path)?)?;
        info!(record = %record.id, path, "Asset restored");
        self.undo(record, token)
    }

    /// Stage every asset file the record no longer references.
    ///
    /// Returns the record-relative paths that were staged.
    pub fn cleanup_orphan_assets(&self, record: &Record) -> Result<Vec<String>> {
        let dir = layout::assets_dir(&record.id)?;
        let entries = match self.storage.list(&dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let cover = self.cover(record);
        let mut staged = Vec::new();
        for entry in entries.into_iter().filter(|e| !e.is_directory) {
            let reference = layout::asset_reference(&entry.name);
            if cover.as_deref() == Some(reference.as_str()) || record.references_asset(&reference) {
                continue;
            }
            self.quarantine.delete(&dir.join(&entry.name)?)?;
            staged.push(reference);
        }

        if !staged.is_empty() {
            info!(record = %record.id, count = staged.len(), "Orphan assets staged");
        }
        Ok(staged)
    }
}
