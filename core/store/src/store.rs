//! The record store facade.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::events::{NoopObserver, StoreEvent, StoreObserver, TrialStatsUpdated};
use crate::layout;
use crate::quarantine::StagedDeletionArea;
use labjournal_common::{Error, RecordId, Result};
use labjournal_document::{
    decode, encode, Migrator, Overview, Record, SensorSpec, UserMetadata, VersionTriple,
};
use labjournal_storage::{AtomicFileStore, DocumentStorage};
use labjournal_sync::{Ledger, SyncLedgers};

/// What a save changes from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    /// A user edit. Stamps the overview as used and the library entry as
    /// modified.
    Content,
    /// Migration, stats refresh and similar bookkeeping. Only marks the
    /// record dirty.
    Housekeeping,
}

/// A session on a local record store.
///
/// Opening the store purges the quarantine left by the previous session
/// and repairs the overview list and sync ledgers. Every operation after
/// that is a blocking call that may be issued from any thread.
pub struct RecordStore {
    pub(crate) config: StoreConfig,
    pub(crate) storage: Arc<AtomicFileStore>,
    pub(crate) migrator: Migrator,
    pub(crate) metadata: Ledger<UserMetadata>,
    pub(crate) ledgers: SyncLedgers,
    pub(crate) quarantine: StagedDeletionArea,
    pub(crate) observer: Arc<dyn StoreObserver>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl RecordStore {
    /// Open the store described by `config` without an observer.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_observer(config, Arc::new(NoopObserver))
    }

    /// Open the store and start a session.
    ///
    /// # Postconditions
    /// - The quarantine, including that of older builds, is empty
    /// - User metadata and both sync ledgers exist on disk
    /// - Every readable record has exactly one overview, and no overview or
    ///   ledger entry refers to a record that no longer exists
    ///
    /// # Errors
    /// - `VersionTooNew` if the user metadata was written by a newer major
    /// - I/O failure creating the root
    /// - I/O failure checking whether a record exists; overviews and ledger
    ///   entries are kept
    pub fn open_with_observer(config: StoreConfig, observer: Arc<dyn StoreObserver>) -> Result<Self> {
        let storage = Arc::new(AtomicFileStore::new(&config.root)?);
        let shared: Arc<dyn DocumentStorage> = storage.clone();
        let migrator = Migrator::new(config.current_version);

        let quarantine = StagedDeletionArea::new(&config.root, &config.deleted_root);
        if let Err(e) = quarantine.purge_all() {
            warn!(error = %e, "Failed to purge quarantine");
        }

        let metadata = load_metadata(shared.clone(), &migrator)?;
        let overviews = metadata.read(|m| m.overviews().to_vec());
        let ledgers = SyncLedgers::open(shared, &overviews)?;

        let store = Self {
            config,
            storage,
            migrator,
            metadata,
            ledgers,
            quarantine,
            observer,
        };

        let repaired = store.repair_missing_overviews()?;
        let dropped = store.drop_stale_overviews()?;
        let pruned = store.prune_ledgers()?;

        info!(
            root = %store.config.root.display(),
            records = store.metadata.read(|m| m.overviews().len()),
            repaired,
            dropped,
            pruned,
            "Record store opened"
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Version documents are written with.
    pub fn current_version(&self) -> VersionTriple {
        self.migrator.target()
    }

    /// Sync bookkeeping for the external sync service.
    pub fn ledgers(&self) -> &SyncLedgers {
        &self.ledgers
    }

    pub fn quarantine(&self) -> &StagedDeletionArea {
        &self.quarantine
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        debug!(event = ?event, "Store event");
        self.observer.on_event(&event);
    }

    /// Whether a record directory exists in the live tree.
    ///
    /// # Errors
    /// - I/O failure other than absence, e.g. permission denied
    pub fn record_exists(&self, id: &RecordId) -> Result<bool> {
        self.storage.exists(&layout::record_dir(id)?)
    }

    fn is_record_staged(&self, id: &RecordId) -> Result<bool> {
        self.quarantine.is_staged(&layout::record_dir(id)?)
    }

    /// Create an empty record.
    ///
    /// # Postconditions
    /// - Record document and overview are persisted
    /// - The record is marked downloaded, dirty and modified
    pub fn create_record(&self, title: impl Into<String>) -> Result<Record> {
        let mut record = Record::new(RecordId::generate(), title, self.migrator.target());
        self.save_record(&mut record, SaveKind::Content)?;
        self.ledgers.mark_downloaded(&record.id, true)?;
        info!(record = %record.id, "Record created");
        Ok(record)
    }

    /// Add a record produced elsewhere, e.g. downloaded by the sync service.
    ///
    /// The record is migrated to the current version before it is written.
    ///
    /// # Errors
    /// - `AlreadyExists` if a live record has the same ID
    /// - `VersionTooNew`; nothing is written
    pub fn import_record(&self, mut record: Record) -> Result<Record> {
        if self.record_exists(&record.id)? {
            return Err(Error::AlreadyExists(format!("Record {}", record.id)));
        }
        self.save_record(&mut record, SaveKind::Content)?;
        self.ledgers.mark_downloaded(&record.id, true)?;
        info!(record = %record.id, "Record imported");
        Ok(record)
    }

    /// Read and decode a record file without migrating it.
    fn read_record_file(&self, id: &RecordId) -> Result<Record> {
        let bytes = self.storage.read(&layout::record_file(id)?)?;
        decode(&bytes)
    }

    /// Load a record, migrating it to the current version.
    ///
    /// A record without a cover takes the one its overview still carries.
    /// A migrated or repaired record is written back as a housekeeping
    /// save. If that write fails the record is still returned and the
    /// repair simply runs again on the next load.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `Parse` if the record file is corrupt
    /// - `VersionTooNew`; the file is left untouched
    pub fn load_record(&self, id: &RecordId) -> Result<Record> {
        let mut record = self.read_record_file(id)?;

        let mut changed = false;
        if record.id != *id {
            warn!(record = %id, stored = %record.id, "Record ID disagrees with its directory");
            record.id = id.clone();
            changed = true;
        }
        // Older records kept their cover only in the overview.
        if record.image_path.is_none() {
            let legacy_cover = self
                .metadata
                .read(|metadata| metadata.overview(id).and_then(|o| o.image_path.clone()));
            if let Some(cover) = legacy_cover {
                debug!(record = %id, cover = %cover, "Adopting cover from overview");
                record.image_path = Some(cover);
                changed = true;
            }
        }
        changed |= self.migrator.upgrade_record(&mut record)?;

        if changed {
            if let Err(e) = self.save_record(&mut record, SaveKind::Housekeeping) {
                warn!(record = %id, error = %e, "Failed to persist migrated record");
            }
        }
        Ok(record)
    }

    /// Persist a record and keep its overview and ledger entries in step.
    ///
    /// # Preconditions
    /// - The record's version is not from a newer major release
    ///
    /// # Postconditions
    /// - Record document is written, then its overview is refreshed
    /// - Record is marked dirty; content saves also mark it modified
    ///
    /// # Errors
    /// - `VersionTooNew`; nothing is written and the record is unchanged
    /// - Encoding or write failure
    pub fn save_record(&self, record: &mut Record, kind: SaveKind) -> Result<()> {
        self.migrator.upgrade_record(record)?;
        let record: &Record = record;

        let bytes = encode(record)?;
        self.storage.write(&layout::record_file(&record.id)?, &bytes)?;

        let archived = self
            .ledgers
            .library_entry(&record.id)
            .map(|entry| entry.is_archived)
            .unwrap_or(false);
        self.metadata.update(|metadata| match metadata.overview_mut(&record.id) {
            Some(overview) => {
                overview.refresh_from(record);
                if kind == SaveKind::Content {
                    overview.touch();
                }
            }
            None => {
                metadata.add_overview(Overview::from_record(record, archived, now_ms()));
            }
        })?;

        self.ledgers.mark_dirty(&record.id, true)?;
        if kind == SaveKind::Content {
            self.ledgers.mark_modified(&record.id)?;
        }

        debug!(record = %record.id, kind = ?kind, size = bytes.len(), "Record saved");
        Ok(())
    }

    /// Move a record into quarantine.
    ///
    /// # Postconditions
    /// - Record directory is staged, its overview removed
    /// - Library entry is flagged deleted and the record marked dirty
    /// - `RecordDeleted` is emitted
    ///
    /// # Errors
    /// - `NotFound` if there is no live record
    pub fn delete_record(&self, id: &RecordId) -> Result<()> {
        self.quarantine.delete(&layout::record_dir(id)?)?;

        self.metadata.update(|metadata| {
            metadata.remove_overview(id);
        })?;
        self.ledgers.set_deleted(id, true)?;
        self.ledgers.mark_dirty(id, true)?;

        info!(record = %id, "Record deleted");
        self.emit(StoreEvent::RecordDeleted {
            record_id: id.clone(),
        });
        Ok(())
    }

    /// Bring a deleted record back from quarantine.
    ///
    /// # Errors
    /// - `NotFound` if the record is not staged, e.g. after a purge
    /// - `AlreadyExists` if a live record took its ID meanwhile
    /// - `Parse` if the restored record cannot be read; the files stay
    ///   restored and the ledgers already treat the record as live
    pub fn restore_record(&self, id: &RecordId) -> Result<Record> {
        self.quarantine.restore(&layout::record_dir(id)?)?;
        self.ledgers.set_deleted(id, false)?;
        self.ledgers.mark_dirty(id, true)?;
        let record = self.load_record(id)?;

        let archived = self
            .ledgers
            .library_entry(id)
            .map(|entry| entry.is_archived)
            .unwrap_or(false);
        self.metadata.update(|metadata| {
            if metadata.overview(id).is_none() {
                metadata.add_overview(Overview::from_record(&record, archived, now_ms()));
            }
        })?;

        info!(record = %id, "Record restored");
        self.emit(StoreEvent::RecordRestored {
            record_id: id.clone(),
        });
        Ok(record)
    }

    /// Permanently drop a deleted record and forget it in both ledgers.
    ///
    /// # Errors
    /// - `InvalidInput` if the record is still live
    pub fn finalize_record_deletion(&self, id: &RecordId) -> Result<()> {
        if self.record_exists(id)? {
            return Err(Error::InvalidInput(format!("Record {} is not deleted", id)));
        }
        let purged = self.quarantine.remove_one(&layout::record_dir(id)?)?;
        self.ledgers.remove(id)?;
        info!(record = %id, purged, "Record deletion finalized");
        Ok(())
    }

    /// Archive or unarchive a record.
    ///
    /// # Errors
    /// - `NotFound` if the record has no overview
    pub fn set_archived(&self, id: &RecordId, archived: bool) -> Result<()> {
        let found = self.metadata.read(|metadata| metadata.overview(id).is_some());
        if !found {
            return Err(Error::NotFound(format!("Record {}", id)));
        }
        self.metadata.update(|metadata| {
            if let Some(overview) = metadata.overview_mut(id) {
                overview.is_archived = archived;
            }
        })?;
        self.ledgers.set_archived(id, archived)?;
        self.ledgers.mark_modified(id)?;
        self.ledgers.mark_dirty(id, true)?;
        debug!(record = %id, archived, "Archive state changed");
        Ok(())
    }

    /// Every overview, in insertion order.
    pub fn overviews(&self) -> Vec<Overview> {
        self.metadata.read(|metadata| metadata.overviews().to_vec())
    }

    pub fn overview(&self, id: &RecordId) -> Option<Overview> {
        self.metadata.read(|metadata| metadata.overview(id).cloned())
    }

    /// Store freshly computed trial statistics.
    ///
    /// Entries replace existing stats for the same sensor; other sensors'
    /// stats are kept.
    ///
    /// # Errors
    /// - `NotFound` if the record or trial does not exist
    pub fn apply_trial_stats(&self, update: TrialStatsUpdated) -> Result<()> {
        let mut record = self.load_record(&update.record_id)?;
        let trial = record.trial_mut(&update.trial_id).ok_or_else(|| {
            Error::NotFound(format!("Trial {} in record {}", update.trial_id, update.record_id))
        })?;

        for entry in update.stats {
            match trial
                .sensor_stats
                .iter_mut()
                .find(|s| s.sensor_id == entry.sensor_id)
            {
                Some(existing) => *existing = entry,
                None => trial.sensor_stats.push(entry),
            }
        }

        self.save_record(&mut record, SaveKind::Housekeeping)
    }

    /// Store the raw recording of a trial.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    pub fn save_trial_recording(&self, id: &RecordId, trial_id: &str, data: &[u8]) -> Result<()> {
        if !self.record_exists(id)? {
            return Err(Error::NotFound(format!("Record {}", id)));
        }
        self.storage.write(&layout::trial_recording(id, trial_id)?, data)?;
        self.ledgers.mark_dirty(id, true)
    }

    pub fn load_trial_recording(&self, id: &RecordId, trial_id: &str) -> Result<Vec<u8>> {
        self.storage.read(&layout::trial_recording(id, trial_id)?)
    }

    /// Store a sensor spec, replacing any spec for the same provider and
    /// address.
    pub fn save_sensor_spec(&self, spec: &SensorSpec) -> Result<()> {
        let path = layout::sensors_dir()?.join(&spec.file_name()?)?;
        self.storage.write(&path, &encode(spec)?)
    }

    pub fn load_sensor_spec(&self, provider_id: &str, address: &str) -> Result<SensorSpec> {
        let path = layout::sensors_dir()?.join(&SensorSpec::file_name_for(provider_id, address)?)?;
        decode(&self.storage.read(&path)?)
    }

    pub fn delete_sensor_spec(&self, provider_id: &str, address: &str) -> Result<()> {
        let path = layout::sensors_dir()?.join(&SensorSpec::file_name_for(provider_id, address)?)?;
        self.storage.remove(&path)
    }

    /// Every readable sensor spec. Unreadable files are skipped.
    pub fn sensor_specs(&self) -> Result<Vec<SensorSpec>> {
        let dir = layout::sensors_dir()?;
        let entries = match self.storage.list(&dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut specs = Vec::new();
        for entry in entries.into_iter().filter(|e| !e.is_directory) {
            let path = dir.join(&entry.name)?;
            match self.storage.read(&path).and_then(|bytes| decode::<SensorSpec>(&bytes)) {
                Ok(spec) => specs.push(spec),
                Err(e) => warn!(file = %entry.name, error = %e, "Skipping unreadable sensor spec"),
            }
        }
        Ok(specs)
    }

    /// IDs of every record directory in the live tree.
    pub fn live_record_ids(&self) -> Result<Vec<RecordId>> {
        let entries = match self.storage.list(&layout::records_dir()?) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .filter(|e| e.is_directory)
            .filter_map(|e| match RecordId::new(e.name.as_str()) {
                Ok(id) => Some(id),
                Err(err) => {
                    warn!(entry = %e.name, error = %err, "Skipping unexpected records entry");
                    None
                }
            })
            .collect())
    }

    /// Rebuild overviews for records that have none.
    ///
    /// Archive state and last-used time come from the record's library
    /// entry when there is one; otherwise the record is unarchived and
    /// used now. Unreadable records are skipped.
    ///
    /// Returns how many overviews were added.
    pub fn repair_missing_overviews(&self) -> Result<usize> {
        let mut repaired = 0;
        for id in self.live_record_ids()? {
            if self.metadata.read(|metadata| metadata.overview(&id).is_some()) {
                continue;
            }
            let record = match self.read_record_file(&id) {
                Ok(record) => record,
                Err(e) => {
                    warn!(record = %id, error = %e, "Skipping unreadable record");
                    continue;
                }
            };

            let (archived, last_used_ms) = match self.ledgers.library_entry(&id) {
                Some(entry) if entry.last_modified_ms > 0 => {
                    (entry.is_archived, entry.last_modified_ms)
                }
                Some(entry) => (entry.is_archived, now_ms()),
                None => (false, now_ms()),
            };
            let mut overview = Overview::from_record(&record, archived, last_used_ms);
            overview.record_id = id.clone();

            if self.metadata.update(|metadata| metadata.add_overview(overview))? {
                debug!(record = %id, "Overview repaired");
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    /// Drop overviews whose record directory is gone.
    fn drop_stale_overviews(&self) -> Result<usize> {
        let ids: Vec<RecordId> = self
            .metadata
            .read(|metadata| metadata.record_ids().cloned().collect());
        let mut stale = Vec::new();
        for id in ids {
            if !self.record_exists(&id)? {
                warn!(record = %id, "Dropping overview of missing record");
                stale.push(id);
            }
        }
        if stale.is_empty() {
            return Ok(0);
        }
        let removed = self
            .metadata
            .update(|metadata| metadata.retain_overviews(|o| !stale.contains(&o.record_id)))?;
        Ok(removed.len())
    }

    /// Forget ledger entries of records that are neither live nor staged.
    fn prune_ledgers(&self) -> Result<usize> {
        let mut keep = BTreeSet::new();
        for id in self.ledgers.record_ids() {
            if self.record_exists(&id)? || self.is_record_staged(&id)? {
                keep.insert(id);
            }
        }
        self.ledgers.prune(|id| keep.contains(id))
    }
}

/// Load user metadata, regenerating it when missing or corrupt.
///
/// # Errors
/// - `VersionTooNew`; a newer build's metadata is never replaced
fn load_metadata(storage: Arc<dyn DocumentStorage>, migrator: &Migrator) -> Result<Ledger<UserMetadata>> {
    let path = layout::user_metadata()?;
    let loaded = match storage.read(&path) {
        Ok(bytes) => match decode::<UserMetadata>(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(error = %e, "Corrupt user metadata, regenerating");
                None
            }
        },
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            warn!(error = %e, "Unreadable user metadata, regenerating");
            None
        }
    };

    let (metadata, changed) = match loaded {
        Some(mut metadata) => {
            let mut changed = migrator.upgrade_metadata(&mut metadata)?;
            changed |= metadata.dedup_overviews() > 0;
            (metadata, changed)
        }
        None => (UserMetadata::new(migrator.target()), true),
    };

    let ledger = Ledger::new(storage, path, metadata);
    if changed {
        if let Err(e) = ledger.persist() {
            warn!(error = %e, "Failed to persist user metadata; next update retries");
        }
    }
    Ok(ledger)
}
