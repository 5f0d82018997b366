//! Schema migration for stored documents.
//!
//! A document is brought to the build's version triple in three stages:
//! major steps, minor steps of the target major, then platform fix-ups
//! gated on the stored platform version. Every step is idempotent and the
//! stored version is advanced as steps complete, so running the migrator on
//! its own output is a no-op.

use tracing::{debug, info, warn};

use crate::codec::Versioned;
use crate::model::{Note, NoteKind, Record, SensorTrialStats, StatsStatus, TextNote, TrialStats};
use crate::overview::UserMetadata;
use crate::version::{Compatibility, Platform, VersionTriple};
use labjournal_common::{Error, Result};

/// Directory, relative to a record, that holds its binary assets.
pub const ASSETS_DIRNAME: &str = "assets";

/// Legacy icon identifiers and the sensor IDs that replace them.
const LEGACY_ICON_IDS: &[(&str, &str)] = &[
    ("ic_sensor_acc_x", "accelerometer_x"),
    ("ic_sensor_acc_y", "accelerometer_y"),
    ("ic_sensor_acc_z", "accelerometer_z"),
    ("ic_sensor_acc_linear", "linear_accelerometer"),
    ("ic_sensor_light", "ambient_light"),
    ("ic_sensor_sound", "decibel_source"),
    ("ic_sensor_barometer", "barometric_pressure"),
    ("ic_sensor_compass", "compass"),
    ("ic_sensor_magnet", "magnetic_rotation"),
];

struct MajorStep<T> {
    from: u32,
    apply: fn(&mut T),
}

struct MinorStep<T> {
    major: u32,
    from: u32,
    apply: fn(&mut T),
}

/// A fix-up applied when the stored platform version is below the
/// threshold for the build's platform.
struct PlatformFixup<T> {
    name: &'static str,
    android: u32,
    ios: u32,
    desktop: u32,
    apply: fn(&mut T),
}

impl<T> PlatformFixup<T> {
    fn threshold(&self, platform: Platform) -> u32 {
        match platform {
            Platform::Android => self.android,
            Platform::Ios => self.ios,
            Platform::Desktop => self.desktop,
        }
    }
}

struct MigrationPlan<T: 'static> {
    major_steps: &'static [MajorStep<T>],
    minor_steps: &'static [MinorStep<T>],
    fixups: &'static [PlatformFixup<T>],
}

const RECORD_PLAN: MigrationPlan<Record> = MigrationPlan {
    major_steps: &[MajorStep {
        from: 0,
        apply: version_only::<Record>,
    }],
    minor_steps: &[
        MinorStep {
            major: 1,
            from: 0,
            apply: renumber_trials,
        },
        MinorStep {
            major: 1,
            from: 1,
            apply: captions_to_notes,
        },
    ],
    fixups: &[
        PlatformFixup {
            name: "relative-asset-paths",
            android: 300,
            ios: 400,
            desktop: 1,
            apply: relativize_asset_paths,
        },
        PlatformFixup {
            name: "synthesize-trial-stats",
            android: 400,
            ios: 500,
            desktop: 1,
            apply: synthesize_trial_stats,
        },
        PlatformFixup {
            name: "canonical-sensor-icons",
            android: 500,
            ios: 700,
            desktop: 1,
            apply: remap_legacy_icons,
        },
    ],
};

const METADATA_PLAN: MigrationPlan<UserMetadata> = MigrationPlan {
    major_steps: &[MajorStep {
        from: 0,
        apply: version_only::<UserMetadata>,
    }],
    minor_steps: &[],
    fixups: &[],
};

/// Upgrades documents to a fixed target version.
#[derive(Debug, Clone, Copy)]
pub struct Migrator {
    target: VersionTriple,
}

impl Migrator {
    /// Create a migrator for the build's current version.
    pub fn new(target: VersionTriple) -> Self {
        Self { target }
    }

    /// Version documents are migrated to.
    pub fn target(&self) -> VersionTriple {
        self.target
    }

    /// Refuse versions from a newer major release.
    ///
    /// # Errors
    /// - `VersionTooNew` if `version.major` exceeds the target major
    pub fn check(&self, version: &VersionTriple) -> Result<Compatibility> {
        match version.compatibility(&self.target) {
            Compatibility::TooNew => Err(Error::VersionTooNew {
                found: version.major,
                supported: self.target.major,
            }),
            other => Ok(other),
        }
    }

    /// Bring a record up to the target version.
    ///
    /// Returns whether the record changed and should be persisted.
    ///
    /// # Errors
    /// - `VersionTooNew`; the record is left untouched
    pub fn upgrade_record(&self, record: &mut Record) -> Result<bool> {
        self.run(record, &RECORD_PLAN)
    }

    /// Bring the user metadata document up to the target version.
    pub fn upgrade_metadata(&self, metadata: &mut UserMetadata) -> Result<bool> {
        self.run(metadata, &METADATA_PLAN)
    }

    fn run<T: Versioned + 'static>(&self, doc: &mut T, plan: &MigrationPlan<T>) -> Result<bool> {
        let stored = doc.file_version();
        let target = self.target;

        match self.check(&stored)? {
            Compatibility::Current => return Ok(false),
            Compatibility::NewerMinor => {
                debug!(stored = %stored, target = %target, "Accepting document from newer minor");
                return Ok(false);
            }
            Compatibility::NeedsUpgrade | Compatibility::TooNew => {}
        }

        let mut version = stored;

        while version.major < target.major {
            let Some(step) = plan.major_steps.iter().find(|s| s.from == version.major) else {
                warn!(major = version.major, "No migration step for major version");
                break;
            };
            (step.apply)(doc);
            version.major += 1;
            version.minor = 0;
        }

        if version.major == target.major {
            while version.minor < target.minor {
                if let Some(step) = plan
                    .minor_steps
                    .iter()
                    .find(|s| s.major == version.major && s.from == version.minor)
                {
                    (step.apply)(doc);
                }
                version.minor += 1;
            }

            // A document from another platform gets the full fix-up set.
            let effective = if version.platform == target.platform {
                version.platform_version
            } else {
                0
            };
            for fixup in plan.fixups {
                let threshold = fixup.threshold(target.platform);
                if effective < threshold && threshold <= target.platform_version {
                    debug!(fixup = fixup.name, "Applying platform fix-up");
                    (fixup.apply)(doc);
                }
            }

            if version.platform != target.platform
                || version.platform_version < target.platform_version
            {
                version.platform = target.platform;
                version.platform_version = target.platform_version;
            }
        }

        let changed = version != stored;
        doc.set_file_version(version);
        if changed {
            info!(from = %stored, to = %version, "Document migrated");
        }
        Ok(changed)
    }
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(VersionTriple::CURRENT)
    }
}

fn version_only<T>(_doc: &mut T) {}

fn renumber_trials(record: &mut Record) {
    for (i, trial) in record.trials.iter_mut().enumerate() {
        trial.index = i as u32 + 1;
    }
}

fn captions_to_notes(record: &mut Record) {
    for trial in &mut record.trials {
        let Some(caption) = trial.caption.take() else {
            continue;
        };
        let text = caption.trim();
        if text.is_empty() {
            continue;
        }
        let start = trial.recording_range.start_ms;
        let note = Note::at(
            start,
            NoteKind::Text(TextNote {
                text: text.to_string(),
            }),
        );
        let at = trial.notes.partition_point(|n| n.timestamp_ms <= start);
        trial.notes.insert(at, note);
    }
}

/// Record-relative form of an absolute asset path, if it is absolute.
fn relative_asset_path(path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let has_drive = normalized.as_bytes().get(1) == Some(&b':');
    let absolute = normalized.starts_with('/') || normalized.contains("://") || has_drive;
    if !absolute {
        return None;
    }

    let marker = format!("/{ASSETS_DIRNAME}/");
    if let Some(idx) = normalized.rfind(&marker) {
        return Some(normalized[idx + 1..].to_string());
    }
    let name = normalized.rsplit('/').next().filter(|n| !n.is_empty())?;
    Some(format!("{ASSETS_DIRNAME}/{name}"))
}

fn relativize_asset_paths(record: &mut Record) {
    if let Some(relative) = record.image_path.as_deref().and_then(relative_asset_path) {
        record.image_path = Some(relative);
    }
    for note in record.all_notes_mut() {
        if let Some(path) = note.picture_path_mut() {
            if let Some(relative) = relative_asset_path(path) {
                *path = relative;
            }
        }
    }
}

fn synthesize_trial_stats(record: &mut Record) {
    for trial in &mut record.trials {
        let duration = trial.recording_range.duration_ms();

        let missing: Vec<String> = trial
            .sensor_ids
            .iter()
            .filter(|id| trial.stats_for(id).is_none())
            .cloned()
            .collect();
        for sensor_id in missing {
            trial.sensor_stats.push(SensorTrialStats {
                sensor_id,
                stats: TrialStats::default(),
            });
        }

        for entry in &mut trial.sensor_stats {
            if entry.stats.total_duration_ms.is_none() {
                entry.stats.total_duration_ms = duration;
            }
            if entry.stats.is_incomplete() {
                entry.stats.status = StatsStatus::NeedsUpdate;
            }
        }
    }
}

fn canonical_icon(icon: &mut Option<String>) {
    let Some(current) = icon.as_deref() else {
        return;
    };
    if let Some((_, canonical)) = LEGACY_ICON_IDS.iter().find(|(legacy, _)| *legacy == current) {
        *icon = Some((*canonical).to_string());
    }
}

fn remap_legacy_icons(record: &mut Record) {
    for note in record.all_notes_mut() {
        note.for_each_icon_path_mut(canonical_icon);
    }
    for trial in &mut record.trials {
        for appearance in &mut trial.sensor_appearances {
            canonical_icon(&mut appearance.icon_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::model::{
        PictureNote, SensorAppearance, SensorSnapshot, SnapshotNote, Trial, TriggerNote,
    };
    use labjournal_common::RecordId;
    use proptest::prelude::*;

    const IOS_CURRENT: VersionTriple = VersionTriple::new(1, 2, Platform::Ios, 706);

    fn legacy_record(version: VersionTriple) -> Record {
        let mut record = Record::new(RecordId::new("legacy").unwrap(), "Old", version);
        record.image_path = Some("/var/mobile/Science/records/legacy/assets/cover.jpg".into());
        record.notes.push(Note::at(
            10,
            NoteKind::Picture(PictureNote {
                file_path: "/var/mobile/Science/records/legacy/assets/p1.jpg".into(),
                caption: None,
            }),
        ));
        record.notes.push(Note::at(
            20,
            NoteKind::Snapshot(SnapshotNote {
                snapshots: vec![SensorSnapshot {
                    sensor_id: "light".into(),
                    value: 3.0,
                    timestamp_ms: 20,
                    icon_path: Some("ic_sensor_light".into()),
                }],
            }),
        ));

        for (start, caption) in [(1_000, Some("first run")), (5_000, None), (9_000, Some("  "))] {
            let mut trial = Trial::new(start);
            trial.index = 7;
            trial.caption = caption.map(String::from);
            trial.recording_range.end_ms = Some(start + 500);
            trial.sensor_ids = vec!["light".into()];
            trial.notes.push(Note::at(
                start + 100,
                NoteKind::Trigger(TriggerNote {
                    sensor_id: "light".into(),
                    icon_path: Some("ic_sensor_acc_x".into()),
                    value: None,
                }),
            ));
            trial.sensor_appearances.push(SensorAppearance {
                sensor_id: "light".into(),
                name: "Light".into(),
                units: None,
                icon_path: Some("ic_sensor_compass".into()),
            });
            record.trials.push(trial);
        }
        record
    }

    #[test]
    fn test_legacy_ios_record_reaches_current() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(0, 0, Platform::Ios, 0));

        assert!(migrator.upgrade_record(&mut record).unwrap());

        assert_eq!(record.file_version, IOS_CURRENT);
        let indices: Vec<u32> = record.trials.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let first = &record.trials[0];
        assert!(first.caption.is_none());
        let caption_note = &first.notes[0];
        assert_eq!(caption_note.timestamp_ms, 1_000);
        assert_eq!(
            caption_note.kind,
            NoteKind::Text(TextNote {
                text: "first run".into()
            })
        );
        // Blank captions are dropped without a note.
        assert!(record.trials[2].caption.is_none());
        assert_eq!(record.trials[2].notes.len(), 1);
    }

    #[test]
    fn test_platform_fixups_rewrite_paths_stats_and_icons() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(0, 0, Platform::Ios, 0));
        migrator.upgrade_record(&mut record).unwrap();

        assert_eq!(record.image_path.as_deref(), Some("assets/cover.jpg"));
        assert_eq!(record.notes[0].picture_path(), Some("assets/p1.jpg"));

        let stats = &record.trials[1].stats_for("light").unwrap().stats;
        assert_eq!(stats.total_duration_ms, Some(500));
        assert_eq!(stats.status, StatsStatus::NeedsUpdate);

        match &record.notes[1].kind {
            NoteKind::Snapshot(s) => {
                assert_eq!(s.snapshots[0].icon_path.as_deref(), Some("ambient_light"))
            }
            other => panic!("unexpected note {other:?}"),
        }
        let trigger_icon = match &record.trials[0].notes.last().unwrap().kind {
            NoteKind::Trigger(t) => t.icon_path.clone(),
            other => panic!("unexpected note {other:?}"),
        };
        assert_eq!(trigger_icon.as_deref(), Some("accelerometer_x"));
        assert_eq!(
            record.trials[0].sensor_appearances[0].icon_path.as_deref(),
            Some("compass")
        );
    }

    #[test]
    fn test_second_run_is_noop_and_byte_identical() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(0, 0, Platform::Ios, 0));

        migrator.upgrade_record(&mut record).unwrap();
        let first = encode(&record).unwrap();

        assert!(!migrator.upgrade_record(&mut record).unwrap());
        assert_eq!(encode(&record).unwrap(), first);
    }

    #[test]
    fn test_newer_major_fails_and_leaves_document_untouched() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(2, 0, Platform::Ios, 0));
        let before = record.clone();

        let err = migrator.upgrade_record(&mut record).unwrap_err();

        assert!(matches!(
            err,
            Error::VersionTooNew {
                found: 2,
                supported: 1
            }
        ));
        assert_eq!(record, before);
    }

    #[test]
    fn test_newer_minor_is_accepted_without_migration() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(1, 5, Platform::Android, 0));
        let before = record.clone();

        assert!(!migrator.upgrade_record(&mut record).unwrap());
        assert_eq!(record, before);
    }

    #[test]
    fn test_foreign_platform_adopts_build_identity() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(1, 2, Platform::Android, 9_000));

        assert!(migrator.upgrade_record(&mut record).unwrap());

        assert_eq!(record.file_version, IOS_CURRENT);
        // Cross-origin documents get the whole fix-up set.
        assert_eq!(record.image_path.as_deref(), Some("assets/cover.jpg"));
        // Minor steps were not re-run: indices untouched.
        assert_eq!(record.trials[0].index, 7);
    }

    #[test]
    fn test_fixups_respect_thresholds() {
        let migrator = Migrator::new(IOS_CURRENT);
        // Past the asset-path and stats thresholds, below the icon one.
        let mut record = legacy_record(VersionTriple::new(1, 2, Platform::Ios, 600));

        migrator.upgrade_record(&mut record).unwrap();

        assert!(record.image_path.as_deref().unwrap().starts_with('/'));
        assert!(record.trials[0].sensor_stats.is_empty());
        assert_eq!(
            record.trials[0].sensor_appearances[0].icon_path.as_deref(),
            Some("compass")
        );
    }

    #[test]
    fn test_newer_build_of_same_platform_is_left_alone() {
        let migrator = Migrator::new(IOS_CURRENT);
        let mut record = legacy_record(VersionTriple::new(1, 2, Platform::Ios, 800));
        assert!(!migrator.upgrade_record(&mut record).unwrap());
        assert_eq!(record.file_version.platform_version, 800);
    }

    #[test]
    fn test_metadata_upgrade() {
        let migrator = Migrator::default();
        let mut metadata = UserMetadata::new(VersionTriple::LEGACY);
        assert!(migrator.upgrade_metadata(&mut metadata).unwrap());
        assert_eq!(metadata.file_version, VersionTriple::CURRENT);
        assert!(!migrator.upgrade_metadata(&mut metadata).unwrap());
    }

    #[test]
    fn test_relative_asset_path_forms() {
        assert_eq!(relative_asset_path("assets/a.jpg"), None);
        assert_eq!(
            relative_asset_path("/data/user/0/app/files/experiments/x/assets/a.jpg").as_deref(),
            Some("assets/a.jpg")
        );
        assert_eq!(
            relative_asset_path("file:///tmp/pic.png").as_deref(),
            Some("assets/pic.png")
        );
        assert_eq!(
            relative_asset_path("C:\\Users\\me\\assets\\a.jpg").as_deref(),
            Some("assets/a.jpg")
        );
        assert_eq!(relative_asset_path("/"), None);
    }

    fn platform() -> impl Strategy<Value = Platform> {
        prop_oneof![
            Just(Platform::Android),
            Just(Platform::Ios),
            Just(Platform::Desktop)
        ]
    }

    proptest! {
        #[test]
        fn prop_migration_is_idempotent(
            major in 0u32..2,
            minor in 0u32..4,
            p in platform(),
            pv in 0u32..1_000,
        ) {
            let migrator = Migrator::new(IOS_CURRENT);
            let mut record = legacy_record(VersionTriple::new(major, minor, p, pv));

            migrator.upgrade_record(&mut record).unwrap();
            let first = encode(&record).unwrap();

            prop_assert!(!migrator.upgrade_record(&mut record).unwrap());
            prop_assert_eq!(encode(&record).unwrap(), first);
        }
    }
}
