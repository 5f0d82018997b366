//! Experiment record document.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::codec::Versioned;
use crate::version::VersionTriple;
use labjournal_common::RecordId;

/// A full experiment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique record identifier; also the directory name on disk.
    pub id: RecordId,
    pub title: String,
    /// Cover image, relative to the record directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub trials: Vec<Trial>,
    #[serde(default)]
    pub file_version: VersionTriple,
    #[serde(default)]
    pub creation_time_ms: i64,
}

impl Record {
    /// Create an empty record stamped with `version`.
    pub fn new(id: RecordId, title: impl Into<String>, version: VersionTriple) -> Self {
        Self {
            id,
            title: title.into(),
            image_path: None,
            notes: Vec::new(),
            trials: Vec::new(),
            file_version: version,
            creation_time_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Picture-note file paths in document order, record notes first, then
    /// each trial's notes.
    pub fn picture_paths(&self) -> impl Iterator<Item = &str> {
        self.all_notes().filter_map(Note::picture_path)
    }

    /// Whether any Picture note points at `path`.
    pub fn references_picture(&self, path: &str) -> bool {
        self.picture_paths().any(|p| p == path)
    }

    /// Whether `path` is used anywhere in the record: as cover, by a
    /// Picture note, or as a sensor icon.
    pub fn references_asset(&self, path: &str) -> bool {
        self.image_path.as_deref() == Some(path)
            || self.all_notes().any(|note| note.references(path))
            || self
                .trials
                .iter()
                .flat_map(|t| t.sensor_appearances.iter())
                .any(|a| a.icon_path.as_deref() == Some(path))
    }

    /// Every note in the record, in document order.
    pub fn all_notes(&self) -> impl Iterator<Item = &Note> {
        self.notes
            .iter()
            .chain(self.trials.iter().flat_map(|t| t.notes.iter()))
    }

    /// Mutable access to every note in the record.
    pub fn all_notes_mut(&mut self) -> impl Iterator<Item = &mut Note> {
        self.notes
            .iter_mut()
            .chain(self.trials.iter_mut().flat_map(|t| t.notes.iter_mut()))
    }

    /// Find a trial by its ID.
    pub fn trial_mut(&mut self, trial_id: &str) -> Option<&mut Trial> {
        self.trials.iter_mut().find(|t| t.id == trial_id)
    }
}

impl Versioned for Record {
    fn file_version(&self) -> VersionTriple {
        self.file_version
    }

    fn set_file_version(&mut self, version: VersionTriple) {
        self.file_version = version;
    }
}

/// A timestamped note attached to a record or a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub kind: NoteKind,
}

/// The closed set of note variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NoteKind {
    Text(TextNote),
    Picture(PictureNote),
    Snapshot(SnapshotNote),
    Trigger(TriggerNote),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNote {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PictureNote {
    /// Image file, relative to the record directory.
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNote {
    #[serde(default)]
    pub snapshots: Vec<SensorSnapshot>,
}

/// A single sensor reading captured into a snapshot note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    pub sensor_id: String,
    pub value: f64,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerNote {
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Note {
    /// Create a note stamped now with a fresh ID.
    pub fn new(kind: NoteKind) -> Self {
        Self::at(Utc::now().timestamp_millis(), kind)
    }

    /// Create a note with a fresh ID at `timestamp_ms`.
    pub fn at(timestamp_ms: i64, kind: NoteKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms,
            kind,
        }
    }

    /// Create a text note.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(NoteKind::Text(TextNote { text: text.into() }))
    }

    /// Create a picture note.
    pub fn picture(file_path: impl Into<String>) -> Self {
        Self::new(NoteKind::Picture(PictureNote {
            file_path: file_path.into(),
            caption: None,
        }))
    }

    /// File path of a Picture note.
    pub fn picture_path(&self) -> Option<&str> {
        match &self.kind {
            NoteKind::Picture(picture) => Some(&picture.file_path),
            NoteKind::Text(_) | NoteKind::Snapshot(_) | NoteKind::Trigger(_) => None,
        }
    }

    /// Mutable file path of a Picture note.
    pub fn picture_path_mut(&mut self) -> Option<&mut String> {
        match &mut self.kind {
            NoteKind::Picture(picture) => Some(&mut picture.file_path),
            NoteKind::Text(_) | NoteKind::Snapshot(_) | NoteKind::Trigger(_) => None,
        }
    }

    /// Whether this note points at the file `path`.
    pub fn references(&self, path: &str) -> bool {
        match &self.kind {
            NoteKind::Picture(picture) => picture.file_path == path,
            NoteKind::Snapshot(snapshot) => snapshot
                .snapshots
                .iter()
                .any(|s| s.icon_path.as_deref() == Some(path)),
            NoteKind::Trigger(trigger) => trigger.icon_path.as_deref() == Some(path),
            NoteKind::Text(_) => false,
        }
    }

    /// Visit every sensor icon path this note carries.
    pub fn for_each_icon_path_mut(&mut self, mut f: impl FnMut(&mut Option<String>)) {
        match &mut self.kind {
            NoteKind::Snapshot(snapshot) => {
                for capture in &mut snapshot.snapshots {
                    f(&mut capture.icon_path);
                }
            }
            NoteKind::Trigger(trigger) => f(&mut trigger.icon_path),
            NoteKind::Text(_) | NoteKind::Picture(_) => {}
        }
    }
}

/// Recording time range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub start_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
}

impl Range {
    /// Length of the range, if it has ended.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_ms.map(|end| end - self.start_ms)
    }
}

/// One recording session within a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub id: String,
    /// One-based position in the record.
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Legacy free-text caption, superseded by notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub recording_range: Range,
    #[serde(default)]
    pub sensor_ids: Vec<String>,
    #[serde(default)]
    pub sensor_stats: Vec<SensorTrialStats>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub sensor_appearances: Vec<SensorAppearance>,
    #[serde(default)]
    pub archived: bool,
}

impl Trial {
    /// Create a trial that started at `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            index: 0,
            title: None,
            caption: None,
            recording_range: Range {
                start_ms,
                end_ms: None,
            },
            sensor_ids: Vec::new(),
            sensor_stats: Vec::new(),
            notes: Vec::new(),
            sensor_appearances: Vec::new(),
            archived: false,
        }
    }

    /// Stats entry for a sensor.
    pub fn stats_for(&self, sensor_id: &str) -> Option<&SensorTrialStats> {
        self.sensor_stats.iter().find(|s| s.sensor_id == sensor_id)
    }
}

/// Per-sensor statistics of a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorTrialStats {
    pub sensor_id: String,
    pub stats: TrialStats,
}

/// Whether stats reflect the recorded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatsStatus {
    #[default]
    Valid,
    /// Must be recomputed from the recording.
    NeedsUpdate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_data_points: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_presenter_tier_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoom_level_between_tiers: Option<u32>,
    #[serde(default)]
    pub status: StatsStatus,
}

impl TrialStats {
    /// Whether any of the recording-derived figures is missing.
    pub fn is_incomplete(&self) -> bool {
        self.total_duration_ms.is_none()
            || self.num_data_points.is_none()
            || self.zoom_presenter_tier_count.is_none()
            || self.zoom_level_between_tiers.is_none()
    }
}

/// How a sensor was presented during a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorAppearance {
    pub sensor_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    fn sample_record() -> Record {
        let mut record = Record::new(
            RecordId::new("exp").unwrap(),
            "Pendulum",
            VersionTriple::CURRENT,
        );
        record.notes.push(Note::text("hello"));
        record.notes.push(Note::picture("assets/a.jpg"));
        let mut trial = Trial::new(1_000);
        trial.notes.push(Note::picture("assets/b.jpg"));
        record.trials.push(trial);
        record
    }

    #[test]
    fn test_picture_paths_in_document_order() {
        let record = sample_record();
        let paths: Vec<&str> = record.picture_paths().collect();
        assert_eq!(paths, vec!["assets/a.jpg", "assets/b.jpg"]);
        assert!(record.references_picture("assets/b.jpg"));
        assert!(!record.references_picture("assets/c.jpg"));
    }

    #[test]
    fn test_references_asset_covers_icons_and_cover() {
        let mut record = sample_record();
        record.image_path = Some("assets/cover.jpg".into());
        record.trials[0].sensor_appearances.push(SensorAppearance {
            sensor_id: "s".into(),
            name: "Light".into(),
            units: None,
            icon_path: Some("assets/icon.png".into()),
        });
        record.notes.push(Note::new(NoteKind::Trigger(TriggerNote {
            sensor_id: "s".into(),
            icon_path: Some("assets/trigger.png".into()),
            value: None,
        })));

        for path in ["assets/cover.jpg", "assets/a.jpg", "assets/icon.png", "assets/trigger.png"] {
            assert!(record.references_asset(path), "{path}");
        }
        assert!(!record.references_asset("assets/other.jpg"));
    }

    #[test]
    fn test_note_tagging() {
        let note = Note::at(5, NoteKind::Text(TextNote { text: "t".into() }));
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "t");
        assert_eq!(json["timestampMs"], 5);
    }

    #[test]
    fn test_record_roundtrip_is_stable() {
        let record = sample_record();
        let bytes = encode(&record).unwrap();
        let decoded: Record = decode(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(encode(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_legacy_record_without_version_decodes() {
        let json = br#"{"id":"old","title":"Old"}"#;
        let record: Record = decode(json).unwrap();
        assert_eq!(record.file_version, VersionTriple::LEGACY);
        assert!(record.image_path.is_none());
    }

    #[test]
    fn test_icon_path_visitor_covers_snapshots_and_triggers() {
        let mut snapshot = Note::new(NoteKind::Snapshot(SnapshotNote {
            snapshots: vec![
                SensorSnapshot {
                    sensor_id: "a".into(),
                    value: 1.0,
                    timestamp_ms: 0,
                    icon_path: Some("x".into()),
                },
                SensorSnapshot {
                    sensor_id: "b".into(),
                    value: 2.0,
                    timestamp_ms: 0,
                    icon_path: None,
                },
            ],
        }));
        let mut seen = 0;
        snapshot.for_each_icon_path_mut(|_| seen += 1);
        assert_eq!(seen, 2);

        let mut text = Note::text("no icons");
        text.for_each_icon_path_mut(|_| panic!("text notes have no icons"));
    }
}
