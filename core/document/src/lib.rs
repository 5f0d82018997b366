//! Experiment documents for labjournal.
//!
//! This module provides:
//! - The record, overview and sensor-spec document types
//! - The document codec and the `Versioned` accessor
//! - Version triples and their compatibility rules
//! - The migration engine that brings documents up to the running build
//!
//! # Architecture
//! Documents are plain serde types. The store decodes bytes, hands the
//! document to the migrator, and only ever writes documents whose version
//! the running build understands.

pub mod codec;
pub mod migration;
pub mod model;
pub mod overview;
pub mod sensor;
pub mod version;

pub use codec::{decode, encode, Versioned};
pub use migration::{Migrator, ASSETS_DIRNAME};
pub use model::{
    Note, NoteKind, PictureNote, Range, Record, SensorAppearance, SensorSnapshot,
    SensorTrialStats, SnapshotNote, StatsStatus, TextNote, Trial, TrialStats, TriggerNote,
};
pub use overview::{Overview, UserMetadata};
pub use sensor::SensorSpec;
pub use version::{Compatibility, Platform, VersionTriple};
