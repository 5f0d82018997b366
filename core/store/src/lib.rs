//! labjournal record store
//!
//! This module ties the document, storage and sync crates together into
//! the store an application opens once per session:
//! - `RecordStore`: record, overview, recording and sensor-spec operations
//! - `StagedDeletionArea`: recoverable deletion of records and assets
//! - Cover image bookkeeping with undoable asset removal
//! - Store events for observers such as thumbnail caches
//!
//! # On-disk layout
//! See [`layout`]. Everything the store writes goes through the atomic
//! file store, except quarantine moves which are plain renames.

pub mod assets;
pub mod config;
pub mod events;
pub mod layout;
pub mod quarantine;
pub mod store;

pub use assets::UndoToken;
pub use config::StoreConfig;
pub use events::{CollectingObserver, NoopObserver, StoreEvent, StoreObserver, TrialStatsUpdated};
pub use quarantine::StagedDeletionArea;
pub use store::{RecordStore, SaveKind};
