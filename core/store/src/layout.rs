//! Paths of every document the store keeps, relative to the store root.
//!
//! ```text
//! <root>/
//!   user_metadata.doc
//!   experiment_library.doc
//!   local_sync_status.doc
//!   bluetoothSensors/<provider><address>.doc
//!   records/<id>/record.doc
//!   records/<id>/recording_<trial>.doc
//!   records/<id>/assets/<file>
//! <deleted_root>/DeletedData/...   mirrors the live tree
//! ```

use labjournal_common::{Error, RecordId, RelativePath, Result};

pub use labjournal_document::ASSETS_DIRNAME;
pub use labjournal_sync::{LIBRARY_FILENAME, SYNC_STATUS_FILENAME};

/// Directory holding one subdirectory per record.
pub const RECORDS_DIRNAME: &str = "records";

/// Record document inside a record directory.
pub const RECORD_FILENAME: &str = "record.doc";

/// Root document holding every overview.
pub const USER_METADATA_FILENAME: &str = "user_metadata.doc";

/// Directory of external sensor specs.
pub const SENSORS_DIRNAME: &str = "bluetoothSensors";

/// Quarantine directory under the deleted-data root.
pub const QUARANTINE_DIRNAME: &str = "DeletedData";

/// Asset quarantine used by older builds. Purged, never written.
pub const LEGACY_QUARANTINE_DIRNAME: &str = "DeletedAssets";

pub fn records_dir() -> Result<RelativePath> {
    RelativePath::parse(RECORDS_DIRNAME)
}

pub fn record_dir(id: &RecordId) -> Result<RelativePath> {
    records_dir()?.join(id.as_str())
}

pub fn record_file(id: &RecordId) -> Result<RelativePath> {
    record_dir(id)?.join(RECORD_FILENAME)
}

pub fn assets_dir(id: &RecordId) -> Result<RelativePath> {
    record_dir(id)?.join(ASSETS_DIRNAME)
}

/// Resolve an asset path as stored in a record (`assets/x.jpg`).
///
/// # Errors
/// - `InvalidInput` if the path is empty or tries to leave the record
pub fn asset_path(id: &RecordId, asset: &str) -> Result<RelativePath> {
    let relative = RelativePath::parse(asset)?;
    if relative.is_root() {
        return Err(Error::InvalidInput("Empty asset path".to_string()));
    }
    Ok(record_dir(id)?.join_path(&relative))
}

/// Record-relative form of an asset file name.
pub fn asset_reference(file_name: &str) -> String {
    format!("{ASSETS_DIRNAME}/{file_name}")
}

pub fn trial_recording(id: &RecordId, trial_id: &str) -> Result<RelativePath> {
    record_dir(id)?.join(&format!("recording_{trial_id}.doc"))
}

pub fn user_metadata() -> Result<RelativePath> {
    RelativePath::parse(USER_METADATA_FILENAME)
}

pub fn sensors_dir() -> Result<RelativePath> {
    RelativePath::parse(SENSORS_DIRNAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_paths() {
        let id = RecordId::new("exp1").unwrap();
        assert_eq!(record_file(&id).unwrap().to_string_path(), "records/exp1/record.doc");
        assert_eq!(
            trial_recording(&id, "t9").unwrap().to_string_path(),
            "records/exp1/recording_t9.doc"
        );
        assert_eq!(
            asset_path(&id, "assets/pic.jpg").unwrap().to_string_path(),
            "records/exp1/assets/pic.jpg"
        );
    }

    #[test]
    fn test_asset_path_cannot_escape_record() {
        let id = RecordId::new("exp1").unwrap();
        assert!(asset_path(&id, "../exp2/record.doc").is_err());
        assert!(asset_path(&id, "").is_err());
    }
}
