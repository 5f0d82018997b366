//! Document codec boundary.
//!
//! Documents are serde types encoded as pretty JSON. Field order follows
//! struct declaration order and every map is ordered, so encoding the same
//! document twice yields identical bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::version::VersionTriple;
use labjournal_common::{Error, Result};

/// A document that carries its own schema version.
pub trait Versioned {
    /// Version the document was last written with.
    fn file_version(&self) -> VersionTriple;

    /// Replace the stored version.
    fn set_file_version(&mut self, version: VersionTriple);
}

/// Serialize a document to bytes.
pub fn encode<T: Serialize>(doc: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(doc).map_err(|e| Error::Parse(e.to_string()))
}

/// Deserialize a document from bytes.
///
/// # Errors
/// - `Parse` if the bytes are not a valid document of type `T`
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))
}
