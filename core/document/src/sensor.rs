//! External sensor specifications.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use labjournal_common::{Error, Result};

/// A paired external sensor, stored one file per (provider, address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    pub provider_id: String,
    pub address: String,
    #[serde(default)]
    pub name: String,
    /// Provider-specific settings, opaque to the store.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl SensorSpec {
    pub fn new(provider_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            address: address.into(),
            name: String::new(),
            config: BTreeMap::new(),
        }
    }

    /// File name of this spec within the sensors directory.
    ///
    /// # Errors
    /// - Provider or address empty, or containing a path separator
    pub fn file_name(&self) -> Result<String> {
        Self::file_name_for(&self.provider_id, &self.address)
    }

    /// File name for a (provider, address) pair.
    pub fn file_name_for(provider_id: &str, address: &str) -> Result<String> {
        if provider_id.is_empty() || address.is_empty() {
            return Err(Error::InvalidInput(
                "Sensor provider and address must be non-empty".to_string(),
            ));
        }
        let name = format!("{provider_id}{address}.doc");
        if name.contains('/') || name.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "Sensor file name cannot contain separators: {name}"
            )));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        let spec = SensorSpec::new("bluetooth_le", "AA:BB:CC");
        assert_eq!(spec.file_name().unwrap(), "bluetooth_leAA:BB:CC.doc");
    }

    #[test]
    fn test_file_name_rejects_separators() {
        assert!(SensorSpec::new("p", "a/b").file_name().is_err());
        assert!(SensorSpec::new("", "a").file_name().is_err());
    }
}
