//! Schema version triples.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Build family that last wrote a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Desktop => "desktop",
        };
        f.write_str(name)
    }
}

/// Schema version of a stored document.
///
/// `major` and `minor` are shared by every platform; `platform_version`
/// only means something together with `platform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub platform: Platform,
    pub platform_version: u32,
}

/// How a stored version relates to the version a build runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Written by a newer major release. Must not be opened or saved.
    TooNew,
    /// Written by a newer minor release of the same major. Accepted as-is.
    NewerMinor,
    /// Older than the build, or written by another platform.
    NeedsUpgrade,
    /// Nothing to do.
    Current,
}

impl VersionTriple {
    /// Version this build reads and writes.
    pub const CURRENT: Self = Self::new(1, 2, Platform::Desktop, 1);

    /// Version assumed for documents that predate version stamping.
    pub const LEGACY: Self = Self::new(0, 0, Platform::Desktop, 0);

    pub const fn new(major: u32, minor: u32, platform: Platform, platform_version: u32) -> Self {
        Self {
            major,
            minor,
            platform,
            platform_version,
        }
    }

    /// Classify this stored version against the build's `target`.
    ///
    /// Newer majors are rejected while newer minors are tolerated without
    /// migration. Both outcomes are decided here and nowhere else.
    pub fn compatibility(&self, target: &VersionTriple) -> Compatibility {
        match self.major.cmp(&target.major) {
            Ordering::Greater => return Compatibility::TooNew,
            Ordering::Less => return Compatibility::NeedsUpgrade,
            Ordering::Equal => {}
        }
        match self.minor.cmp(&target.minor) {
            Ordering::Greater => return Compatibility::NewerMinor,
            Ordering::Less => return Compatibility::NeedsUpgrade,
            Ordering::Equal => {}
        }
        if self.platform != target.platform || self.platform_version < target.platform_version {
            Compatibility::NeedsUpgrade
        } else {
            Compatibility::Current
        }
    }
}

impl Default for VersionTriple {
    fn default() -> Self {
        Self::LEGACY
    }
}

impl PartialOrd for VersionTriple {
    /// Orders by major, then minor, then platform version.
    ///
    /// Two versions with equal major and minor but different platforms are
    /// incomparable.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.major.cmp(&other.major) {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        match self.minor.cmp(&other.minor) {
            Ordering::Equal => {}
            ord => return Some(ord),
        }
        if self.platform == other.platform {
            Some(self.platform_version.cmp(&other.platform_version))
        } else {
            None
        }
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} ({} {})",
            self.major, self.minor, self.platform, self.platform_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TARGET: VersionTriple = VersionTriple::new(1, 2, Platform::Ios, 706);

    #[test]
    fn test_newer_major_is_too_new() {
        let stored = VersionTriple::new(2, 0, Platform::Ios, 0);
        assert_eq!(stored.compatibility(&TARGET), Compatibility::TooNew);
        // Even with an older minor the major decides.
        let stored = VersionTriple::new(2, 0, Platform::Android, 9999);
        assert_eq!(stored.compatibility(&TARGET), Compatibility::TooNew);
    }

    #[test]
    fn test_newer_minor_is_tolerated() {
        let stored = VersionTriple::new(1, 3, Platform::Ios, 0);
        assert_eq!(stored.compatibility(&TARGET), Compatibility::NewerMinor);
        let stored = VersionTriple::new(1, 3, Platform::Android, 1);
        assert_eq!(stored.compatibility(&TARGET), Compatibility::NewerMinor);
    }

    #[test]
    fn test_older_versions_need_upgrade() {
        let older_major = VersionTriple::new(0, 9, Platform::Ios, 9999);
        let older_minor = VersionTriple::new(1, 1, Platform::Ios, 9999);
        let older_build = VersionTriple::new(1, 2, Platform::Ios, 705);
        for stored in [older_major, older_minor, older_build] {
            assert_eq!(stored.compatibility(&TARGET), Compatibility::NeedsUpgrade);
        }
    }

    #[test]
    fn test_other_platform_needs_upgrade() {
        let stored = VersionTriple::new(1, 2, Platform::Android, 9999);
        assert_eq!(stored.compatibility(&TARGET), Compatibility::NeedsUpgrade);
    }

    #[test]
    fn test_same_or_newer_build_is_current() {
        assert_eq!(TARGET.compatibility(&TARGET), Compatibility::Current);
        let newer_build = VersionTriple::new(1, 2, Platform::Ios, 800);
        assert_eq!(newer_build.compatibility(&TARGET), Compatibility::Current);
    }

    #[test]
    fn test_partial_ord_boundaries() {
        let a = VersionTriple::new(1, 2, Platform::Ios, 5);
        assert!(VersionTriple::new(2, 0, Platform::Ios, 0) > a);
        assert!(VersionTriple::new(1, 3, Platform::Android, 0) > a);
        assert!(VersionTriple::new(1, 2, Platform::Ios, 6) > a);
        assert!(VersionTriple::new(1, 2, Platform::Ios, 4) < a);
        assert_eq!(a.partial_cmp(&VersionTriple::new(1, 2, Platform::Android, 5)), None);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_string(&TARGET).unwrap();
        assert_eq!(
            json,
            r#"{"major":1,"minor":2,"platform":"ios","platformVersion":706}"#
        );
    }

    fn platform() -> impl Strategy<Value = Platform> {
        prop_oneof![
            Just(Platform::Android),
            Just(Platform::Ios),
            Just(Platform::Desktop)
        ]
    }

    fn triple() -> impl Strategy<Value = VersionTriple> {
        (0u32..4, 0u32..4, platform(), 0u32..10)
            .prop_map(|(major, minor, p, pv)| VersionTriple::new(major, minor, p, pv))
    }

    proptest! {
        #[test]
        fn prop_too_new_iff_major_greater(stored in triple(), target in triple()) {
            let too_new = stored.compatibility(&target) == Compatibility::TooNew;
            prop_assert_eq!(too_new, stored.major > target.major);
        }

        #[test]
        fn prop_ordering_is_antisymmetric(a in triple(), b in triple()) {
            if let Some(ord) = a.partial_cmp(&b) {
                prop_assert_eq!(b.partial_cmp(&a), Some(ord.reverse()));
            }
        }
    }
}
