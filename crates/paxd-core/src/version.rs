use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ManifestError;

/// Package version triple `release.major.minor`.
///
/// Ordering is lexicographic over the triple, which the derived `Ord` gives
/// us because of the field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageVersion {
    pub release: u64,
    pub major: u64,
    pub minor: u64,
}

impl PackageVersion {
    pub const fn new(release: u64, major: u64, minor: u64) -> Self {
        Self {
            release,
            major,
            minor,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let invalid = || ManifestError::InvalidVersion(input.to_string());

        let mut parts = input.split('.');
        let mut next_component = || -> Result<u64, ManifestError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u64>().map_err(|_| invalid())
        };

        let release = next_component()?;
        let major = next_component()?;
        let minor = next_component()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(release, major, minor))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.release, self.major, self.minor)
    }
}

impl FromStr for PackageVersion {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::PackageVersion;

    #[test]
    fn parses_three_part_versions() {
        let version = PackageVersion::parse("1.20.3").expect("version must parse");
        assert_eq!(version, PackageVersion::new(1, 20, 3));
        assert_eq!(version.to_string(), "1.20.3");
    }

    #[test]
    fn accepts_leading_zeros_as_plain_digits() {
        let version = PackageVersion::parse("01.0.007").expect("digits only must parse");
        assert_eq!(version, PackageVersion::new(1, 0, 7));
    }

    #[test]
    fn rejects_other_shapes() {
        for raw in [
            "", "1", "1.0", "1.0.0.0", "1.0.0-beta", "1.0.0+build", "v1.0.0", "1..0", "a.b.c",
            " 1.0.0", "1.0.-1", "99999999999999999999.0.0",
        ] {
            assert!(
                PackageVersion::parse(raw).is_err(),
                "'{raw}' must be rejected"
            );
        }
    }

    #[test]
    fn orders_component_wise() {
        let ordered = [
            PackageVersion::new(1, 0, 0),
            PackageVersion::new(1, 0, 1),
            PackageVersion::new(1, 1, 0),
            PackageVersion::new(2, 0, 0),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} must sort before {}", pair[0], pair[1]);
        }
        assert!(PackageVersion::new(1, 10, 0) > PackageVersion::new(1, 9, 99));
    }
}
