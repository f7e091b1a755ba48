//! Four-part version numbers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `major.minor[.build[.revision]]` version.
///
/// Missing trailing components are stored as `None` and written as `-1` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Build component, if present.
    pub build: Option<u32>,
    /// Revision component, only present when `build` is.
    pub revision: Option<u32>,
}

impl Version {
    /// Create a `major.minor` version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    /// Create a full four-part version.
    pub const fn full(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build: Some(build),
            revision: Some(revision),
        }
    }

    /// Components as they are written on the wire.
    pub fn to_wire(&self) -> [i32; 4] {
        let part = |value: Option<u32>| value.map_or(-1, |v| v as i32);
        [
            self.major as i32,
            self.minor as i32,
            part(self.build),
            part(self.build.and(self.revision)),
        ]
    }

    /// Rebuild a version from wire components, where negative values mean "unset".
    pub fn from_wire(parts: [i32; 4]) -> Self {
        let [major, minor, build, revision] = parts;
        let part = |value: i32| u32::try_from(value).ok();
        let build = part(build);
        Self {
            major: major.max(0) as u32,
            minor: minor.max(0) as u32,
            build,
            revision: build.and(part(revision)),
        }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
            if let Some(revision) = self.revision {
                write!(f, ".{revision}")?;
            }
        }
        Ok(())
    }
}

/// Error returned when parsing an invalid [`Version`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version string \"{0}\"")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseVersionError(s.to_string()))?;

        match parts.as_slice() {
            [major, minor] => Ok(Self::new(*major, *minor)),
            [major, minor, build] => Ok(Self {
                build: Some(*build),
                ..Self::new(*major, *minor)
            }),
            [major, minor, build, revision] => Ok(Self::full(*major, *minor, *build, *revision)),
            _ => Err(ParseVersionError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_components_are_negative_on_wire() {
        assert_eq!(Version::new(1, 2).to_wire(), [1, 2, -1, -1]);
        assert_eq!(Version::full(1, 2, 3, 4).to_wire(), [1, 2, 3, 4]);
        assert_eq!(Version::from_wire([1, 2, -1, 9]), Version::new(1, 2));
    }

    #[test]
    fn test_parse_and_display() {
        let version: Version = "3.1.4".parse().unwrap();
        assert_eq!(version.build, Some(4));
        assert_eq!(version.revision, None);
        assert_eq!(version.to_string(), "3.1.4");
        assert!("3".parse::<Version>().is_err());
        assert!("a.b".parse::<Version>().is_err());
    }
}
