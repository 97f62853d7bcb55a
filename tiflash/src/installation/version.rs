use std::fmt;
use std::str::FromStr;

/// The build id of an installation, e.g. `12.5.0.00007`.
///
/// Versions compare numerically component by component, so `10.0.0` is newer
/// than `9.3.0`. Constraints are matched against the original text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    parts: Vec<u32>,
    text: String,
}

impl Version {
    /// The version as written in the installation's properties file.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns `true` if this version satisfies the given constraint.
    ///
    /// A constraint is a plain prefix: `"12"` matches every 12.x release,
    /// `"12.5"` every 12.5.x release.
    pub fn matches(&self, constraint: &str) -> bool {
        self.text.starts_with(constraint)
    }

    /// The numeric components of the version.
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let parts = text
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| VersionParseError::InvalidComponent(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            parts,
            text: text.to_string(),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An error which can occur while parsing a [`Version`].
#[derive(thiserror::Error, docsplay::Display, Debug, PartialEq, Eq)]
pub enum VersionParseError {
    /// The version string is empty.
    Empty,

    /// The version component '{0}' is not a number.
    InvalidComponent(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("10.0.0", "9.3.0"; "two digit major")]
    #[test_case("8.3.0.00009", "8.3.0.00008"; "build number")]
    #[test_case("8.3.1", "8.3.0.00009"; "patch wins over build")]
    fn newer_is_greater(newer: &str, older: &str) {
        let newer: Version = newer.parse().unwrap();
        let older: Version = older.parse().unwrap();
        assert!(newer > older);
    }

    #[test]
    fn constraint_is_a_prefix() {
        let version: Version = "8.2.0.00005".parse().unwrap();
        assert!(version.matches("8"));
        assert!(version.matches("8.2"));
        assert!(!version.matches("8.3"));
        assert!(!version.matches("9"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!("".parse::<Version>(), Err(VersionParseError::Empty));
        assert_eq!(
            "8.x".parse::<Version>(),
            Err(VersionParseError::InvalidComponent("x".to_string()))
        );
    }
}
