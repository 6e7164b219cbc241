use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{PanelError, PanelResult};

use super::metadata::validate_metadata;

/// A semantic version plus filesystem-safe build metadata.
///
/// Ordering ignores metadata entirely. Prerelease identifiers are compared
/// case-insensitively so `SNAPSHOT` sorts after `rc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pre: String,
    metadata: String,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: String::new(),
            metadata: String::new(),
        }
    }

    /// Strict parse: `MAJOR.MINOR.PATCH[-PRE][+METADATA]`.
    pub fn parse(input: &str) -> PanelResult<Self> {
        let invalid = |reason: String| PanelError::InvalidVersion {
            input: input.to_string(),
            reason,
        };

        let (base, metadata) = match input.split_once('+') {
            Some((base, metadata)) => (base, metadata),
            None => (input, ""),
        };
        if base.is_empty() {
            return Err(invalid("empty version".into()));
        }

        let parsed = semver::Version::parse(base).map_err(|e| invalid(e.to_string()))?;
        if !metadata.is_empty() || input.ends_with('+') {
            validate_metadata(metadata).map_err(|e| invalid(e.to_string()))?;
        }
        if input.ends_with('+') {
            return Err(invalid("empty metadata after '+'".into()));
        }

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            pre: parsed.pre.as_str().to_string(),
            metadata: metadata.to_string(),
        })
    }

    /// Lenient parse for release tags such as `v1.2.3`.
    pub fn parse_tag(tag: &str) -> PanelResult<Self> {
        let trimmed = tag.trim();
        let stripped = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        Self::parse(stripped)
    }

    pub fn prerelease(&self) -> &str {
        &self.pre
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Same base version, different metadata. The caller validates first.
    pub fn with_metadata(&self, metadata: &str) -> Self {
        Self {
            metadata: metadata.to_string(),
            ..self.clone()
        }
    }

    /// The version without metadata, e.g. `1.2.3-rc.1`.
    pub fn base(&self) -> Self {
        self.with_metadata("")
    }

    /// Precedence comparison; metadata is ignored.
    pub fn compare_for_ordering(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| compare_prerelease(&self.pre, &other.pre))
    }

    /// Ordering for the installed list: newest base first, then metadata.
    pub fn compare_for_install_list(&self, other: &Self) -> Ordering {
        other
            .compare_for_ordering(self)
            .then_with(|| self.metadata.cmp(&other.metadata))
    }
}

fn compare_prerelease(left: &str, right: &str) -> Ordering {
    let normalize = |pre: &str| {
        if pre.is_empty() {
            semver::Prerelease::EMPTY
        } else {
            semver::Prerelease::new(&pre.to_ascii_lowercase()).unwrap_or(semver::Prerelease::EMPTY)
        }
    };
    normalize(left).cmp(&normalize(right))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        if !self.metadata.is_empty() {
            write!(f, "+{}", self.metadata)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl serde::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parses_base_prerelease_and_metadata() {
        let version = v("2.1.0-beta.2+test.1");
        assert_eq!((version.major, version.minor, version.patch), (2, 1, 0));
        assert_eq!(version.prerelease(), "beta.2");
        assert_eq!(version.metadata(), "test.1");
        assert_eq!(version.to_string(), "2.1.0-beta.2+test.1");
    }

    #[test]
    fn rejects_non_strict_versions() {
        for bad in ["1.2", "01.2.3", "1.2.3.4", "", "+meta", "1.2.3+", "v1.2.3"] {
            assert!(Version::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn metadata_allows_unicode_letters() {
        assert_eq!(v("1.0.0+größe-2").metadata(), "größe-2");
    }

    #[test]
    fn metadata_rejects_second_plus_and_forbidden_chars() {
        assert!(Version::parse("1.0.0+a+b").is_err());
        assert!(Version::parse("1.0.0+a:b").is_err());
        assert!(Version::parse("1.0.0+a/b").is_err());
    }

    #[test]
    fn prerelease_ordering_alpha_beta_rc_snapshot_release() {
        let mut versions = vec![
            v("1.0.0"),
            v("1.0.0-SNAPSHOT"),
            v("1.0.0-rc.1"),
            v("1.0.0-alpha"),
            v("1.0.0-beta"),
        ];
        versions.sort_by(|a, b| a.compare_for_ordering(b));
        let ordered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(
            ordered,
            vec![
                "1.0.0-alpha",
                "1.0.0-beta",
                "1.0.0-rc.1",
                "1.0.0-SNAPSHOT",
                "1.0.0"
            ]
        );
    }

    #[test]
    fn ordering_ignores_metadata() {
        assert_eq!(
            v("1.0.0+a").compare_for_ordering(&v("1.0.0+b")),
            Ordering::Equal
        );
        assert_eq!(
            v("1.10.0").compare_for_ordering(&v("1.9.9")),
            Ordering::Greater
        );
    }

    #[test]
    fn install_list_is_newest_first_with_metadata_tiebreak() {
        let mut versions = vec![v("1.0.0+test"), v("1.2.0"), v("1.0.0"), v("1.0.0+1")];
        versions.sort_by(|a, b| a.compare_for_install_list(b));
        let ordered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(ordered, vec!["1.2.0", "1.0.0", "1.0.0+1", "1.0.0+test"]);
    }

    #[test]
    fn tags_may_carry_a_v_prefix() {
        assert_eq!(Version::parse_tag("v3.4.5").unwrap(), v("3.4.5"));
        assert_eq!(Version::parse_tag(" 3.4.5 ").unwrap(), v("3.4.5"));
    }
}
