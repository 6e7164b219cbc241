use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::version::Version;

/// Stable releases kept when prereleases are hidden.
pub const STABLE_RELEASE_CAP: usize = 20;

/// A release known to the catalog: its version and where its assets live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: Version,
    /// Tag as published, e.g. `v1.2.3`.
    pub tag: String,
    /// URL template with `{tag}` and `{asset}` placeholders.
    pub asset_template: String,
}

impl Release {
    pub fn new(version: Version, tag: impl Into<String>, asset_template: impl Into<String>) -> Self {
        Self {
            version,
            tag: tag.into(),
            asset_template: asset_template.into(),
        }
    }

    /// Download URL of one named asset of this release.
    pub fn asset_url(&self, asset: &str) -> String {
        self.asset_template
            .replace("{tag}", &self.tag)
            .replace("{version}", &self.version.to_string())
            .replace("{asset}", asset)
    }
}

/// Ordered, in-memory list of releases for one module (newest first).
#[derive(Debug, Clone, Default)]
pub struct ReleaseCatalog {
    releases: Vec<Release>,
    offline: bool,
}

impl ReleaseCatalog {
    /// Build a catalog from releases in any order; duplicate tags collapse.
    pub fn from_releases(releases: impl IntoIterator<Item = Release>) -> Self {
        let mut seen = HashSet::new();
        let mut unique: Vec<Release> = releases
            .into_iter()
            .filter(|release| seen.insert(release.version.to_string()))
            .collect();
        unique.sort_by(|a, b| b.version.compare_for_ordering(&a.version));
        Self {
            releases: unique,
            offline: false,
        }
    }

    /// The catalog used when no endpoint could be reached.
    pub fn offline() -> Self {
        Self {
            releases: Vec::new(),
            offline: true,
        }
    }

    /// Empty because nothing was reachable, not because nothing exists.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn all(&self) -> &[Release] {
        &self.releases
    }

    /// Releases to show. Without prereleases only the newest
    /// [`STABLE_RELEASE_CAP`] stable releases remain.
    pub fn filtered(&self, include_prereleases: bool) -> Vec<Release> {
        if include_prereleases {
            return self.releases.clone();
        }
        self.releases
            .iter()
            .filter(|release| !release.version.is_prerelease())
            .take(STABLE_RELEASE_CAP)
            .cloned()
            .collect()
    }

    pub fn latest_stable(&self) -> Option<&Release> {
        self.releases
            .iter()
            .find(|release| !release.version.is_prerelease())
    }

    pub fn latest_prerelease(&self) -> Option<&Release> {
        self.releases
            .iter()
            .find(|release| release.version.is_prerelease())
    }

    pub fn find(&self, version: &Version) -> Option<&Release> {
        self.releases
            .iter()
            .find(|release| release.version.base() == version.base())
    }
}
