// ─── Installation Engine ───
// Downloads releases into versioned directories, manages installed copies
// and carries user state across upgrades.

pub mod fresh;
pub mod manage;
pub mod reference;
pub mod upgrade;

use std::path::PathBuf;

pub use fresh::{install_fresh, resolve_install_version, AcceptProposed, CollisionPrompt};
pub use manage::{duplicate_version, remove_version, rename_version};
pub use reference::{ReferenceSource, ZipReference, LOCAL_DIR};
pub use upgrade::{three_way_merge, upgrade, Reconciliation, UpgradeReport, IMPORT_LOG};

/// Everything the engine needs to know about where and what to install.
///
/// Name templates may contain `{version}`, expanded per release.
#[derive(Debug, Clone)]
pub struct InstallTarget {
    pub module: String,
    pub install_root: PathBuf,
    /// Asset names to probe, most preferred first.
    pub asset_candidates: Vec<String>,
    /// Paths, relative to the version directory, made executable on POSIX.
    pub executables: Vec<String>,
    /// Artifact in the version directory that embeds the `local/` reference.
    pub reference_artifact: Option<String>,
    /// Data directories copied verbatim on upgrade.
    pub preserved_dirs: Vec<String>,
    pub min_free_space: u64,
}
