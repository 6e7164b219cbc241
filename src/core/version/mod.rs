// ─── Version Model ───
// Semver with filesystem-safe build metadata, ordering and
// collision-free naming of installed version directories.

pub mod collision;
pub mod metadata;
pub mod model;

pub use collision::{
    is_installed, latest_installed, list_installed, resolve_collision, version_dir,
    InstalledVersion,
};
pub use metadata::{sanitize_metadata, validate_metadata};
pub use model::Version;
