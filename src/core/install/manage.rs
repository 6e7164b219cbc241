use std::path::Path;

use tracing::{info, instrument, warn};

use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::copy_dir_preserving;
use crate::core::supervisor::pidfile::PidFile;
use crate::core::version::{
    is_installed, resolve_collision, sanitize_metadata, validate_metadata, version_dir,
    InstalledVersion, Version,
};

fn require_installed(install_root: &Path, version: &Version) -> PanelResult<()> {
    if is_installed(install_root, version) {
        Ok(())
    } else {
        Err(PanelError::VersionNotInstalled(version.to_string()))
    }
}

/// Sanitize and validate user-typed metadata, then find a free name.
fn free_target(install_root: &Path, version: &Version, new_metadata: &str) -> PanelResult<Version> {
    let metadata = sanitize_metadata(new_metadata);
    validate_metadata(&metadata)?;
    let base = version.base();
    let free = resolve_collision(install_root, &base, &metadata)?;
    Ok(base.with_metadata(&free))
}

/// Move the process out of `dir` so it can be renamed (Windows refuses to
/// rename a working directory).
fn leave_directory(dir: &Path, fallback: &Path) -> PanelResult<()> {
    let Ok(cwd) = std::env::current_dir() else {
        return Ok(());
    };
    if cwd.starts_with(dir) {
        std::env::set_current_dir(fallback).map_err(|source| PanelError::io(fallback, source))?;
    }
    Ok(())
}

/// Give an installed version new metadata. Renaming to the current name is
/// a no-op; a taken name gets a collision suffix.
#[instrument(skip(install_root))]
pub fn rename_version(
    install_root: &Path,
    version: &Version,
    new_metadata: &str,
) -> PanelResult<InstalledVersion> {
    require_installed(install_root, version)?;
    let from = version_dir(install_root, version);

    if sanitize_metadata(new_metadata) == version.metadata() {
        return Ok(InstalledVersion {
            version: version.clone(),
            path: from,
        });
    }

    let target = free_target(install_root, version, new_metadata)?;
    let to = version_dir(install_root, &target);
    leave_directory(&from, install_root)?;
    std::fs::rename(&from, &to).map_err(|source| PanelError::io(&from, source))?;
    info!("Renamed {} -> {}", version, target);

    Ok(InstalledVersion {
        version: target,
        path: to,
    })
}

/// Copy an installed version under new metadata, keeping modes and mtimes.
#[instrument(skip(install_root))]
pub fn duplicate_version(
    install_root: &Path,
    version: &Version,
    new_metadata: &str,
) -> PanelResult<InstalledVersion> {
    require_installed(install_root, version)?;
    let from = version_dir(install_root, version);
    let target = free_target(install_root, version, new_metadata)?;
    let to = version_dir(install_root, &target);

    if let Err(err) = copy_dir_preserving(&from, &to) {
        if let Err(cleanup) = std::fs::remove_dir_all(&to) {
            warn!("Could not remove partial copy {:?}: {}", to, cleanup);
        }
        return Err(err);
    }
    info!("Duplicated {} -> {}", version, target);

    Ok(InstalledVersion {
        version: target,
        path: to,
    })
}

/// Delete an installed version. Refused while the module is running.
#[instrument(skip(install_root))]
pub fn remove_version(install_root: &Path, module: &str, version: &Version) -> PanelResult<()> {
    require_installed(install_root, version)?;
    if let Some(pid) = PidFile::for_module(install_root, module).live_pid()? {
        return Err(PanelError::AlreadyRunning { pid });
    }

    let dir = version_dir(install_root, version);
    leave_directory(&dir, install_root)?;
    std::fs::remove_dir_all(&dir).map_err(|source| PanelError::io(&dir, source))?;
    info!("Removed {} {}", module, version);
    Ok(())
}
