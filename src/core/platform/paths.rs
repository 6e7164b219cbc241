use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::core::error::{PanelError, PanelResult};

use super::OsTag;

const PANEL_DIR_NAME: &str = "control-panel";
/// Relocates every root (modules and shared) under one directory.
pub const HOME_OVERRIDE_ENV: &str = "CONTROL_PANEL_HOME";

/// Resolved directory layout for one panel process.
#[derive(Debug, Clone)]
pub struct PanelPaths {
    base_dir: PathBuf,
    shared_root: PathBuf,
}

impl PanelPaths {
    /// Layout rooted at an explicit base directory (tests, portable installs).
    pub fn with_base(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let shared_root = base_dir.join(PANEL_DIR_NAME);
        Self {
            base_dir,
            shared_root,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    pub fn module_root(&self, module: &str) -> PathBuf {
        self.base_dir.join(module)
    }

    pub fn java_dir(&self) -> PathBuf {
        self.shared_root.join("java")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.shared_root.join("media")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.shared_root.join("logs")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.shared_root.join("panel_settings.json")
    }
}

static PANEL_PATHS: OnceLock<PanelPaths> = OnceLock::new();

/// Process-wide layout, resolved once from the environment.
pub fn panel_paths() -> &'static PanelPaths {
    PANEL_PATHS.get_or_init(|| {
        let base = match std::env::var_os(HOME_OVERRIDE_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => platform_base_dir(
                OsTag::current(),
                dirs::home_dir().as_deref(),
                std::env::var_os("APPDATA").map(PathBuf::from).as_deref(),
            ),
        };
        PanelPaths::with_base(base)
    })
}

/// Directory under which every module root lives.
///
/// Windows: `%APPDATA%`, macOS: `~/Library/Application Support`,
/// Linux: `~/.local/share`, anything else: the working directory.
pub fn platform_base_dir(os: OsTag, home: Option<&Path>, appdata: Option<&Path>) -> PathBuf {
    match (os, home, appdata) {
        (OsTag::Windows, _, Some(appdata)) => appdata.to_path_buf(),
        (OsTag::Darwin, Some(home), _) => home.join("Library").join("Application Support"),
        (OsTag::Linux, Some(home), _) => home.join(".local").join("share"),
        _ => PathBuf::from("."),
    }
}

/// Create `path` (and parents) if missing; directories get mode 0755 on POSIX.
pub fn ensure_dir(path: &Path) -> PanelResult<()> {
    std::fs::create_dir_all(path).map_err(|source| PanelError::io(path, source))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        std::fs::set_permissions(path, perms).map_err(|source| PanelError::io(path, source))?;
    }

    Ok(())
}

/// Installs refuse to start below this much free space on the target volume.
pub const MIN_FREE_SPACE: u64 = 512 * 1024 * 1024;

/// Fail when the volume holding `path` has less than `minimum_bytes` free.
/// Unknown volumes pass.
pub fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> PanelResult<()> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let probe = path
        .ancestors()
        .find(|candidate| candidate.exists())
        .unwrap_or(path);
    let canonical = std::fs::canonicalize(probe).unwrap_or_else(|_| probe.to_path_buf());

    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) && mount.as_os_str().len() >= best_len {
            best_len = mount.as_os_str().len();
            available = Some(disk.available_space());
        }
    }

    match available {
        Some(bytes) if bytes < minimum_bytes => Err(PanelError::Other(format!(
            "Not enough disk space at {}: {} MiB free, {} MiB required",
            path.display(),
            bytes / (1024 * 1024),
            minimum_bytes / (1024 * 1024)
        ))),
        _ => Ok(()),
    }
}

/// Recursively copy `source` into `destination`, keeping file modes and
/// modification times. Existing files are overwritten.
pub fn copy_dir_preserving(source: &Path, destination: &Path) -> PanelResult<u64> {
    let mut copied = 0u64;
    for entry in walkdir::WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            let io = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            PanelError::io(path, io)
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| PanelError::Other(format!("{:?} escaped {:?}", entry.path(), source)))?;
        let target = destination.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|source| PanelError::io(&target, source))?;
        } else if entry.file_type().is_file() {
            copy_file_preserving(entry.path(), &target)?;
            copied += 1;
        }
    }
    if !destination.exists() {
        std::fs::create_dir_all(destination)
            .map_err(|source| PanelError::io(destination, source))?;
    }
    Ok(copied)
}

/// Copy one file, keeping its permissions and modification time.
pub fn copy_file_preserving(source: &Path, destination: &Path) -> PanelResult<()> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|err| PanelError::io(parent, err))?;
    }
    std::fs::copy(source, destination).map_err(|err| PanelError::io(source, err))?;

    let modified = std::fs::metadata(source)
        .and_then(|meta| meta.modified())
        .map_err(|err| PanelError::io(source, err))?;
    match std::fs::OpenOptions::new().write(true).open(destination) {
        Ok(file) => file
            .set_modified(modified)
            .map_err(|err| PanelError::io(destination, err)),
        // Read-only copies keep the copy time.
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => Ok(()),
        Err(err) => Err(PanelError::io(destination, err)),
    }
}

/// Set 0755 on a POSIX file; missing paths and other platforms are a no-op.
#[cfg(unix)]
pub fn mark_executable(path: &Path) -> PanelResult<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.is_file() {
        return Ok(());
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|source| PanelError::io(path, source))
}

#[cfg(not(unix))]
pub fn mark_executable(_path: &Path) -> PanelResult<()> {
    Ok(())
}
