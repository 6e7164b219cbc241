// ─── Platform Adapter ───
// OS/arch detection plus the filesystem, archive and process primitives
// every other component builds on.

pub mod archive;
pub mod paths;
pub mod process;

pub use archive::{extract_archive, extract_tar_gz, extract_tar_xz, extract_zip, ArchiveFormat};
pub use paths::{
    copy_dir_preserving, copy_file_preserving, ensure_dir, ensure_min_disk_space,
    mark_executable, panel_paths, PanelPaths, MIN_FREE_SPACE,
};
pub use process::{open_path, open_url};

/// Canonical OS tag used in asset names and runtime catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsTag {
    Windows,
    Darwin,
    Linux,
    Other,
}

impl OsTag {
    pub fn current() -> Self {
        Self::from_std(std::env::consts::OS)
    }

    pub fn from_std(os: &str) -> Self {
        match os {
            "windows" => OsTag::Windows,
            "macos" => OsTag::Darwin,
            // A WSL kernel still reports "linux" here, which is what we want.
            "linux" => OsTag::Linux,
            _ => OsTag::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsTag::Windows => "windows",
            OsTag::Darwin => "darwin",
            OsTag::Linux => "linux",
            OsTag::Other => "other",
        }
    }
}

impl std::fmt::Display for OsTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical architecture tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchTag {
    Amd64,
    Arm64,
    Arm,
    Other,
}

impl ArchTag {
    pub fn current() -> Self {
        Self::from_std(std::env::consts::ARCH)
    }

    pub fn from_std(arch: &str) -> Self {
        match arch {
            "x86_64" => ArchTag::Amd64,
            "aarch64" => ArchTag::Arm64,
            "arm" => ArchTag::Arm,
            _ => ArchTag::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchTag::Amd64 => "amd64",
            ArchTag::Arm64 => "arm64",
            ArchTag::Arm => "arm",
            ArchTag::Other => "other",
        }
    }
}

impl std::fmt::Display for ArchTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (OS, arch) pair of the running host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: OsTag,
    pub arch: ArchTag,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: OsTag::current(),
            arch: ArchTag::current(),
        }
    }

    /// File name of a native executable on this platform.
    pub fn executable_name(&self, stem: &str) -> String {
        if self.os == OsTag::Windows && !stem.ends_with(".exe") {
            format!("{stem}.exe")
        } else {
            stem.to_string()
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// True when running under the Windows Subsystem for Linux.
pub fn is_wsl() -> bool {
    if OsTag::current() != OsTag::Linux {
        return false;
    }
    std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|release| release.to_ascii_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_tags_are_canonical() {
        assert_eq!(OsTag::from_std("macos").as_str(), "darwin");
        assert_eq!(OsTag::from_std("windows").as_str(), "windows");
        assert_eq!(OsTag::from_std("linux").as_str(), "linux");
        assert_eq!(OsTag::from_std("freebsd"), OsTag::Other);
    }

    #[test]
    fn arch_tags_are_canonical() {
        assert_eq!(ArchTag::from_std("x86_64").as_str(), "amd64");
        assert_eq!(ArchTag::from_std("aarch64").as_str(), "arm64");
        assert_eq!(ArchTag::from_std("arm").as_str(), "arm");
    }

    #[test]
    fn windows_executables_get_exe_suffix() {
        let windows = Platform {
            os: OsTag::Windows,
            arch: ArchTag::Amd64,
        };
        let linux = Platform {
            os: OsTag::Linux,
            arch: ArchTag::Amd64,
        };
        assert_eq!(windows.executable_name("bridge"), "bridge.exe");
        assert_eq!(windows.executable_name("bridge.exe"), "bridge.exe");
        assert_eq!(linux.executable_name("bridge"), "bridge");
        assert_eq!(linux.to_string(), "linux-amd64");
    }
}
