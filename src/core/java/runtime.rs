use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::downloader::{Downloader, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::process::is_process_alive;
use crate::core::platform::{self, ArchTag, ArchiveFormat, OsTag, Platform};

pub const ADOPTIUM_API_BASE: &str = "https://api.adoptium.net/v3/assets/latest";
const RUNTIME_LOCK_STALE_SECS: i64 = 60 * 10;
const LOCK_POLL: Duration = Duration::from_millis(250);

/// A JVM found under the shared `java/` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JvmInstallation {
    pub root: PathBuf,
    pub java_bin: PathBuf,
    pub major: u32,
    /// Full version as reported by the `release` file or folder name.
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumRelease {
    binary: AdoptiumBinary,
    #[serde(default)]
    release_name: String,
    version: AdoptiumVersion,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumBinary {
    package: AdoptiumPackage,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumPackage {
    #[serde(default)]
    checksum: Option<String>,
    link: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AdoptiumVersion {
    openjdk_version: String,
}

/// Resolved download for one JVM build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSpec {
    pub major: u32,
    pub image_type: String,
    pub release_name: String,
    pub version: String,
    pub url: String,
    pub file_name: String,
    pub sha256: Option<String>,
}

// ── Layout ──────────────────────────────────────────

/// Where the launcher binary sits inside a JVM folder.
pub fn java_binary_rel(os: OsTag) -> &'static str {
    match os {
        OsTag::Windows => "bin/javaw.exe",
        OsTag::Darwin => "Contents/Home/bin/java",
        _ => "bin/java",
    }
}

/// Parse `1.8.0_292`, `17.0.2+8`, `21-ea` style versions into
/// (major, minor, patch, build).
pub fn parse_java_version(version: &str) -> Option<(u32, u32, u32, u32)> {
    let cleaned = version
        .trim()
        .trim_start_matches("jdk-")
        .trim_start_matches("jdk")
        .split('-')
        .next()
        .unwrap_or_default()
        .replace('_', ".");
    let (core, build) = cleaned.split_once('+').unwrap_or((cleaned.as_str(), "0"));
    let mut nums = core
        .split('.')
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    if nums.is_empty() {
        return None;
    }
    // Legacy `1.x` scheme: the second component is the major.
    if nums[0] == 1 && nums.len() > 1 {
        nums.remove(0);
    }
    while nums.len() < 3 {
        nums.push(0);
    }
    let build = build
        .split('.')
        .next()
        .and_then(|b| b.parse::<u32>().ok())
        .unwrap_or(0);
    Some((nums[0], nums[1], nums[2], build))
}

fn compare_java_versions(left: &str, right: &str) -> Ordering {
    parse_java_version(left).cmp(&parse_java_version(right))
}

/// `JAVA_VERSION="17.0.2"` from a JDK/JRE `release` file.
fn read_release_version(root: &Path) -> Option<String> {
    let candidates = [root.join("release"), root.join("Contents/Home/release")];
    candidates.iter().find_map(|path| {
        let raw = std::fs::read_to_string(path).ok()?;
        raw.lines().find_map(|line| {
            line.strip_prefix("JAVA_VERSION=")
                .map(|value| value.trim().trim_matches('"').to_string())
        })
    })
}

fn inspect_folder(root: &Path, os: OsTag) -> Option<JvmInstallation> {
    let java_bin = root.join(java_binary_rel(os));
    if !java_bin.is_file() {
        return None;
    }
    let folder = root.file_name()?.to_string_lossy().to_string();
    let version = read_release_version(root).unwrap_or(folder);
    let (major, ..) = parse_java_version(&version)?;
    Some(JvmInstallation {
        root: root.to_path_buf(),
        java_bin,
        major,
        version,
    })
}

/// Every JVM under `java_dir`, highest major first, then highest version.
pub fn scan_installations(java_dir: &Path, os: OsTag) -> Vec<JvmInstallation> {
    let Ok(entries) = std::fs::read_dir(java_dir) else {
        return Vec::new();
    };
    let mut found: Vec<JvmInstallation> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|entry| inspect_folder(&entry.path(), os))
        .collect();
    found.sort_by(|a, b| {
        b.major
            .cmp(&a.major)
            .then_with(|| compare_java_versions(&b.version, &a.version))
    });
    found
}

/// Highest installation satisfying `min_major`.
pub fn select_installation(installs: &[JvmInstallation], min_major: u32) -> Option<&JvmInstallation> {
    installs.iter().find(|install| install.major >= min_major)
}

fn adoptium_os(os: OsTag) -> &'static str {
    match os {
        OsTag::Windows => "windows",
        OsTag::Darwin => "mac",
        _ => "linux",
    }
}

fn adoptium_arch(arch: ArchTag) -> &'static str {
    match arch {
        ArchTag::Arm64 => "aarch64",
        ArchTag::Arm => "arm",
        _ => "x64",
    }
}

// ── Install lock ────────────────────────────────────

struct RuntimeLockGuard {
    path: PathBuf,
}

impl Drop for RuntimeLockGuard {
    fn drop(&mut self) {
        if let Err(source) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock {:?}: {}", self.path, source);
        }
    }
}

async fn acquire_runtime_lock(lock_path: &Path, cancel: &CancellationToken) -> PanelResult<RuntimeLockGuard> {
    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        match tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(lock_path)
            .await
        {
            Ok(mut file) => {
                let payload = serde_json::json!({
                    "pid": std::process::id(),
                    "timestamp": Utc::now().timestamp(),
                });
                file.write_all(payload.to_string().as_bytes())
                    .await
                    .map_err(|source| PanelError::io(lock_path, source))?;
                return Ok(RuntimeLockGuard {
                    path: lock_path.to_path_buf(),
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if clear_stale_lock(lock_path).await {
                    continue;
                }
                if attempts % 20 == 0 {
                    info!("Waiting for runtime lock at {:?}", lock_path);
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PanelError::Cancelled),
                    _ = tokio::time::sleep(LOCK_POLL) => {}
                }
            }
            Err(source) => return Err(PanelError::io(lock_path, source)),
        }
    }
}

/// Remove the lock when its owner is gone or it is too old. Returns true
/// when it was removed.
async fn clear_stale_lock(lock_path: &Path) -> bool {
    let Ok(content) = tokio::fs::read_to_string(lock_path).await else {
        return false;
    };
    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        // Half-written by a crashed owner.
        Err(_) => serde_json::Value::Null,
    };
    let pid = value.get("pid").and_then(|v| v.as_u64()).unwrap_or_default() as u32;
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_i64())
        .unwrap_or_default();
    let expired = Utc::now().timestamp().saturating_sub(timestamp) > RUNTIME_LOCK_STALE_SECS;
    let dead = !is_process_alive(pid);

    if expired || dead {
        debug!("Clearing stale runtime lock {:?} (pid {})", lock_path, pid);
        return tokio::fs::remove_file(lock_path).await.is_ok();
    }
    false
}

// ── Provisioner ─────────────────────────────────────

/// Finds or installs a JVM in the shared `java/` directory.
#[derive(Clone)]
pub struct JvmProvisioner {
    java_dir: PathBuf,
    platform: Platform,
    downloader: Downloader,
    api_base: String,
}

impl JvmProvisioner {
    pub fn new(java_dir: impl Into<PathBuf>, downloader: Downloader) -> Self {
        Self {
            java_dir: java_dir.into(),
            platform: Platform::current(),
            downloader,
            api_base: ADOPTIUM_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn java_dir(&self) -> &Path {
        &self.java_dir
    }

    pub fn installations(&self) -> Vec<JvmInstallation> {
        scan_installations(&self.java_dir, self.platform.os)
    }

    /// Local JVM satisfying `min_major`, without touching the network.
    pub fn find(&self, min_major: u32) -> Option<JvmInstallation> {
        select_installation(&self.installations(), min_major).cloned()
    }

    /// Path to a `java` satisfying `min_major`, downloading one if needed.
    #[instrument(skip(self, progress, cancel))]
    pub async fn ensure(
        &self,
        min_major: u32,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<PathBuf> {
        if let Some(found) = self.find(min_major) {
            debug!("Using JVM {} at {:?}", found.version, found.java_bin);
            return Ok(found.java_bin);
        }

        platform::ensure_dir(&self.java_dir)?;
        let lock_path = self.java_dir.join(format!(".installing-{min_major}.lock"));
        let _lock = acquire_runtime_lock(&lock_path, cancel).await?;

        // Another panel may have finished the install while we waited.
        if let Some(found) = self.find(min_major) {
            return Ok(found.java_bin);
        }

        let spec = self.fetch_spec(min_major).await?;
        let installed = self.install(&spec, progress, cancel).await?;
        Ok(installed.java_bin)
    }

    /// Query the release catalog for the newest build of `major`, JRE first.
    pub async fn fetch_spec(&self, major: u32) -> PanelResult<RuntimeSpec> {
        let mut last_error: Option<PanelError> = None;

        for image_type in ["jre", "jdk"] {
            let api_url = format!(
                "{}/{}/hotspot?architecture={}&image_type={}&os={}",
                self.api_base,
                major,
                adoptium_arch(self.platform.arch),
                image_type,
                adoptium_os(self.platform.os)
            );

            let response = match self.downloader.client().get(&api_url).send().await {
                Ok(response) => response,
                Err(err) => {
                    last_error = Some(err.into());
                    continue;
                }
            };
            let status = response.status();
            if !status.is_success() {
                last_error = Some(PanelError::DownloadFailed {
                    url: api_url,
                    status: status.as_u16(),
                });
                continue;
            }

            let releases: Vec<AdoptiumRelease> = serde_json::from_slice(&response.bytes().await?)?;
            if let Some(found) = releases.into_iter().next() {
                return Ok(RuntimeSpec {
                    major,
                    image_type: image_type.to_string(),
                    release_name: found.release_name,
                    version: found.version.openjdk_version,
                    url: found.binary.package.link,
                    file_name: found.binary.package.name,
                    sha256: found.binary.package.checksum.filter(|c| !c.is_empty()),
                });
            }
            debug!("No {} build of Java {} for {}", image_type, major, self.platform);
        }

        Err(last_error.unwrap_or_else(|| {
            PanelError::RuntimeUnavailable(format!(
                "no Java {major} build published for {}",
                self.platform
            ))
        }))
    }

    /// Download, verify and unpack `spec` into `java/<release>/`.
    pub async fn install(
        &self,
        spec: &RuntimeSpec,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<JvmInstallation> {
        platform::ensure_min_disk_space(&self.java_dir, platform::MIN_FREE_SPACE)?;
        let format = ArchiveFormat::from_name(&spec.file_name).ok_or_else(|| {
            PanelError::MalformedArchive {
                path: PathBuf::from(&spec.file_name),
                reason: "unsupported runtime archive".into(),
            }
        })?;

        let folder = runtime_folder_name(spec);
        let target = self.java_dir.join(&folder);
        let archive = self
            .java_dir
            .join(format!(".download-{}-{}", Uuid::new_v4(), spec.file_name));
        let staging = self.java_dir.join(format!(".staging-{}", Uuid::new_v4()));

        info!("Installing Java {} ({}) into {:?}", spec.version, spec.image_type, target);
        let result = async {
            self.downloader
                .download_verified(&spec.url, &archive, spec.sha256.as_deref(), progress, cancel)
                .await?;

            let (archive_path, staging_path) = (archive.clone(), staging.clone());
            tokio::task::spawn_blocking(move || {
                platform::extract_archive(&archive_path, &staging_path, format, true)
            })
            .await
            .map_err(|err| PanelError::Other(format!("extract task failed: {err}")))??;

            if target.exists() {
                tokio::fs::remove_dir_all(&target)
                    .await
                    .map_err(|source| PanelError::io(&target, source))?;
            }
            tokio::fs::rename(&staging, &target)
                .await
                .map_err(|source| PanelError::io(&staging, source))?;
            Ok::<(), PanelError>(())
        }
        .await;

        let _ = tokio::fs::remove_file(&archive).await;
        if let Err(err) = result {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(err);
        }

        let installed = inspect_folder(&target, self.platform.os).ok_or_else(|| {
            PanelError::RuntimeUnavailable(format!(
                "downloaded runtime has no {} under {:?}",
                java_binary_rel(self.platform.os),
                target
            ))
        })?;
        platform::mark_executable(&installed.java_bin)?;
        info!("Java {} ready at {:?}", installed.version, installed.java_bin);
        Ok(installed)
    }

    /// Delete JVMs older than the highest required major, once a JVM that
    /// satisfies it is present. Returns the removed folders.
    pub fn prune(&self, required_majors: &[u32]) -> PanelResult<Vec<PathBuf>> {
        let Some(&highest) = required_majors.iter().max() else {
            return Ok(Vec::new());
        };
        let installs = self.installations();
        if select_installation(&installs, highest).is_none() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for install in installs.into_iter().filter(|i| i.major < highest) {
            std::fs::remove_dir_all(&install.root)
                .map_err(|source| PanelError::io(&install.root, source))?;
            info!("Removed Java {} at {:?}", install.version, install.root);
            removed.push(install.root);
        }
        Ok(removed)
    }
}

fn runtime_folder_name(spec: &RuntimeSpec) -> String {
    let base = if spec.release_name.is_empty() {
        format!("jdk-{}", spec.version)
    } else {
        spec.release_name.clone()
    };
    let safe: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+') { c } else { '_' })
        .collect();
    format!("{safe}-{}", spec.image_type)
}
