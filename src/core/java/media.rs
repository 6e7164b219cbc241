use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::downloader::{Downloader, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::{self, ArchiveFormat, OsTag, Platform};

pub const MEDIA_BINARY: &str = "ffmpeg";

const BTBN_BASE: &str = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest";

/// A usable media toolchain binary. `lib_dir` is set for shared Linux
/// builds whose libraries must be put on the loader path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInstall {
    pub bin: PathBuf,
    pub lib_dir: Option<PathBuf>,
}

/// Where to fetch a toolchain build. The archive format follows `file_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDownload {
    pub url: String,
    pub file_name: String,
}

impl MediaDownload {
    fn btbn(file_name: &str) -> Self {
        Self {
            url: format!("{BTBN_BASE}/{file_name}"),
            file_name: file_name.to_string(),
        }
    }

    /// Folder under `media/` the archive unpacks into.
    fn folder(&self) -> String {
        let lower = self.file_name.to_ascii_lowercase();
        let stem_len = [".tar.gz", ".tar.xz", ".tgz", ".txz", ".zip"]
            .iter()
            .find(|ext| lower.ends_with(*ext))
            .map(|ext| self.file_name.len() - ext.len())
            .unwrap_or(self.file_name.len());
        self.file_name[..stem_len].to_string()
    }
}

/// Built-in download table, keyed by `Platform` display form.
pub fn default_media_downloads() -> HashMap<String, MediaDownload> {
    HashMap::from([
        (
            "linux-amd64".to_string(),
            MediaDownload::btbn("ffmpeg-master-latest-linux64-gpl-shared.tar.xz"),
        ),
        (
            "linux-arm64".to_string(),
            MediaDownload::btbn("ffmpeg-master-latest-linuxarm64-gpl-shared.tar.xz"),
        ),
        (
            "windows-amd64".to_string(),
            MediaDownload::btbn("ffmpeg-master-latest-win64-gpl-shared.zip"),
        ),
        (
            "windows-arm64".to_string(),
            MediaDownload::btbn("ffmpeg-master-latest-winarm64-gpl-shared.zip"),
        ),
    ])
}

/// First `<subdir>/bin/<name>` under `media_dir`, in directory-name order.
pub fn scan_media(media_dir: &Path, platform: Platform, name: &str) -> Option<MediaInstall> {
    let binary = platform.executable_name(name);
    let mut folders: Vec<PathBuf> = std::fs::read_dir(media_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    folders.sort();

    folders.into_iter().find_map(|folder| {
        let bin = folder.join("bin").join(&binary);
        if !bin.is_file() {
            return None;
        }
        let lib = folder.join("lib");
        let lib_dir = (platform.os == OsTag::Linux && lib.is_dir()).then_some(lib);
        Some(MediaInstall { bin, lib_dir })
    })
}

/// Look `name` up on the user's PATH.
pub fn search_path(name: &str, platform: Platform) -> Option<PathBuf> {
    let binary = platform.executable_name(name);
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(&binary))
        .find(|candidate| candidate.is_file())
}

/// Finds or installs the media toolchain in the shared `media/` directory.
#[derive(Clone)]
pub struct MediaProvisioner {
    media_dir: PathBuf,
    platform: Platform,
    downloader: Downloader,
    downloads: HashMap<String, MediaDownload>,
    binary: String,
}

impl MediaProvisioner {
    pub fn new(media_dir: impl Into<PathBuf>, downloader: Downloader) -> Self {
        Self {
            media_dir: media_dir.into(),
            platform: Platform::current(),
            downloader,
            downloads: default_media_downloads(),
            binary: MEDIA_BINARY.to_string(),
        }
    }

    /// Replace entries of the download table; settings win over built-ins.
    pub fn with_downloads(mut self, overrides: HashMap<String, MediaDownload>) -> Self {
        self.downloads.extend(overrides);
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    pub fn find(&self) -> Option<MediaInstall> {
        scan_media(&self.media_dir, self.platform, &self.binary)
    }

    pub fn download_for_platform(&self) -> Option<&MediaDownload> {
        self.downloads.get(&self.platform.to_string())
    }

    /// A usable toolchain, downloading one when the shared directory has
    /// none. Platforms without a build use whatever PATH provides.
    #[instrument(skip(self, progress, cancel))]
    pub async fn ensure(
        &self,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<MediaInstall> {
        if let Some(found) = self.find() {
            debug!("Using media toolchain at {:?}", found.bin);
            return Ok(found);
        }

        let Some(download) = self.download_for_platform().cloned() else {
            return search_path(&self.binary, self.platform)
                .map(|bin| MediaInstall { bin, lib_dir: None })
                .ok_or_else(|| {
                    PanelError::RuntimeUnavailable(format!(
                        "no {} build for {} and none on PATH",
                        self.binary, self.platform
                    ))
                });
        };

        self.install(&download, progress, cancel).await
    }

    async fn install(
        &self,
        download: &MediaDownload,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<MediaInstall> {
        platform::ensure_dir(&self.media_dir)?;
        platform::ensure_min_disk_space(&self.media_dir, platform::MIN_FREE_SPACE)?;
        let format = ArchiveFormat::from_name(&download.file_name).ok_or_else(|| {
            PanelError::MalformedArchive {
                path: PathBuf::from(&download.file_name),
                reason: "unsupported media archive".into(),
            }
        })?;

        let target = self.media_dir.join(download.folder());
        let archive = self
            .media_dir
            .join(format!(".download-{}-{}", Uuid::new_v4(), download.file_name));
        info!("Installing media toolchain from {} into {:?}", download.url, target);

        let result = async {
            self.downloader
                .download_file(&download.url, &archive, progress, cancel)
                .await?;
            let (archive_path, dest) = (archive.clone(), target.clone());
            tokio::task::spawn_blocking(move || {
                platform::extract_archive(&archive_path, &dest, format, true)
            })
            .await
            .map_err(|err| PanelError::Other(format!("extract task failed: {err}")))??;
            self.normalize_layout(&target)
        }
        .await;

        let _ = tokio::fs::remove_file(&archive).await;
        match result {
            Ok(install) => {
                info!("Media toolchain ready at {:?}", install.bin);
                Ok(install)
            }
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&target).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial toolchain {:?}: {}", target, cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    /// Some builds ship the binary at the archive root; move it into `bin/`.
    fn normalize_layout(&self, target: &Path) -> PanelResult<MediaInstall> {
        let binary = self.platform.executable_name(&self.binary);
        let bin_dir = target.join("bin");
        let bin = bin_dir.join(&binary);
        let loose = target.join(&binary);
        if !bin.is_file() && loose.is_file() {
            platform::ensure_dir(&bin_dir)?;
            std::fs::rename(&loose, &bin).map_err(|source| PanelError::io(&loose, source))?;
        }
        if !bin.is_file() {
            return Err(PanelError::RuntimeUnavailable(format!(
                "downloaded toolchain has no bin/{binary}"
            )));
        }
        platform::mark_executable(&bin)?;

        let lib = target.join("lib");
        let lib_dir = (self.platform.os == OsTag::Linux && lib.is_dir()).then_some(lib);
        Ok(MediaInstall { bin, lib_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::ArchTag;
    use crate::core::test_support::{serve_routes, write_tar_gz, write_zip, Route};

    fn linux() -> Platform {
        Platform {
            os: OsTag::Linux,
            arch: ArchTag::Amd64,
        }
    }

    #[test]
    fn scan_finds_vendor_layout_with_lib() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("empty/bin")).unwrap();
        std::fs::create_dir_all(tmp.path().join("ffmpeg-shared/bin")).unwrap();
        std::fs::create_dir_all(tmp.path().join("ffmpeg-shared/lib")).unwrap();
        std::fs::write(tmp.path().join("ffmpeg-shared/bin/ffmpeg"), "bin").unwrap();

        let found = scan_media(tmp.path(), linux(), "ffmpeg").unwrap();
        assert_eq!(found.bin, tmp.path().join("ffmpeg-shared/bin/ffmpeg"));
        assert_eq!(found.lib_dir, Some(tmp.path().join("ffmpeg-shared/lib")));

        let windows = Platform {
            os: OsTag::Windows,
            arch: ArchTag::Amd64,
        };
        assert!(scan_media(tmp.path(), windows, "ffmpeg").is_none());
    }

    #[test]
    fn download_folder_drops_archive_suffix() {
        let download = MediaDownload::btbn("ffmpeg-master-latest-linux64-gpl-shared.tar.xz");
        assert_eq!(download.folder(), "ffmpeg-master-latest-linux64-gpl-shared");
        assert!(download.url.ends_with("/latest/ffmpeg-master-latest-linux64-gpl-shared.tar.xz"));
        assert!(default_media_downloads().contains_key(&linux().to_string()));
        assert!(!default_media_downloads().contains_key("darwin-arm64"));
    }

    #[tokio::test]
    async fn missing_toolchain_is_downloaded_into_bin() {
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("media.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("ffmpeg-build/bin/ffmpeg", b"#!/bin/sh\n".as_slice()),
                ("ffmpeg-build/lib/libavcodec.so", b"so".as_slice()),
            ],
        );
        let base = serve_routes(HashMap::from([(
            "/media.tar.gz".to_string(),
            Route::ok(std::fs::read(&archive).unwrap()),
        )]))
        .await;

        let media_dir = tempfile::tempdir().unwrap();
        let provisioner = MediaProvisioner::new(media_dir.path(), Downloader::new().unwrap())
            .with_platform(linux())
            .with_downloads(HashMap::from([(
                "linux-amd64".to_string(),
                MediaDownload {
                    url: format!("{base}/media.tar.gz"),
                    file_name: "ffmpeg-build.tar.gz".to_string(),
                },
            )]));

        let install = provisioner
            .ensure(None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(install.bin, media_dir.path().join("ffmpeg-build/bin/ffmpeg"));
        assert_eq!(install.lib_dir, Some(media_dir.path().join("ffmpeg-build/lib")));
        assert_eq!(provisioner.find(), Some(install));
    }

    #[tokio::test]
    async fn root_level_binary_is_moved_into_bin() {
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("media.zip");
        write_zip(&archive, &[("ffmpeg", b"bin".as_slice()), ("LICENSE", b"gpl".as_slice())]);
        let base = serve_routes(HashMap::from([(
            "/media.zip".to_string(),
            Route::ok(std::fs::read(&archive).unwrap()),
        )]))
        .await;

        let media_dir = tempfile::tempdir().unwrap();
        let provisioner = MediaProvisioner::new(media_dir.path(), Downloader::new().unwrap())
            .with_platform(linux())
            .with_downloads(HashMap::from([(
                "linux-amd64".to_string(),
                MediaDownload {
                    url: format!("{base}/media.zip"),
                    file_name: "static.zip".to_string(),
                },
            )]));

        let install = provisioner
            .ensure(None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(install.bin, media_dir.path().join("static/bin/ffmpeg"));
        assert!(!media_dir.path().join("static/ffmpeg").exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_folder() {
        let base = serve_routes(HashMap::new()).await;
        let media_dir = tempfile::tempdir().unwrap();
        let provisioner = MediaProvisioner::new(media_dir.path(), Downloader::new().unwrap())
            .with_platform(linux())
            .with_downloads(HashMap::from([(
                "linux-amd64".to_string(),
                MediaDownload {
                    url: format!("{base}/missing.tar.xz"),
                    file_name: "missing.tar.xz".to_string(),
                },
            )]));

        let err = provisioner
            .ensure(None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PanelError::DownloadFailed { status: 404, .. }));
        assert_eq!(std::fs::read_dir(media_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unsupported_platform_falls_back_to_path() {
        let media_dir = tempfile::tempdir().unwrap();
        let provisioner = MediaProvisioner::new(media_dir.path(), Downloader::new().unwrap())
            .with_platform(Platform {
                os: OsTag::Other,
                arch: ArchTag::Other,
            })
            .with_binary("sh");

        match provisioner.ensure(None, &CancellationToken::new()).await {
            Ok(install) => assert!(install.bin.ends_with("sh")),
            Err(err) => assert!(matches!(err, PanelError::RuntimeUnavailable(_))),
        }
    }
}
