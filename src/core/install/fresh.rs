use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::catalog::Release;
use crate::core::downloader::{Downloader, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::{self, ArchiveFormat};
use crate::core::version::{
    is_installed, resolve_collision, sanitize_metadata, validate_metadata, version_dir,
    InstalledVersion, Version,
};

use super::reference::{ReferenceSource, ZipReference, LOCAL_DIR};
use super::InstallTarget;

/// Asks the user to confirm the name of an install that would collide.
pub trait CollisionPrompt: Send + Sync {
    /// `proposed` is free metadata for `base`. Returns the metadata to use
    /// (possibly edited by the user) or `None` to abort the install.
    fn confirm_metadata(&self, base: &Version, proposed: &str) -> Option<String>;
}

/// Accepts whatever name the collision rule proposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptProposed;

impl CollisionPrompt for AcceptProposed {
    fn confirm_metadata(&self, _base: &Version, proposed: &str) -> Option<String> {
        Some(proposed.to_string())
    }
}

/// Name the install will get, consulting `prompt` when `requested` exists.
pub fn resolve_install_version(
    install_root: &Path,
    requested: &Version,
    prompt: &dyn CollisionPrompt,
) -> PanelResult<Version> {
    if !is_installed(install_root, requested) {
        return Ok(requested.clone());
    }

    let base = requested.base();
    let proposed = resolve_collision(install_root, &base, requested.metadata())?;
    let Some(chosen) = prompt.confirm_metadata(&base, &proposed) else {
        return Err(PanelError::Cancelled);
    };

    let chosen = sanitize_metadata(&chosen);
    validate_metadata(&chosen)?;
    let free = resolve_collision(install_root, &base, &chosen)?;
    if free != chosen {
        info!("{}+{} exists, using {}+{}", base, chosen, base, free);
    }
    Ok(base.with_metadata(&free))
}

/// Expand an asset-name template for one release.
pub fn asset_name(template: &str, version: &Version) -> String {
    template.replace("{version}", &version.base().to_string())
}

/// Download `release` and install it under `target.install_root`.
///
/// Leaves the filesystem untouched when anything fails before the version
/// directory exists; removes the directory when anything fails after.
#[instrument(skip_all, fields(module = %target.module, version = %release.version))]
pub async fn install_fresh(
    downloader: &Downloader,
    target: &InstallTarget,
    release: &Release,
    prompt: &dyn CollisionPrompt,
    progress: Option<ProgressSink>,
    cancel: &CancellationToken,
) -> PanelResult<InstalledVersion> {
    let install_version = resolve_install_version(&target.install_root, &release.version, prompt)?;
    platform::ensure_min_disk_space(&target.install_root, target.min_free_space)?;

    platform::ensure_dir(&target.install_root)?;
    let dir = version_dir(&target.install_root, &install_version);
    std::fs::create_dir(&dir).map_err(|source| PanelError::io(&dir, source))?;
    info!("Installing {} {} into {:?}", target.module, install_version, dir);

    let mut archive: Option<PathBuf> = None;
    let result = populate(downloader, target, release, &dir, &mut archive, progress, cancel).await;

    if let Some(archive) = &archive {
        if let Err(err) = tokio::fs::remove_file(archive).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove download {:?}: {}", archive, err);
            }
        }
    }

    match result {
        Ok(()) => Ok(InstalledVersion {
            version: install_version,
            path: dir,
        }),
        Err(err) => {
            warn!("Install of {} failed: {}", install_version, err);
            remove_partial(&dir).await;
            Err(err)
        }
    }
}

async fn populate(
    downloader: &Downloader,
    target: &InstallTarget,
    release: &Release,
    dir: &Path,
    archive_slot: &mut Option<PathBuf>,
    progress: Option<ProgressSink>,
    cancel: &CancellationToken,
) -> PanelResult<()> {
    let candidates: Vec<String> = target
        .asset_candidates
        .iter()
        .map(|template| release.asset_url(&asset_name(template, &release.version)))
        .collect();
    let url = downloader
        .probe_first_available(&release.version.to_string(), &candidates)
        .await?;

    let file_name = url.rsplit('/').next().unwrap_or("artifact").to_string();

    // A jar is run as shipped, so it is downloaded straight into place.
    if file_name.ends_with(".jar") {
        downloader
            .download_file(&url, &dir.join(&file_name), progress, cancel)
            .await?;
    } else {
        let format =
            ArchiveFormat::from_name(&file_name).ok_or_else(|| PanelError::MalformedArchive {
                path: PathBuf::from(&file_name),
                reason: "unsupported archive type".into(),
            })?;
        let archive = target
            .install_root
            .join(format!(".download-{}-{}", uuid::Uuid::new_v4(), file_name));
        *archive_slot = Some(archive.clone());
        downloader
            .download_file(&url, &archive, progress, cancel)
            .await?;

        let dest = dir.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || {
            platform::extract_archive(&archive, &dest, format, true)
        })
        .await
        .map_err(|err| PanelError::Other(format!("extract task failed: {err}")))??;
        debug!("Extracted {} entries into {:?}", extracted, dir);
    }

    seed_reference_tree(target, &release.version, dir)?;

    for executable in &target.executables {
        platform::mark_executable(&dir.join(asset_name(executable, &release.version)))?;
    }
    Ok(())
}

/// Populate `local/` from the artifact's embedded reference when the
/// release did not ship it unpacked.
fn seed_reference_tree(target: &InstallTarget, version: &Version, dir: &Path) -> PanelResult<()> {
    let Some(artifact) = &target.reference_artifact else {
        return Ok(());
    };
    let local = dir.join(LOCAL_DIR);
    let artifact = dir.join(asset_name(artifact, version));
    if local.exists() || !artifact.is_file() {
        return Ok(());
    }
    let written = ZipReference::new(artifact).extract_into(&local)?;
    debug!("Seeded {} reference files into {:?}", written, local);
    Ok(())
}

pub(crate) async fn remove_partial(dir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove partial install {:?}: {}", dir, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::core::test_support::{serve_routes, write_zip, Route};
    use crate::core::version::list_installed;

    struct Scripted(Mutex<Vec<Option<String>>>);

    impl CollisionPrompt for Scripted {
        fn confirm_metadata(&self, _base: &Version, proposed: &str) -> Option<String> {
            let mut answers = self.0.lock().unwrap();
            if answers.is_empty() {
                return Some(proposed.to_string());
            }
            answers.remove(0)
        }
    }

    fn release_zip(dir: &Path) -> Vec<u8> {
        let path = dir.join("fixture.zip");
        write_zip(
            &path,
            &[
                ("main-1.2.3/server", b"#!/bin/sh\necho hi\n".as_slice()),
                ("main-1.2.3/local/config.yml", b"port: 8080\n".as_slice()),
            ],
        );
        std::fs::read(path).unwrap()
    }

    fn target(root: &Path) -> InstallTarget {
        InstallTarget {
            module: "main".into(),
            install_root: root.to_path_buf(),
            asset_candidates: vec![
                "main-{version}-universal.zip".into(),
                "main-{version}.zip".into(),
            ],
            executables: vec!["server".into()],
            reference_artifact: None,
            preserved_dirs: Vec::new(),
            min_free_space: 0,
        }
    }

    async fn release(tmp: &Path) -> Release {
        let base = serve_routes(HashMap::from([(
            "/v1.2.3/main-1.2.3.zip".to_string(),
            Route::ok(release_zip(tmp)),
        )]))
        .await;
        Release::new(
            Version::parse("1.2.3").unwrap(),
            "v1.2.3",
            format!("{base}/{{tag}}/{{asset}}"),
        )
    }

    #[test]
    fn collision_prompt_defaults_and_edits() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("1.0.0")).unwrap();
        let v = Version::parse("1.0.0").unwrap();

        let accepted = resolve_install_version(tmp.path(), &v, &AcceptProposed).unwrap();
        assert_eq!(accepted.to_string(), "1.0.0+1");

        let typed = Scripted(Mutex::new(vec![Some("test".into())]));
        assert_eq!(
            resolve_install_version(tmp.path(), &v, &typed).unwrap().to_string(),
            "1.0.0+test"
        );

        std::fs::create_dir_all(tmp.path().join("1.0.0+test")).unwrap();
        let typed = Scripted(Mutex::new(vec![Some("test".into())]));
        assert_eq!(
            resolve_install_version(tmp.path(), &v, &typed).unwrap().to_string(),
            "1.0.0+test.1"
        );

        let declined = Scripted(Mutex::new(vec![None]));
        assert!(matches!(
            resolve_install_version(tmp.path(), &v, &declined),
            Err(PanelError::Cancelled)
        ));
    }

    #[test]
    fn typed_metadata_is_sanitized() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("2.0.0")).unwrap();
        let typed = Scripted(Mutex::new(vec![Some(" my:build ".into())]));
        let v = resolve_install_version(tmp.path(), &Version::parse("2.0.0").unwrap(), &typed)
            .unwrap();
        assert_eq!(v.to_string(), "2.0.0+my.build");
    }

    #[tokio::test]
    async fn fresh_install_into_empty_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("main");
        let release = release(tmp.path()).await;

        let installed = install_fresh(
            &Downloader::with_client(reqwest::Client::new()),
            &target(&root),
            &release,
            &AcceptProposed,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(installed.path, root.join("1.2.3"));
        assert_eq!(
            std::fs::read_to_string(root.join("1.2.3/local/config.yml")).unwrap(),
            "port: 8080\n"
        );
        assert!(!root.join("main.pid").exists());
        let names: Vec<String> = list_installed(&root)
            .unwrap()
            .into_iter()
            .map(|iv| iv.version.to_string())
            .collect();
        assert_eq!(names, vec!["1.2.3"]);

        // Only the version directory remains; the download is gone.
        let leftovers: Vec<_> = std::fs::read_dir(&root).unwrap().collect();
        assert_eq!(leftovers.len(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(root.join("1.2.3/server"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn second_install_gets_numbered_name() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("main");
        let release = release(tmp.path()).await;
        let downloader = Downloader::with_client(reqwest::Client::new());
        let cancel = CancellationToken::new();

        for expected in ["1.2.3", "1.2.3+1", "1.2.3+2"] {
            let installed =
                install_fresh(&downloader, &target(&root), &release, &AcceptProposed, None, &cancel)
                    .await
                    .unwrap();
            assert_eq!(installed.version.to_string(), expected);
        }
    }

    #[tokio::test]
    async fn jar_asset_is_kept_and_seeds_local() {
        let tmp = tempfile::tempdir().unwrap();
        let jar = tmp.path().join("server.jar");
        write_zip(
            &jar,
            &[
                ("META-INF/MANIFEST.MF", b"Main-Class: app.Main\n".as_slice()),
                ("local/config.yml", b"port: 5000\n".as_slice()),
            ],
        );
        let base = serve_routes(HashMap::from([(
            "/v2.0.0/main-2.0.0.jar".to_string(),
            Route::ok(std::fs::read(&jar).unwrap()),
        )]))
        .await;
        let release = Release::new(
            Version::parse("2.0.0").unwrap(),
            "v2.0.0",
            format!("{base}/{{tag}}/{{asset}}"),
        );
        let root = tmp.path().join("main");
        let mut target = target(&root);
        target.asset_candidates = vec!["main-{version}.jar".into()];
        target.reference_artifact = Some("main-{version}.jar".into());

        install_fresh(
            &Downloader::with_client(reqwest::Client::new()),
            &target,
            &release,
            &AcceptProposed,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(root.join("2.0.0/main-2.0.0.jar").is_file());
        assert!(!root.join("2.0.0/META-INF").exists());
        assert_eq!(
            std::fs::read_to_string(root.join("2.0.0/local/config.yml")).unwrap(),
            "port: 5000\n"
        );
    }

    #[tokio::test]
    async fn missing_asset_removes_partial_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("main");
        let base = serve_routes(HashMap::new()).await;
        let release = Release::new(
            Version::parse("9.9.9").unwrap(),
            "v9.9.9",
            format!("{base}/{{tag}}/{{asset}}"),
        );

        let err = install_fresh(
            &Downloader::with_client(reqwest::Client::new()),
            &target(&root),
            &release,
            &AcceptProposed,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PanelError::AssetNotFound { .. }));
        assert!(!root.join("9.9.9").exists());
    }

    #[tokio::test]
    async fn cancelled_install_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("main");
        let release = release(tmp.path()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = install_fresh(
            &Downloader::with_client(reqwest::Client::new()),
            &target(&root),
            &release,
            &AcceptProposed,
            None,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PanelError::Cancelled));
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }
}
