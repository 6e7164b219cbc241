use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;
use xz2::read::XzDecoder;

use crate::core::error::{PanelError, PanelResult};

use super::paths::ensure_dir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    /// Guess the format from a file or asset name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") || lower.ends_with(".jar") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(ArchiveFormat::TarXz)
        } else {
            None
        }
    }
}

/// Extract `archive` into `dest`. With `flatten` set, an archive whose
/// entries all live under one top-level directory is unpacked without it.
/// Returns the number of files written.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    format: ArchiveFormat,
    flatten: bool,
) -> PanelResult<usize> {
    let written = match format {
        ArchiveFormat::Zip => extract_zip(archive, dest)?,
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest)?,
        ArchiveFormat::TarXz => extract_tar_xz(archive, dest)?,
    };
    if flatten {
        flatten_single_root(dest)?;
    }
    debug!("Extracted {} files from {:?} into {:?}", written, archive, dest);
    Ok(written)
}

/// Extract a zip archive. Every entry is validated before anything is
/// written, so a hostile entry leaves `dest` untouched.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> PanelResult<usize> {
    let file = File::open(archive_path).map_err(|source| PanelError::io(archive_path, source))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut planned = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let rel = checked_relative_path(archive_path, entry.name())?;
        planned.push(rel);
    }

    ensure_dir(dest)?;
    let mut written = 0;
    for (index, rel) in planned.into_iter().enumerate() {
        let Some(rel) = rel else {
            continue;
        };
        let mut entry = archive.by_index(index)?;
        let out_path = dest.join(&rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| PanelError::io(&out_path, source))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PanelError::io(parent, source))?;
        }

        {
            let mut out = File::create(&out_path).map_err(|source| PanelError::io(&out_path, source))?;
            std::io::copy(&mut entry, &mut out).map_err(|source| PanelError::io(&out_path, source))?;
        }

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(mode & 0o7777);
            std::fs::set_permissions(&out_path, perms)
                .map_err(|source| PanelError::io(&out_path, source))?;
        }
        written += 1;
    }

    Ok(written)
}

pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> PanelResult<usize> {
    extract_tar_with(archive_path, dest, |file| {
        Box::new(GzDecoder::new(file)) as Box<dyn Read>
    })
}

pub fn extract_tar_xz(archive_path: &Path, dest: &Path) -> PanelResult<usize> {
    extract_tar_with(archive_path, dest, |file| {
        Box::new(XzDecoder::new(file)) as Box<dyn Read>
    })
}

fn extract_tar_with(
    archive_path: &Path,
    dest: &Path,
    decoder: impl Fn(File) -> Box<dyn Read>,
) -> PanelResult<usize> {
    let open = || -> PanelResult<tar::Archive<Box<dyn Read>>> {
        let file =
            File::open(archive_path).map_err(|source| PanelError::io(archive_path, source))?;
        Ok(tar::Archive::new(decoder(file)))
    };

    // First pass: reject traversal before touching the destination.
    let mut validation = open()?;
    for entry in validation
        .entries()
        .map_err(|source| PanelError::io(archive_path, source))?
    {
        let entry = entry.map_err(|source| PanelError::io(archive_path, source))?;
        let path = entry
            .path()
            .map_err(|source| PanelError::io(archive_path, source))?;
        checked_relative_path(archive_path, &path.to_string_lossy())?;
    }

    ensure_dir(dest)?;
    let mut archive = open()?;
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);

    let mut written = 0;
    for entry in archive
        .entries()
        .map_err(|source| PanelError::io(archive_path, source))?
    {
        let mut entry = entry.map_err(|source| PanelError::io(archive_path, source))?;
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|source| PanelError::io(dest, source))?;
        if !unpacked {
            return Err(PanelError::MalformedArchive {
                path: archive_path.to_path_buf(),
                reason: "entry escapes the target directory".into(),
            });
        }
        if is_file {
            written += 1;
        }
    }

    Ok(written)
}

/// Normalise an entry name into a relative path, or fail when it would
/// land outside the extraction root. `None` means "the root itself".
pub(crate) fn checked_relative_path(archive_path: &Path, name: &str) -> PanelResult<Option<PathBuf>> {
    let malformed = |reason: &str| PanelError::MalformedArchive {
        path: archive_path.to_path_buf(),
        reason: format!("{reason}: {name}"),
    };

    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(malformed("absolute entry path"));
    }

    let mut rel = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(malformed("parent directory component")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(malformed("absolute entry path"))
            }
        }
    }

    if rel.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(rel))
    }
}

/// If `dir` holds exactly one entry and it is a directory, hoist that
/// directory's children into `dir`.
pub fn flatten_single_root(dir: &Path) -> PanelResult<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|source| PanelError::io(dir, source))?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();

    if entries.len() != 1 {
        return Ok(());
    }
    let only = entries[0].path();
    if !only.is_dir() {
        return Ok(());
    }

    // Move aside first: a child may share the wrapper directory's name.
    let staging = dir.join(format!(".flatten-{}", uuid::Uuid::new_v4()));
    std::fs::rename(&only, &staging).map_err(|source| PanelError::io(&only, source))?;

    for child in std::fs::read_dir(&staging).map_err(|source| PanelError::io(&staging, source))? {
        let child = child.map_err(|source| PanelError::io(&staging, source))?;
        let target = dir.join(child.file_name());
        std::fs::rename(child.path(), &target).map_err(|source| PanelError::io(&target, source))?;
    }

    std::fs::remove_dir(&staging).map_err(|source| PanelError::io(&staging, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{snapshot_tree, write_tar_gz, write_zip, zip_dir};

    #[test]
    fn format_is_guessed_from_name() {
        assert_eq!(ArchiveFormat::from_name("app.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("server.jar"), Some(ArchiveFormat::Zip));
        assert_eq!(
            ArchiveFormat::from_name("ffmpeg-linux64.tar.xz"),
            Some(ArchiveFormat::TarXz)
        );
        assert_eq!(
            ArchiveFormat::from_name("jre.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::from_name("readme.md"), None);
    }

    #[test]
    fn zip_with_parent_component_is_rejected_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(
            &archive,
            &[("good.txt", b"ok".as_slice()), ("../escape.txt", b"bad".as_slice())],
        );

        let dest = tmp.path().join("out");
        let err = extract_zip(&archive, &dest).unwrap_err();
        assert!(matches!(err, PanelError::MalformedArchive { .. }));
        assert!(!dest.exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn zip_round_trip_reproduces_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(source.join("local/config")).unwrap();
        std::fs::write(source.join("local/config/app.yml"), "port: 8080\n").unwrap();
        std::fs::write(source.join("readme.txt"), "hello").unwrap();

        let archive = tmp.path().join("tree.zip");
        zip_dir(&source, &archive);

        let dest = tmp.path().join("dest");
        extract_zip(&archive, &dest).unwrap();
        assert_eq!(snapshot_tree(&source), snapshot_tree(&dest));
    }

    #[test]
    fn single_top_level_directory_is_flattened() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("tracker-1.2.3/tracker", b"#!/bin/sh\n".as_slice()),
                ("tracker-1.2.3/local/a.txt", b"a".as_slice()),
            ],
        );

        let dest = tmp.path().join("1.2.3");
        let written = extract_archive(&archive, &dest, ArchiveFormat::TarGz, true).unwrap();
        assert_eq!(written, 2);
        assert!(dest.join("tracker").is_file());
        assert!(dest.join("local/a.txt").is_file());
        assert!(!dest.join("tracker-1.2.3").exists());
    }

    #[test]
    fn flatten_handles_child_named_like_wrapper() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("v");
        std::fs::create_dir_all(dest.join("app")).unwrap();
        std::fs::write(dest.join("app/app"), "binary").unwrap();

        flatten_single_root(&dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("app")).unwrap(), "binary");
    }

    #[test]
    fn multiple_roots_are_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("v");
        std::fs::create_dir_all(dest.join("bin")).unwrap();
        std::fs::write(dest.join("README"), "x").unwrap();

        flatten_single_root(&dest).unwrap();
        assert!(dest.join("bin").is_dir());
        assert!(dest.join("README").is_file());
    }
}
