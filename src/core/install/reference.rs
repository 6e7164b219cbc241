use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::archive::checked_relative_path;

/// User-editable tree shipped inside every release.
pub const LOCAL_DIR: &str = "local";

/// Read access to the reference copy of `local/` embedded in an artifact.
///
/// Paths are relative to `local/`, always with `/` separators.
pub trait ReferenceSource: Send + Sync {
    /// SHA-256 (lowercase hex) of every reference file.
    fn hashes(&self) -> PanelResult<BTreeMap<String, String>>;

    /// Write the whole reference tree under `dest`. Returns files written.
    fn extract_into(&self, dest: &Path) -> PanelResult<usize>;
}

/// Reference tree stored under `local/` inside a zip or jar.
#[derive(Debug, Clone)]
pub struct ZipReference {
    archive: PathBuf,
}

impl ZipReference {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
        }
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    fn open(&self) -> PanelResult<zip::ZipArchive<File>> {
        let file = File::open(&self.archive).map_err(|source| PanelError::io(&self.archive, source))?;
        Ok(zip::ZipArchive::new(file)?)
    }

    /// Walk the reference files, handing each relative path and entry to `visit`.
    fn for_each_file(
        &self,
        mut visit: impl FnMut(&str, &mut dyn std::io::Read) -> PanelResult<()>,
    ) -> PanelResult<()> {
        let prefix = format!("{LOCAL_DIR}/");
        let mut archive = self.open()?;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().replace('\\', "/");
            let Some(rel) = name.strip_prefix(&prefix) else {
                continue;
            };
            if rel.is_empty() {
                continue;
            }
            // Validation only; the normalised form is what callers see.
            if checked_relative_path(&self.archive, rel)?.is_none() {
                continue;
            }
            let rel = normalize(rel);
            visit(&rel, &mut entry)?;
        }
        Ok(())
    }
}

fn normalize(rel: &str) -> String {
    rel.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// First path segment of a `/`-separated relative path.
pub fn first_segment(rel: &str) -> &str {
    rel.split('/').next().unwrap_or(rel)
}

impl ReferenceSource for ZipReference {
    fn hashes(&self) -> PanelResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        self.for_each_file(|rel, entry| {
            let mut hasher = Sha256::new();
            std::io::copy(entry, &mut hasher).map_err(|source| PanelError::io(&self.archive, source))?;
            out.insert(rel.to_string(), hex::encode(hasher.finalize()));
            Ok(())
        })?;
        Ok(out)
    }

    fn extract_into(&self, dest: &Path) -> PanelResult<usize> {
        std::fs::create_dir_all(dest).map_err(|source| PanelError::io(dest, source))?;
        let mut written = 0;
        self.for_each_file(|rel, entry| {
            let out_path = dest.join(rel);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| PanelError::io(parent, source))?;
            }
            let mut out = File::create(&out_path).map_err(|source| PanelError::io(&out_path, source))?;
            std::io::copy(entry, &mut out).map_err(|source| PanelError::io(&out_path, source))?;
            written += 1;
            Ok(())
        })?;
        Ok(written)
    }
}

/// Relative `/`-separated paths of every file under `root`, sorted.
/// A missing root has no files.
pub fn list_files(root: &Path) -> PanelResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    if !root.exists() {
        return Ok(out);
    }
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            let io = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            PanelError::io(path, io)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            out.insert(rel);
        }
    }
    Ok(out)
}

/// Names of the top-level entries (files and directories) under `root`.
pub fn top_level_entries(root: &Path) -> PanelResult<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(source) => return Err(PanelError::io(root, source)),
    };
    for entry in entries {
        let entry = entry.map_err(|source| PanelError::io(root, source))?;
        out.insert(entry.file_name().to_string_lossy().to_string());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::downloader::sha256_bytes;
    use crate::core::test_support::{snapshot_tree, write_zip};

    fn fixture(dir: &Path) -> ZipReference {
        let jar = dir.join("server.jar");
        write_zip(
            &jar,
            &[
                ("app/Main.class", b"cafebabe".as_slice()),
                ("local/config.yml", b"port: 8080\n".as_slice()),
                ("local/themes/dark.css", b"body{}".as_slice()),
                ("local/", b"".as_slice()),
            ],
        );
        ZipReference::new(jar)
    }

    #[test]
    fn hashes_cover_every_reference_file() {
        let tmp = tempfile::tempdir().unwrap();
        let hashes = fixture(tmp.path()).hashes().unwrap();
        assert_eq!(
            hashes.keys().cloned().collect::<Vec<_>>(),
            vec!["config.yml", "themes/dark.css"]
        );
        assert_eq!(hashes["config.yml"], sha256_bytes(b"port: 8080\n"));
    }

    #[test]
    fn extraction_writes_only_local_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = fixture(tmp.path());
        let dest = tmp.path().join("out/local");

        assert_eq!(reference.extract_into(&dest).unwrap(), 2);
        let tree = snapshot_tree(&dest);
        assert_eq!(
            tree.keys().cloned().collect::<Vec<_>>(),
            vec!["config.yml", "themes/dark.css"]
        );
    }

    #[test]
    fn traversal_inside_reference_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let jar = tmp.path().join("evil.jar");
        write_zip(&jar, &[("local/../../escape.txt", b"x".as_slice())]);
        let err = ZipReference::new(jar)
            .extract_into(&tmp.path().join("local"))
            .unwrap_err();
        assert!(matches!(err, PanelError::MalformedArchive { .. }));
        assert!(!tmp.path().join("escape.txt").exists());
    }
}
