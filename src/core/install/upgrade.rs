use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::catalog::Release;
use crate::core::downloader::{sha256_file_blocking, Downloader, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::{copy_dir_preserving, copy_file_preserving};
use crate::core::version::InstalledVersion;

use super::fresh::{asset_name, install_fresh, remove_partial, CollisionPrompt};
use super::reference::{
    first_segment, list_files, top_level_entries, ReferenceSource, ZipReference, LOCAL_DIR,
};
use super::InstallTarget;

pub const IMPORT_LOG: &str = "import.log";

/// What the user did to `local/` relative to the old reference.
///
/// `added` and `deleted` may hold collapsed directory entries, written with
/// a trailing `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub unchanged: Vec<String>,
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    /// Modified files the new reference also changed; the user's copy wins.
    pub conflicts: Vec<String>,
}

impl Reconciliation {
    pub fn is_untouched(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.deleted.is_empty()
    }
}

/// Result of a completed upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeReport {
    pub installed: InstalledVersion,
    pub preserved: Vec<String>,
    pub reconciliation: Reconciliation,
    pub log_path: PathBuf,
}

// ── Classification ──────────────────────────────────

/// Merge-walk the old reference hashes against the files in the old
/// `local/` and classify every path.
pub fn reconcile(
    old_local: &Path,
    old_ref: &BTreeMap<String, String>,
) -> PanelResult<Reconciliation> {
    let local_files = list_files(old_local)?;
    let mut rec = Reconciliation::default();
    let mut added = Vec::new();
    let mut deleted = Vec::new();

    let mut refs = old_ref.iter().peekable();
    let mut locals = local_files.iter().peekable();
    loop {
        match (refs.peek(), locals.peek()) {
            (Some((ref_path, ref_hash)), Some(local_path)) => {
                match ref_path.as_str().cmp(local_path.as_str()) {
                    std::cmp::Ordering::Equal => {
                        let actual = sha256_file_blocking(&old_local.join(local_path.as_str()))?;
                        if actual.eq_ignore_ascii_case(ref_hash) {
                            rec.unchanged.push((*local_path).clone());
                        } else {
                            rec.modified.push((*local_path).clone());
                        }
                        refs.next();
                        locals.next();
                    }
                    std::cmp::Ordering::Less => {
                        deleted.push((*ref_path).clone());
                        refs.next();
                    }
                    std::cmp::Ordering::Greater => {
                        added.push((*local_path).clone());
                        locals.next();
                    }
                }
            }
            (Some((ref_path, _)), None) => {
                deleted.push((*ref_path).clone());
                refs.next();
            }
            (None, Some(local_path)) => {
                added.push((*local_path).clone());
                locals.next();
            }
            (None, None) => break,
        }
    }

    let ref_paths: BTreeSet<String> = old_ref.keys().cloned().collect();
    rec.added = collapse(added, &ref_paths);
    rec.deleted = collapse(deleted, &local_files);
    Ok(rec)
}

/// Replace each file by its top-most ancestor directory that has no file
/// on the `opposite` side, so whole added or deleted trees become one entry.
fn collapse(files: Vec<String>, opposite: &BTreeSet<String>) -> Vec<String> {
    let mut out = BTreeSet::new();
    for file in files {
        let segments: Vec<&str> = file.split('/').collect();
        let mut entry = file.clone();
        for depth in 1..segments.len() {
            let dir = format!("{}/", segments[..depth].join("/"));
            if !has_path_under(opposite, &dir) {
                entry = dir;
                break;
            }
        }
        out.insert(entry);
    }
    out.into_iter().collect()
}

fn has_path_under(paths: &BTreeSet<String>, dir: &str) -> bool {
    paths
        .range(dir.to_string()..)
        .next()
        .is_some_and(|path| path.starts_with(dir))
}

// ── Application ─────────────────────────────────────

/// Rebuild `new_local` from the new reference, then replay deletions,
/// modifications and additions from `old_local` in that order.
///
/// A deleted directory entry removes the old reference's files under it and
/// then any directories left empty; files the new reference introduced
/// there survive.
pub fn apply(
    rec: &Reconciliation,
    old_ref_paths: &BTreeSet<String>,
    old_local: &Path,
    new_local: &Path,
    new_ref: Option<&dyn ReferenceSource>,
) -> PanelResult<()> {
    if let Some(reference) = new_ref {
        match std::fs::remove_dir_all(new_local) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(PanelError::io(new_local, source)),
        }
        reference.extract_into(new_local)?;
    }

    for entry in &rec.deleted {
        if entry.ends_with('/') {
            let under = old_ref_paths
                .range(entry.clone()..)
                .take_while(|path| path.starts_with(entry.as_str()));
            for path in under {
                remove_file_if_present(&new_local.join(path))?;
            }
            prune_empty_dirs(&new_local.join(entry.trim_end_matches('/')));
        } else {
            remove_file_if_present(&new_local.join(entry))?;
        }
    }

    for path in &rec.modified {
        copy_file_preserving(&old_local.join(path), &new_local.join(path))?;
    }

    for entry in &rec.added {
        let rel = entry.trim_end_matches('/');
        if entry.ends_with('/') {
            copy_dir_preserving(&old_local.join(rel), &new_local.join(rel))?;
        } else {
            copy_file_preserving(&old_local.join(rel), &new_local.join(rel))?;
        }
    }
    Ok(())
}

fn remove_file_if_present(path: &Path) -> PanelResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted {:?}", path);
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PanelError::io(path, source)),
    }
}

/// Remove `dir` and its subdirectories bottom-up where they are empty.
fn prune_empty_dirs(dir: &Path) {
    let dirs = walkdir::WalkDir::new(dir)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir());
    for entry in dirs {
        // Fails on non-empty directories.
        let _ = std::fs::remove_dir(entry.path());
    }
}

/// Full merge of the user's `local/` edits onto a freshly installed version.
///
/// `old_ref` absent means every old file counts as a user addition;
/// `new_ref` absent keeps the installed `local/` as the new baseline.
pub fn three_way_merge(
    old_local: &Path,
    new_local: &Path,
    old_ref: Option<&dyn ReferenceSource>,
    new_ref: Option<&dyn ReferenceSource>,
) -> PanelResult<Reconciliation> {
    let old_hashes = match old_ref {
        Some(reference) => reference.hashes()?,
        None => BTreeMap::new(),
    };

    let mut rec = reconcile(old_local, &old_hashes)?;

    // Only top-level entries the new release still ships can lose files.
    let top = top_level_entries(new_local)?;
    rec.deleted
        .retain(|entry| top.contains(first_segment(entry.trim_end_matches('/'))));

    if let Some(reference) = new_ref {
        let new_hashes = reference.hashes()?;
        rec.conflicts = rec
            .modified
            .iter()
            .filter(|path| match (new_hashes.get(*path), old_hashes.get(*path)) {
                (Some(new), Some(old)) => !new.eq_ignore_ascii_case(old),
                _ => false,
            })
            .cloned()
            .collect();
    }

    let old_ref_paths: BTreeSet<String> = old_hashes.keys().cloned().collect();
    apply(&rec, &old_ref_paths, old_local, new_local, new_ref)?;
    Ok(rec)
}

/// Human-readable summary written next to the new version.
pub fn render_import_log(
    from: &str,
    to: &str,
    preserved: &[String],
    rec: &Reconciliation,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Upgrade from {from} to {to}");
    if !preserved.is_empty() {
        let _ = writeln!(out, "Preserved: {}", preserved.join(", "));
    }
    let _ = writeln!(
        out,
        "Unchanged: {}, modified: {}, added: {}, deleted: {}",
        rec.unchanged.len(),
        rec.modified.len(),
        rec.added.len(),
        rec.deleted.len()
    );
    out.push('\n');
    for path in &rec.deleted {
        let _ = writeln!(out, "deleted   {path}");
    }
    for path in &rec.modified {
        let _ = writeln!(out, "modified  {path}");
    }
    for path in &rec.added {
        let _ = writeln!(out, "added     {path}");
    }
    for path in &rec.conflicts {
        let _ = writeln!(out, "conflict  {path} (kept local copy; the new release also changed it)");
    }
    out
}

/// Copy declared data directories verbatim. A file held open by the old
/// version surfaces as [`PanelError::FileLocked`].
pub fn preserve_dirs(old_dir: &Path, new_dir: &Path, dirs: &[String]) -> PanelResult<Vec<String>> {
    let mut preserved = Vec::new();
    for dir in dirs {
        let source = old_dir.join(dir);
        if !source.is_dir() {
            continue;
        }
        copy_dir_preserving(&source, &new_dir.join(dir)).map_err(PanelError::denied_as_locked)?;
        preserved.push(format!("{dir}/"));
    }
    Ok(preserved)
}

fn merge_installed(
    target: &InstallTarget,
    old: &InstalledVersion,
    new: &InstalledVersion,
) -> PanelResult<(Vec<String>, Reconciliation, PathBuf)> {
    let preserved = preserve_dirs(&old.path, &new.path, &target.preserved_dirs)?;

    let references = target.reference_artifact.as_ref().map(|template| {
        (
            ZipReference::new(old.path.join(asset_name(template, &old.version))),
            ZipReference::new(new.path.join(asset_name(template, &new.version))),
        )
    });
    let (old_ref, new_ref): (Option<&dyn ReferenceSource>, Option<&dyn ReferenceSource>) =
        match &references {
            Some((old_ref, new_ref)) => (
                old_ref
                    .archive()
                    .is_file()
                    .then_some(old_ref as &dyn ReferenceSource),
                new_ref
                    .archive()
                    .is_file()
                    .then_some(new_ref as &dyn ReferenceSource),
            ),
            None => (None, None),
        };
    if references.is_some() && old_ref.is_none() {
        warn!("Old version has no reference artifact; keeping all of its local files");
    }

    let rec = three_way_merge(
        &old.path.join(LOCAL_DIR),
        &new.path.join(LOCAL_DIR),
        old_ref,
        new_ref,
    )?;

    let log_path = new.path.join(IMPORT_LOG);
    let log = render_import_log(
        &old.version.to_string(),
        &new.version.to_string(),
        &preserved,
        &rec,
    );
    std::fs::write(&log_path, log).map_err(|source| PanelError::io(&log_path, source))?;
    Ok((preserved, rec, log_path))
}

/// Install `release` and carry the user's state over from `old`.
///
/// Any failure removes the partially created new version; `old` is never
/// modified.
#[instrument(skip_all, fields(module = %target.module, from = %old.version, to = %release.version))]
pub async fn upgrade(
    downloader: &Downloader,
    target: &InstallTarget,
    old: &InstalledVersion,
    release: &Release,
    prompt: &dyn CollisionPrompt,
    progress: Option<ProgressSink>,
    cancel: &CancellationToken,
) -> PanelResult<UpgradeReport> {
    let installed = install_fresh(downloader, target, release, prompt, progress, cancel).await?;

    let merge_target = target.clone();
    let merge_old = old.clone();
    let merge_new = installed.clone();
    let merged = tokio::task::spawn_blocking(move || {
        merge_installed(&merge_target, &merge_old, &merge_new)
    })
    .await
    .map_err(|err| PanelError::Other(format!("merge task failed: {err}")));

    match merged.and_then(|inner| inner) {
        Ok((preserved, reconciliation, log_path)) => {
            info!(
                "Upgraded {} -> {}: {} modified, {} added, {} deleted",
                old.version,
                installed.version,
                reconciliation.modified.len(),
                reconciliation.added.len(),
                reconciliation.deleted.len()
            );
            Ok(UpgradeReport {
                installed,
                preserved,
                reconciliation,
                log_path,
            })
        }
        Err(err) => {
            warn!("Upgrade to {} aborted: {}", installed.version, err);
            remove_partial(&installed.path).await;
            Err(err)
        }
    }
}
