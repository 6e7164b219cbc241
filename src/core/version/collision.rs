use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::error::{PanelError, PanelResult};

use super::Version;

const MAX_ATTEMPTS: u32 = 1000;

/// An installed version directory under a module install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersion {
    pub version: Version,
    pub path: PathBuf,
}

/// Directory a version lives in.
pub fn version_dir(install_root: &Path, version: &Version) -> PathBuf {
    install_root.join(version.to_string())
}

pub fn is_installed(install_root: &Path, version: &Version) -> bool {
    version_dir(install_root, version).is_dir()
}

/// Pick metadata for `base` that does not clash with an existing directory.
///
/// Returns `desired` untouched when free. Otherwise: empty metadata tries
/// `1, 2, 3, ...`; a trailing single digit below 9 is bumped up to 9;
/// anything else (including exhausted bumps) gets `.1, .2, ...` appended.
pub fn resolve_collision(install_root: &Path, base: &Version, desired: &str) -> PanelResult<String> {
    let free = |metadata: &str| !is_installed(install_root, &base.with_metadata(metadata));

    if free(desired) {
        return Ok(desired.to_string());
    }

    if desired.is_empty() {
        for n in 1..=MAX_ATTEMPTS {
            let candidate = n.to_string();
            if free(&candidate) {
                debug!("Resolved collision for {} with metadata {}", base, candidate);
                return Ok(candidate);
            }
        }
        return Err(PanelError::NoFreeVersionName {
            base: base.to_string(),
            attempts: MAX_ATTEMPTS,
        });
    }

    let mut current = desired.to_string();
    let (prefix, last) = match desired.rsplit_once('.') {
        Some((prefix, last)) => (format!("{prefix}."), last),
        None => (String::new(), desired),
    };
    if let Some(mut digit) = single_digit(last) {
        while digit < 9 {
            digit += 1;
            let candidate = format!("{prefix}{digit}");
            if free(&candidate) {
                return Ok(candidate);
            }
            current = candidate;
        }
    }

    for n in 1..=MAX_ATTEMPTS {
        let candidate = format!("{current}.{n}");
        if free(&candidate) {
            return Ok(candidate);
        }
    }

    Err(PanelError::NoFreeVersionName {
        base: base.to_string(),
        attempts: MAX_ATTEMPTS,
    })
}

fn single_digit(segment: &str) -> Option<u8> {
    let bytes = segment.as_bytes();
    if bytes.len() == 1 && bytes[0].is_ascii_digit() {
        Some(bytes[0] - b'0')
    } else {
        None
    }
}

/// Every subdirectory of `install_root` whose name parses as a version,
/// newest first.
pub fn list_installed(install_root: &Path) -> PanelResult<Vec<InstalledVersion>> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(install_root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(source) => return Err(PanelError::io(install_root, source)),
    };

    for entry in entries {
        let entry = entry.map_err(|source| PanelError::io(install_root, source))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match Version::parse(&name) {
            Ok(version) => out.push(InstalledVersion { version, path }),
            Err(err) => {
                if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                    warn!("Ignoring directory {:?}: {}", path, err);
                }
            }
        }
    }

    out.sort_by(|a, b| a.version.compare_for_install_list(&b.version));
    Ok(out)
}

pub fn latest_installed(install_root: &Path) -> PanelResult<Option<InstalledVersion>> {
    Ok(list_installed(install_root)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn mkdirs(root: &Path, names: &[&str]) {
        for name in names {
            std::fs::create_dir_all(root.join(name)).unwrap();
        }
    }

    #[test]
    fn free_name_is_returned_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(resolve_collision(tmp.path(), &v("1.0.0"), "").unwrap(), "");
        assert_eq!(resolve_collision(tmp.path(), &v("1.0.0"), "test").unwrap(), "test");
    }

    #[test]
    fn empty_metadata_counts_up() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["1.0.0"]);
        assert_eq!(resolve_collision(tmp.path(), &v("1.0.0"), "").unwrap(), "1");
        mkdirs(tmp.path(), &["1.0.0+1"]);
        assert_eq!(resolve_collision(tmp.path(), &v("1.0.0"), "").unwrap(), "2");
    }

    #[test]
    fn named_metadata_gets_numeric_suffix() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["1.0.0+test"]);
        assert_eq!(
            resolve_collision(tmp.path(), &v("1.0.0"), "test").unwrap(),
            "test.1"
        );
        mkdirs(tmp.path(), &["1.0.0+test.1"]);
        assert_eq!(
            resolve_collision(tmp.path(), &v("1.0.0"), "test").unwrap(),
            "test.2"
        );
    }

    #[test]
    fn trailing_digit_is_bumped() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["2.0.0+rc.3", "2.0.0+rc.4"]);
        assert_eq!(
            resolve_collision(tmp.path(), &v("2.0.0"), "rc.3").unwrap(),
            "rc.5"
        );
    }

    #[test]
    fn trailing_nine_appends_instead_of_rolling_over() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["1.0.0+build.9"]);
        assert_eq!(
            resolve_collision(tmp.path(), &v("1.0.0"), "build.9").unwrap(),
            "build.9.1"
        );
    }

    #[test]
    fn exhausted_bumps_append_to_last_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["1.0.0+8", "1.0.0+9"]);
        assert_eq!(resolve_collision(tmp.path(), &v("1.0.0"), "8").unwrap(), "9.1");
    }

    #[test]
    fn resolved_name_never_exists() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["3.1.4", "3.1.4+1", "3.1.4+2", "3.1.4+x", "3.1.4+x.1"]);
        for desired in ["", "1", "x", "x.1", "y"] {
            let metadata = resolve_collision(tmp.path(), &v("3.1.4"), desired).unwrap();
            assert!(!is_installed(tmp.path(), &v("3.1.4").with_metadata(&metadata)));
        }
    }

    #[test]
    fn installed_list_ignores_non_versions_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(tmp.path(), &["1.0.0", "1.2.0", "1.0.0+test", "logs", "9.x"]);
        std::fs::write(tmp.path().join("2.0.0"), "not a dir").unwrap();

        let names: Vec<String> = list_installed(tmp.path())
            .unwrap()
            .into_iter()
            .map(|iv| iv.version.to_string())
            .collect();
        assert_eq!(names, vec!["1.2.0", "1.0.0", "1.0.0+test"]);
        assert_eq!(
            latest_installed(tmp.path()).unwrap().unwrap().version,
            v("1.2.0")
        );
    }

    #[test]
    fn missing_root_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_installed(&tmp.path().join("absent")).unwrap().is_empty());
    }
}
