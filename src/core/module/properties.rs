use std::path::Path;

use tracing::{debug, info};

use crate::core::error::{PanelError, PanelResult};

pub const ENV_PROPERTIES: &str = "env.properties";
pub const PORT_KEY: &str = "PORT";
pub const JAVA_MAJOR_KEY: &str = "JAVA_MAJOR";
/// Older installs recorded the Java requirement under this key.
pub const LEGACY_JAVA_KEY: &str = "TEMURIN_VERSION";

/// A `key=value` file that keeps its comments and line order on rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvProperties {
    lines: Vec<String>,
}

fn split_entry(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then(|| (key, value.trim()))
}

impl EnvProperties {
    pub fn parse(text: &str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Missing file reads as empty.
    pub fn load(path: &Path) -> PanelResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(PanelError::io(path, source)),
        }
    }

    pub fn save(&self, path: &Path) -> PanelResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PanelError::io(parent, source))?;
        }
        std::fs::write(path, self.render()).map_err(|source| PanelError::io(path, source))
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Last assignment wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .filter_map(|line| split_entry(line))
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v)
            .last()
    }

    /// Replace the effective assignment of `key`, or append one.
    pub fn set(&mut self, key: &str, value: &str) {
        let position = self
            .lines
            .iter()
            .rposition(|line| split_entry(line).is_some_and(|(k, _)| k == key));
        let line = format!("{key}={value}");
        match position {
            Some(index) => self.lines[index] = line,
            None => self.lines.push(line),
        }
    }

    /// Distinct keys in first-seen order, each with its last value.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for (key, value) in self.lines.iter().filter_map(|line| split_entry(line)) {
            match out.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value.to_string(),
                None => out.push((key.to_string(), value.to_string())),
            }
        }
        out
    }

    pub fn port(&self) -> Option<u16> {
        self.get(PORT_KEY)?.parse().ok()
    }

    pub fn java_major(&self) -> Option<u32> {
        self.get(JAVA_MAJOR_KEY)
            .or_else(|| self.get(LEGACY_JAVA_KEY))?
            .parse()
            .ok()
    }

    /// Put back any required default that is missing or unparsable.
    /// Returns true when something changed.
    pub fn reassert(&mut self, port: u16, java_major: Option<u32>) -> bool {
        let mut changed = false;
        if self.port().is_none() {
            self.set(PORT_KEY, &port.to_string());
            changed = true;
        }
        if let Some(major) = java_major {
            if self.get(JAVA_MAJOR_KEY).and_then(|v| v.parse::<u32>().ok()).is_none() {
                let major = self.java_major().unwrap_or(major);
                self.set(JAVA_MAJOR_KEY, &major.to_string());
                changed = true;
            }
        }
        changed
    }
}

/// Load the install root's `env.properties`, re-asserting the module's
/// defaults and persisting them when they were missing.
pub fn load_module_properties(
    install_root: &Path,
    default_port: u16,
    default_java_major: Option<u32>,
) -> PanelResult<EnvProperties> {
    let path = install_root.join(ENV_PROPERTIES);
    let mut properties = EnvProperties::load(&path)?;
    if properties.reassert(default_port, default_java_major) {
        properties.save(&path)?;
        info!("Wrote module defaults to {:?}", path);
    }
    Ok(properties)
}

/// The version's own `env.properties`, when it has one.
pub fn load_version_properties(version_dir: &Path) -> PanelResult<Option<EnvProperties>> {
    let path = version_dir.join(ENV_PROPERTIES);
    if !path.is_file() {
        return Ok(None);
    }
    EnvProperties::load(&path).map(Some)
}

/// Java major for a version. The version file wins over the module file.
/// Read on every call so edits apply to the next start.
pub fn required_java_major(
    module: &EnvProperties,
    version: Option<&EnvProperties>,
    fallback: u32,
) -> u32 {
    let major = version
        .and_then(EnvProperties::java_major)
        .or_else(|| module.java_major())
        .unwrap_or(fallback);
    debug!("Java requirement resolved to {}", major);
    major
}

/// Child environment pairs: module file first, version file over it.
pub fn merged_pairs(module: &EnvProperties, version: Option<&EnvProperties>) -> Vec<(String, String)> {
    let mut merged = module.pairs();
    for (key, value) in version.map(EnvProperties::pairs).unwrap_or_default() {
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => merged.push((key, value)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_last_assignment() {
        let props = EnvProperties::parse(
            "\u{feff}# managed\nPORT=8080\n  # indented comment\nNAME = arena \nPORT=9090\nbroken line\n=nokey\n",
        );
        assert_eq!(props.get("PORT"), Some("9090"));
        assert_eq!(props.port(), Some(9090));
        assert_eq!(props.get("NAME"), Some("arena"));
        assert_eq!(
            props.pairs(),
            vec![
                ("PORT".to_string(), "9090".to_string()),
                ("NAME".to_string(), "arena".to_string())
            ]
        );
    }

    #[test]
    fn set_rewrites_effective_line_and_keeps_comments() {
        let mut props = EnvProperties::parse("# header\nPORT=1\nPORT=2\n");
        props.set("PORT", "3");
        props.set("EXTRA", "x");
        assert_eq!(props.render(), "# header\nPORT=1\nPORT=3\nEXTRA=x\n");
    }

    #[test]
    fn defaults_are_reasserted_and_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(ENV_PROPERTIES), "# mine\nPORT=abc\nTEMURIN_VERSION=21\n").unwrap();

        let props = load_module_properties(tmp.path(), 8080, Some(17)).unwrap();
        assert_eq!(props.port(), Some(8080));
        assert_eq!(props.get(JAVA_MAJOR_KEY), Some("21"));

        let on_disk = std::fs::read_to_string(tmp.path().join(ENV_PROPERTIES)).unwrap();
        assert!(on_disk.starts_with("# mine\n"));
        assert!(on_disk.contains("PORT=8080"));
        assert!(on_disk.contains("JAVA_MAJOR=21"));

        // Nothing to fix the second time.
        let mut again = EnvProperties::load(&tmp.path().join(ENV_PROPERTIES)).unwrap();
        assert!(!again.reassert(8080, Some(17)));
    }

    #[test]
    fn missing_module_file_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let props = load_module_properties(tmp.path(), 8082, None).unwrap();
        assert_eq!(props.port(), Some(8082));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join(ENV_PROPERTIES)).unwrap(),
            "PORT=8082\n"
        );
    }

    #[test]
    fn version_file_wins_for_java_and_env() {
        let module = EnvProperties::parse("PORT=8080\nJAVA_MAJOR=17\nMODE=a\n");
        let version = EnvProperties::parse("JAVA_MAJOR=21\nMODE=b\nONLY=v\n");

        assert_eq!(required_java_major(&module, Some(&version), 11), 21);
        assert_eq!(required_java_major(&module, None, 11), 17);
        assert_eq!(required_java_major(&EnvProperties::default(), None, 11), 11);

        assert_eq!(
            merged_pairs(&module, Some(&version)),
            vec![
                ("PORT".to_string(), "8080".to_string()),
                ("JAVA_MAJOR".to_string(), "21".to_string()),
                ("MODE".to_string(), "b".to_string()),
                ("ONLY".to_string(), "v".to_string()),
            ]
        );
    }
}
