use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::catalog::ReleaseSource;
use crate::core::install::InstallTarget;
use crate::core::platform::{OsTag, Platform, MIN_FREE_SPACE};
use crate::core::supervisor::{ExecutableKind, RuntimeRequirement};

const RELEASES_API: &str = "https://api.github.com/repos/control-panel-modules";
const RELEASES_DOWNLOAD: &str = "https://github.com/control-panel-modules";

/// Static description of a managed module.
///
/// Name templates may use `{version}` (expanded per release) and the
/// platform placeholders `{os}`, `{arch}` and `{exe}` (expanded per host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    pub display_name: String,
    pub default_port: u16,
    pub release_source: ReleaseSource,
    pub asset_candidates: Vec<String>,
    pub executable: String,
    pub kind: ExecutableKind,
    pub runtime: RuntimeRequirement,
    pub preserved_dirs: Vec<String>,
    pub reference_artifact: Option<String>,
    pub readiness_timeout_secs: u64,
    pub startup_log: Option<String>,
    pub ready_marker: Option<String>,
    #[serde(default)]
    pub selectors: Vec<(String, String)>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Per-module settings that replace built-in values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOverride {
    pub endpoints: Option<Vec<String>>,
    pub asset_template: Option<String>,
    pub port: Option<u16>,
    pub readiness_timeout_secs: Option<u64>,
}

fn github_source(repo: &str) -> ReleaseSource {
    ReleaseSource {
        endpoints: vec![format!("{RELEASES_API}/{repo}/releases?per_page=100")],
        asset_template: format!("{RELEASES_DOWNLOAD}/{repo}/releases/download/{{tag}}/{{asset}}"),
    }
}

impl ModuleDescriptor {
    /// Competition management server: a jar carrying its `local/` defaults.
    pub fn main_server() -> Self {
        Self {
            name: "main".into(),
            display_name: "Competition server".into(),
            default_port: 8080,
            release_source: github_source("main-server"),
            asset_candidates: vec!["main-server-{version}.jar".into()],
            executable: "main-server-{version}.jar".into(),
            kind: ExecutableKind::Jar,
            runtime: RuntimeRequirement::Jvm { min_major: 17 },
            preserved_dirs: vec!["database".into()],
            reference_artifact: Some("main-server-{version}.jar".into()),
            readiness_timeout_secs: 60,
            startup_log: Some("logs/startup.log".into()),
            ready_marker: Some("Server started".into()),
            selectors: vec![("SPRING_PROFILES_ACTIVE".into(), "panel".into())],
            args: Vec::new(),
        }
    }

    /// Serial/firmware bridge, a native binary per platform.
    pub fn firmware_bridge() -> Self {
        Self {
            name: "firmware-bridge".into(),
            display_name: "Firmware bridge".into(),
            default_port: 8081,
            release_source: github_source("firmware-bridge"),
            asset_candidates: vec![
                "firmware-bridge-{version}-{os}-{arch}.zip".into(),
                "firmware-bridge-{version}-{os}-{arch}.tar.gz".into(),
            ],
            executable: "firmware-bridge{exe}".into(),
            kind: ExecutableKind::Native,
            runtime: RuntimeRequirement::None,
            preserved_dirs: vec!["config".into()],
            reference_artifact: None,
            readiness_timeout_secs: 30,
            startup_log: None,
            ready_marker: None,
            selectors: vec![("BRIDGE_SERIAL_AUTODETECT".into(), "1".into())],
            args: Vec::new(),
        }
    }

    /// Tracker service, a script run by the system interpreter.
    pub fn tracker() -> Self {
        Self {
            name: "tracker".into(),
            display_name: "Tracker".into(),
            default_port: 8082,
            release_source: github_source("tracker"),
            asset_candidates: vec![
                "tracker-{version}.tar.gz".into(),
                "tracker-{version}.zip".into(),
            ],
            executable: "tracker.js".into(),
            kind: ExecutableKind::Script {
                interpreter: "node".into(),
            },
            runtime: RuntimeRequirement::None,
            preserved_dirs: vec!["data".into()],
            reference_artifact: None,
            readiness_timeout_secs: 30,
            startup_log: None,
            ready_marker: None,
            selectors: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Video capture and replay, needs the media toolchain.
    pub fn video() -> Self {
        Self {
            name: "video".into(),
            display_name: "Video capture".into(),
            default_port: 8083,
            release_source: github_source("video"),
            asset_candidates: vec![
                "video-{version}-{os}-{arch}.tar.gz".into(),
                "video-{version}-{os}-{arch}.zip".into(),
            ],
            executable: "video{exe}".into(),
            kind: ExecutableKind::Native,
            runtime: RuntimeRequirement::MediaToolchain,
            preserved_dirs: vec!["recordings".into()],
            reference_artifact: None,
            readiness_timeout_secs: 60,
            startup_log: None,
            ready_marker: None,
            selectors: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![
            Self::main_server(),
            Self::firmware_bridge(),
            Self::tracker(),
            Self::video(),
        ]
    }

    pub fn java_major(&self) -> Option<u32> {
        match self.runtime {
            RuntimeRequirement::Jvm { min_major } => Some(min_major),
            _ => None,
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn apply_override(&mut self, overrides: &ModuleOverride) {
        if let Some(endpoints) = &overrides.endpoints {
            self.release_source.endpoints = endpoints.clone();
        }
        if let Some(template) = &overrides.asset_template {
            self.release_source.asset_template = template.clone();
        }
        if let Some(port) = overrides.port {
            self.default_port = port;
        }
        if let Some(secs) = overrides.readiness_timeout_secs {
            self.readiness_timeout_secs = secs;
        }
    }

    /// Expand the platform placeholders, leaving `{version}` in place.
    pub fn expand_platform(&self, template: &str, platform: Platform) -> String {
        let exe = if platform.os == OsTag::Windows {
            ".exe"
        } else {
            ""
        };
        template
            .replace("{os}", platform.os.as_str())
            .replace("{arch}", platform.arch.as_str())
            .replace("{exe}", exe)
    }

    pub fn install_target(&self, install_root: &Path, platform: Platform) -> InstallTarget {
        let expand = |template: &String| self.expand_platform(template, platform);
        InstallTarget {
            module: self.name.clone(),
            install_root: install_root.to_path_buf(),
            asset_candidates: self.asset_candidates.iter().map(expand).collect(),
            executables: match self.kind {
                ExecutableKind::Native => vec![expand(&self.executable)],
                _ => Vec::new(),
            },
            reference_artifact: self.reference_artifact.as_ref().map(expand),
            preserved_dirs: self.preserved_dirs.clone(),
            min_free_space: MIN_FREE_SPACE,
        }
    }
}
