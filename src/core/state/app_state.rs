use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::downloader::{Downloader, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::java::{
    JvmProvisioner, MediaDownload, MediaProvisioner, SharedRuntimes, ADOPTIUM_API_BASE,
};
use crate::core::module::{ModuleController, ModuleDescriptor, ModuleOverride};
use crate::core::platform::{ensure_dir, PanelPaths};

fn default_java_api_base() -> String {
    ADOPTIUM_API_BASE.to_string()
}

/// `panel_settings.json` under the shared root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub include_prereleases: bool,
    #[serde(default = "default_java_api_base")]
    pub java_api_base: String,
    /// Media toolchain builds keyed by platform (`linux-amd64`, ...).
    pub media_downloads: HashMap<String, MediaDownload>,
    pub modules: HashMap<String, ModuleOverride>,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            include_prereleases: false,
            java_api_base: default_java_api_base(),
            media_downloads: HashMap::new(),
            modules: HashMap::new(),
        }
    }
}

impl PanelSettings {
    /// Missing or unreadable settings fall back to defaults.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("Ignoring corrupt settings {:?}: {}", path, err);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> PanelResult<()> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| PanelError::io(path, source))
    }

    /// Built-in descriptors with this file's overrides applied.
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        ModuleDescriptor::builtin()
            .into_iter()
            .map(|mut descriptor| {
                if let Some(overrides) = self.modules.get(&descriptor.name) {
                    descriptor.apply_override(overrides);
                }
                descriptor
            })
            .collect()
    }
}

/// Everything one panel process holds: layout, settings and a controller
/// per module.
pub struct PanelState {
    pub paths: PanelPaths,
    pub settings: PanelSettings,
    pub downloader: Downloader,
    controllers: Vec<ModuleController>,
}

impl PanelState {
    pub fn new(paths: PanelPaths) -> PanelResult<Self> {
        ensure_dir(paths.shared_root())?;
        let settings = PanelSettings::load(&paths.settings_path());
        let downloader = Downloader::new()?;

        let controllers = settings
            .descriptors()
            .into_iter()
            .map(|descriptor| {
                let root = paths.module_root(&descriptor.name);
                ModuleController::new(descriptor, root, downloader.clone())
            })
            .collect::<PanelResult<Vec<_>>>()?;

        info!("Panel state loaded from {:?}", paths.shared_root());
        Ok(Self {
            paths,
            settings,
            downloader,
            controllers,
        })
    }

    pub fn save_settings(&self) -> PanelResult<()> {
        self.settings.save(&self.paths.settings_path())
    }

    pub fn controllers(&self) -> &[ModuleController] {
        &self.controllers
    }

    pub fn controller(&self, name: &str) -> PanelResult<&ModuleController> {
        self.controllers
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| unknown_module(name))
    }

    pub fn controller_mut(&mut self, name: &str) -> PanelResult<&mut ModuleController> {
        self.controllers
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| unknown_module(name))
    }

    pub fn jvm_provisioner(&self) -> JvmProvisioner {
        JvmProvisioner::new(self.paths.java_dir(), self.downloader.clone())
            .with_api_base(self.settings.java_api_base.clone())
    }

    pub fn media_provisioner(&self) -> MediaProvisioner {
        MediaProvisioner::new(self.paths.media_dir(), self.downloader.clone())
            .with_downloads(self.settings.media_downloads.clone())
    }

    pub fn runtimes(&self, progress: Option<ProgressSink>) -> SharedRuntimes {
        SharedRuntimes {
            jvm: self.jvm_provisioner(),
            media: self.media_provisioner(),
            progress,
        }
    }

    /// Delete shared JVMs no installed module version still needs.
    pub fn prune_java(&self) -> PanelResult<Vec<PathBuf>> {
        let mut required = Vec::new();
        for controller in &self.controllers {
            for installed in crate::core::version::list_installed(controller.install_root())? {
                if let Some(major) = controller.required_java_major(Some(&installed.version))? {
                    required.push(major);
                }
            }
        }
        required.sort_unstable();
        required.dedup();
        self.jvm_provisioner().prune(&required)
    }
}

fn unknown_module(name: &str) -> PanelError {
    PanelError::Other(format!("Unknown module '{name}'"))
}
