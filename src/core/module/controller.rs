// ─── Module Controller ───
// Owns everything mutable about one module; views subscribe to its events
// instead of keeping state of their own.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::core::catalog::{fetch_catalog, Release, ReleaseCatalog};
use crate::core::downloader::{Downloader, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::install::{
    self, duplicate_version, remove_version, rename_version, CollisionPrompt, UpgradeReport,
};
use crate::core::java::RuntimeResolver;
use crate::core::platform::process::StopPolicy;
use crate::core::platform::Platform;
use crate::core::supervisor::{
    kill_locking_process, LaunchRequest, ModuleState, RuntimeRequirement, StartedModule,
    Supervisor, SupervisorEvent,
};
use crate::core::version::{
    is_installed, latest_installed, list_installed, version_dir, InstalledVersion, Version,
};

use super::descriptor::ModuleDescriptor;
use super::properties::{
    load_module_properties, load_version_properties, merged_pairs, required_java_major,
    EnvProperties,
};

/// Everything a view may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ModuleEvent {
    Supervisor(SupervisorEvent),
    ReleasesRefreshed { module: String, count: usize, offline: bool },
    Installed { module: String, version: String },
    Upgraded { module: String, from: String, to: String, conflicts: usize },
    Renamed { module: String, from: String, to: String },
    Removed { module: String, version: String },
}

pub type Observer = Arc<dyn Fn(&ModuleEvent) + Send + Sync>;

/// The per-module mutable record.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub port: u16,
    pub selected: Option<Version>,
    pub releases: ReleaseCatalog,
    pub latest_installed: Option<InstalledVersion>,
    pub running: Option<StartedModule>,
}

pub struct ModuleController {
    descriptor: ModuleDescriptor,
    install_root: PathBuf,
    platform: Platform,
    downloader: Downloader,
    supervisor: Supervisor,
    events: mpsc::UnboundedReceiver<SupervisorEvent>,
    observers: Vec<Observer>,
    record: ModuleRecord,
}

impl ModuleController {
    pub fn new(
        descriptor: ModuleDescriptor,
        install_root: impl Into<PathBuf>,
        downloader: Downloader,
    ) -> PanelResult<Self> {
        let install_root = install_root.into();
        let (tx, events) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(descriptor.name.clone(), &install_root, tx)?;
        let mut controller = Self {
            record: ModuleRecord {
                port: descriptor.default_port,
                selected: None,
                releases: ReleaseCatalog::offline(),
                latest_installed: None,
                running: None,
            },
            descriptor,
            install_root,
            platform: Platform::current(),
            downloader,
            supervisor,
            events,
            observers: Vec::new(),
        };
        controller.refresh_installed()?;
        Ok(controller)
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    pub fn record(&self) -> &ModuleRecord {
        &self.record
    }

    pub async fn state(&self) -> ModuleState {
        self.supervisor.state().await
    }

    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    fn notify(&self, event: &ModuleEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }

    fn absorb(&mut self, event: SupervisorEvent) -> ModuleEvent {
        if let SupervisorEvent::Exited { .. } = &event {
            self.record.running = None;
        }
        let event = ModuleEvent::Supervisor(event);
        self.notify(&event);
        event
    }

    /// Forward queued supervisor events to observers. Returns how many.
    pub fn pump_events(&mut self) -> usize {
        let mut forwarded = 0;
        while let Ok(event) = self.events.try_recv() {
            self.absorb(event);
            forwarded += 1;
        }
        forwarded
    }

    /// Wait for the next supervisor event and forward it.
    pub async fn next_event(&mut self) -> Option<ModuleEvent> {
        let event = self.events.recv().await?;
        Some(self.absorb(event))
    }

    // ── Releases and installs ───────────────────────

    pub async fn refresh_releases(&mut self, include_prereleases: bool) -> Vec<Release> {
        let catalog = fetch_catalog(self.downloader.client(), &self.descriptor.release_source).await;
        self.notify(&ModuleEvent::ReleasesRefreshed {
            module: self.descriptor.name.clone(),
            count: catalog.len(),
            offline: catalog.is_offline(),
        });
        self.record.releases = catalog;
        self.record.releases.filtered(include_prereleases)
    }

    pub fn refresh_installed(&mut self) -> PanelResult<Vec<InstalledVersion>> {
        let installed = list_installed(&self.install_root)?;
        self.record.latest_installed = latest_installed(&self.install_root)?;
        if let Some(selected) = &self.record.selected {
            if !is_installed(&self.install_root, selected) {
                self.record.selected = None;
            }
        }
        Ok(installed)
    }

    pub fn select(&mut self, version: &Version) -> PanelResult<()> {
        if !is_installed(&self.install_root, version) {
            return Err(PanelError::VersionNotInstalled(version.to_string()));
        }
        self.record.selected = Some(version.clone());
        Ok(())
    }

    /// The version `start` would run.
    pub fn active_version(&self) -> Option<Version> {
        self.record
            .selected
            .clone()
            .or_else(|| self.record.latest_installed.as_ref().map(|i| i.version.clone()))
    }

    fn release_for(&self, version: Option<&Version>) -> PanelResult<Release> {
        let found = match version {
            Some(version) => self.record.releases.find(version),
            None => self.record.releases.latest_stable(),
        };
        found.cloned().ok_or_else(|| PanelError::AssetNotFound {
            version: version
                .map(ToString::to_string)
                .unwrap_or_else(|| "latest".into()),
            tried: Vec::new(),
        })
    }

    /// Install a catalog release (latest stable when `version` is `None`).
    #[instrument(skip_all, fields(module = %self.descriptor.name))]
    pub async fn install(
        &mut self,
        version: Option<&Version>,
        prompt: &dyn CollisionPrompt,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<InstalledVersion> {
        let release = self.release_for(version)?;
        let target = self.descriptor.install_target(&self.install_root, self.platform);
        let installed =
            install::install_fresh(&self.downloader, &target, &release, prompt, progress, cancel)
                .await?;
        self.refresh_installed()?;
        self.notify(&ModuleEvent::Installed {
            module: self.descriptor.name.clone(),
            version: installed.version.to_string(),
        });
        Ok(installed)
    }

    /// Install `to` and carry `from`'s user state over.
    #[instrument(skip_all, fields(module = %self.descriptor.name, from = %from))]
    pub async fn upgrade(
        &mut self,
        from: &Version,
        to: Option<&Version>,
        prompt: &dyn CollisionPrompt,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> PanelResult<UpgradeReport> {
        if !is_installed(&self.install_root, from) {
            return Err(PanelError::VersionNotInstalled(from.to_string()));
        }
        let old = InstalledVersion {
            version: from.clone(),
            path: version_dir(&self.install_root, from),
        };
        let release = self.release_for(to)?;
        let target = self.descriptor.install_target(&self.install_root, self.platform);
        let report =
            install::upgrade(&self.downloader, &target, &old, &release, prompt, progress, cancel)
                .await?;
        self.refresh_installed()?;
        self.record.selected = Some(report.installed.version.clone());
        self.notify(&ModuleEvent::Upgraded {
            module: self.descriptor.name.clone(),
            from: from.to_string(),
            to: report.installed.version.to_string(),
            conflicts: report.reconciliation.conflicts.len(),
        });
        Ok(report)
    }

    pub fn rename(&mut self, version: &Version, metadata: &str) -> PanelResult<InstalledVersion> {
        let renamed = rename_version(&self.install_root, version, metadata)?;
        if self.record.selected.as_ref() == Some(version) {
            self.record.selected = Some(renamed.version.clone());
        }
        self.refresh_installed()?;
        self.notify(&ModuleEvent::Renamed {
            module: self.descriptor.name.clone(),
            from: version.to_string(),
            to: renamed.version.to_string(),
        });
        Ok(renamed)
    }

    pub fn duplicate(&mut self, version: &Version, metadata: &str) -> PanelResult<InstalledVersion> {
        let copy = duplicate_version(&self.install_root, version, metadata)?;
        self.refresh_installed()?;
        self.notify(&ModuleEvent::Installed {
            module: self.descriptor.name.clone(),
            version: copy.version.to_string(),
        });
        Ok(copy)
    }

    pub fn remove(&mut self, version: &Version) -> PanelResult<()> {
        remove_version(&self.install_root, &self.descriptor.name, version)?;
        self.refresh_installed()?;
        self.notify(&ModuleEvent::Removed {
            module: self.descriptor.name.clone(),
            version: version.to_string(),
        });
        Ok(())
    }

    // ── Properties and runtime requirement ──────────

    fn load_properties(&self, version: Option<&Version>) -> PanelResult<(EnvProperties, Option<EnvProperties>)> {
        let module = load_module_properties(
            &self.install_root,
            self.descriptor.default_port,
            self.descriptor.java_major(),
        )?;
        let version_file = match version {
            Some(version) => load_version_properties(&version_dir(&self.install_root, version))?,
            None => None,
        };
        Ok((module, version_file))
    }

    /// Java major the module needs for `version`, if it runs on a JVM.
    pub fn required_java_major(&self, version: Option<&Version>) -> PanelResult<Option<u32>> {
        let Some(fallback) = self.descriptor.java_major() else {
            return Ok(None);
        };
        let (module, version_file) = self.load_properties(version)?;
        Ok(Some(required_java_major(&module, version_file.as_ref(), fallback)))
    }

    /// Resolve descriptor, properties and version into a start request.
    pub fn launch_request(&mut self, version: &Version) -> PanelResult<LaunchRequest> {
        if !is_installed(&self.install_root, version) {
            return Err(PanelError::VersionNotInstalled(version.to_string()));
        }
        let (module, version_file) = self.load_properties(Some(version))?;
        let port = version_file
            .as_ref()
            .and_then(EnvProperties::port)
            .or_else(|| module.port())
            .unwrap_or(self.descriptor.default_port);
        self.record.port = port;

        let runtime = match self.descriptor.java_major() {
            Some(fallback) => RuntimeRequirement::Jvm {
                min_major: required_java_major(&module, version_file.as_ref(), fallback),
            },
            None => self.descriptor.runtime,
        };
        let base = version.base().to_string();
        let executable = self
            .descriptor
            .expand_platform(&self.descriptor.executable, self.platform)
            .replace("{version}", &base);

        Ok(LaunchRequest {
            version_dir: version_dir(&self.install_root, version),
            executable,
            kind: self.descriptor.kind.clone(),
            runtime,
            args: self.descriptor.args.clone(),
            port,
            selectors: self.descriptor.selectors.clone(),
            properties: merged_pairs(&module, version_file.as_ref()),
            readiness_timeout: self.descriptor.readiness_timeout(),
            startup_log: self.descriptor.startup_log.clone(),
            ready_marker: self.descriptor.ready_marker.clone(),
        })
    }

    // ── Lifecycle ───────────────────────────────────

    /// Start `version`, or the active version when `None`.
    pub async fn start(
        &mut self,
        version: Option<&Version>,
        runtimes: &dyn RuntimeResolver,
        cancel: &CancellationToken,
    ) -> PanelResult<StartedModule> {
        let version = match version {
            Some(version) => version.clone(),
            None => self
                .active_version()
                .ok_or_else(|| PanelError::VersionNotInstalled(format!("any {} version", self.descriptor.name)))?,
        };
        let request = self.launch_request(&version)?;
        debug!("Starting {} {} on port {}", self.descriptor.name, version, request.port);

        let result = self.supervisor.start(request, runtimes, cancel).await;
        self.pump_events();
        let started = result?;
        self.record.selected = Some(version);
        self.record.running = Some(started.clone());
        info!("{} running at {}", self.descriptor.name, started.url);
        Ok(started)
    }

    pub async fn stop(&mut self) -> PanelResult<()> {
        self.supervisor.stop().await?;
        self.pump_events();
        self.record.running = None;
        Ok(())
    }

    /// Kill whatever holds this module's PID file, even another panel's child.
    pub async fn kill_lock(&mut self) -> PanelResult<Option<u32>> {
        if self.record.running.is_some() {
            self.stop().await?;
        }
        kill_locking_process(&self.install_root, &self.descriptor.name, StopPolicy::default()).await
    }
}
