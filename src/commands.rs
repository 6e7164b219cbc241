//! Handlers behind the command-line front-end. Each one builds the panel
//! state, runs one operation and prints its outcome.

use std::sync::Arc;

use dialoguer::{Confirm, Input};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::assets::{help_page, help_pages};
use crate::core::downloader::{DownloadProgress, ProgressSink};
use crate::core::error::{PanelError, PanelResult};
use crate::core::install::{AcceptProposed, CollisionPrompt};
use crate::core::module::{ModuleEvent, ModuleController};
use crate::core::platform::{ensure_dir, open_path, open_url, PanelPaths};
use crate::core::state::PanelState;
use crate::core::supervisor::{PidFile, SupervisorEvent};
use crate::core::version::Version;

/// Asks on the terminal which build metadata a colliding install gets.
struct TerminalPrompt;

impl CollisionPrompt for TerminalPrompt {
    fn confirm_metadata(&self, base: &Version, proposed: &str) -> Option<String> {
        Input::<String>::new()
            .with_prompt(format!("{base} is already installed; build metadata for the new copy"))
            .default(proposed.to_string())
            .interact_text()
            .ok()
    }
}

fn collision_prompt(yes: bool) -> Box<dyn CollisionPrompt> {
    if yes {
        Box::new(AcceptProposed)
    } else {
        Box::new(TerminalPrompt)
    }
}

fn progress_printer() -> ProgressSink {
    Arc::new(|progress: DownloadProgress| match progress.total_bytes {
        Some(total) if total > 0 => eprint!(
            "\r{} {:>3}%",
            progress.file_name,
            progress.bytes_downloaded * 100 / total
        ),
        _ => eprint!("\r{} {} KiB", progress.file_name, progress.bytes_downloaded / 1024),
    })
}

/// Token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn parse_optional(version: Option<&str>) -> PanelResult<Option<Version>> {
    version.map(Version::parse).transpose()
}

fn confirm(prompt: String, yes: bool) -> PanelResult<()> {
    if yes {
        return Ok(());
    }
    let accepted = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| PanelError::Other(format!("Prompt failed: {e}")))?;
    if accepted {
        Ok(())
    } else {
        Err(PanelError::Cancelled)
    }
}

fn status_of(controller: &ModuleController) -> PanelResult<String> {
    let pid_file = PidFile::for_module(controller.install_root(), controller.name());
    Ok(match pid_file.live_pid()? {
        Some(pid) => format!("running (pid {pid})"),
        None => "stopped".into(),
    })
}

// ── Listing ─────────────────────────────────────────

pub fn list_modules(paths: PanelPaths) -> PanelResult<()> {
    let state = PanelState::new(paths)?;
    for controller in state.controllers() {
        let descriptor = controller.descriptor();
        let latest = controller
            .record()
            .latest_installed
            .as_ref()
            .map(|i| i.version.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<16} {:<20} port {:<6} latest {:<20} {}",
            descriptor.name,
            descriptor.display_name,
            descriptor.default_port,
            latest,
            status_of(controller)?
        );
    }
    Ok(())
}

pub async fn list_releases(paths: PanelPaths, module: &str, pre: bool) -> PanelResult<()> {
    let mut state = PanelState::new(paths)?;
    let include = pre || state.settings.include_prereleases;
    let controller = state.controller_mut(module)?;
    let releases = controller.refresh_releases(include).await;
    if controller.record().releases.is_offline() {
        println!("Release catalog for {module} is unreachable");
        return Ok(());
    }
    for release in releases {
        let marker = if release.version.is_prerelease() {
            " (pre-release)"
        } else {
            ""
        };
        println!("{:<20} {}{}", release.version, release.tag, marker);
    }
    Ok(())
}

pub fn list_installed(paths: PanelPaths, module: &str) -> PanelResult<()> {
    let mut state = PanelState::new(paths)?;
    let installed = state.controller_mut(module)?.refresh_installed()?;
    if installed.is_empty() {
        println!("No {module} versions installed");
    }
    for version in installed {
        println!("{:<24} {}", version.version, version.path.display());
    }
    Ok(())
}

// ── Installs ────────────────────────────────────────

pub async fn install(paths: PanelPaths, module: &str, version: Option<&str>, yes: bool) -> PanelResult<()> {
    let version = parse_optional(version)?;
    let mut state = PanelState::new(paths)?;
    let controller = state.controller_mut(module)?;
    controller.refresh_releases(true).await;

    let cancel = cancel_on_ctrl_c();
    let prompt = collision_prompt(yes);
    let result = controller
        .install(version.as_ref(), prompt.as_ref(), Some(progress_printer()), &cancel)
        .await;
    eprintln!();
    let installed = result?;
    println!("Installed {module} {} at {}", installed.version, installed.path.display());
    Ok(())
}

pub async fn upgrade(
    paths: PanelPaths,
    module: &str,
    from: &str,
    to: Option<&str>,
    yes: bool,
) -> PanelResult<()> {
    let from = Version::parse(from)?;
    let to = parse_optional(to)?;
    let mut state = PanelState::new(paths)?;
    let controller = state.controller_mut(module)?;
    controller.refresh_releases(true).await;

    let cancel = cancel_on_ctrl_c();
    let prompt = collision_prompt(yes);
    let result = controller
        .upgrade(&from, to.as_ref(), prompt.as_ref(), Some(progress_printer()), &cancel)
        .await;
    eprintln!();
    let report = result?;

    println!("Upgraded {module} {from} -> {}", report.installed.version);
    if !report.preserved.is_empty() {
        println!("Copied: {}", report.preserved.join(", "));
    }
    let rec = &report.reconciliation;
    println!(
        "local/: {} modified, {} added, {} deleted, {} conflicts",
        rec.modified.len(),
        rec.added.len(),
        rec.deleted.len(),
        rec.conflicts.len()
    );
    for conflict in &rec.conflicts {
        println!("  kept your copy of {conflict}");
    }
    println!("Details in {}", report.log_path.display());
    Ok(())
}

pub fn rename(paths: PanelPaths, module: &str, version: &str, metadata: &str) -> PanelResult<()> {
    let version = Version::parse(version)?;
    let mut state = PanelState::new(paths)?;
    let renamed = state.controller_mut(module)?.rename(&version, metadata)?;
    println!("Renamed {version} to {}", renamed.version);
    Ok(())
}

pub fn duplicate(paths: PanelPaths, module: &str, version: &str, metadata: &str) -> PanelResult<()> {
    let version = Version::parse(version)?;
    let mut state = PanelState::new(paths)?;
    let copy = state.controller_mut(module)?.duplicate(&version, metadata)?;
    println!("Copied {version} to {}", copy.version);
    Ok(())
}

pub fn remove(paths: PanelPaths, module: &str, version: &str, yes: bool) -> PanelResult<()> {
    let version = Version::parse(version)?;
    let mut state = PanelState::new(paths)?;
    let controller = state.controller_mut(module)?;
    confirm(format!("Delete {module} {version} and all its data?"), yes)?;
    controller.remove(&version)?;
    println!("Removed {module} {version}");
    Ok(())
}

// ── Lifecycle ───────────────────────────────────────

pub async fn start(
    paths: PanelPaths,
    module: &str,
    version: Option<&str>,
    detach: bool,
    open: bool,
) -> PanelResult<()> {
    let version = parse_optional(version)?;
    let mut state = PanelState::new(paths)?;
    let runtimes = state.runtimes(Some(progress_printer()));
    let controller = state.controller_mut(module)?;
    controller.subscribe(Arc::new(|event: &ModuleEvent| {
        if let ModuleEvent::Supervisor(SupervisorEvent::StartupLog { text, .. }) = event {
            eprintln!("{text}");
        }
    }));

    let cancel = cancel_on_ctrl_c();
    let started = controller.start(version.as_ref(), &runtimes, &cancel).await?;
    println!(
        "{module} ready at {} (pid {}), output in {}",
        started.url,
        started.pid,
        started.log_path.display()
    );
    if open {
        if let Err(err) = open_url(&started.url) {
            warn!("Could not open browser: {}", err);
        }
    }
    if detach {
        return Ok(());
    }

    println!("Press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                controller.stop().await?;
                println!("{module} stopped");
                break;
            }
            event = controller.next_event() => match event {
                Some(ModuleEvent::Supervisor(SupervisorEvent::Exited { classification, .. })) => {
                    println!("{module} exited: {classification:?}");
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
    }
    Ok(())
}

pub async fn kill_lock(paths: PanelPaths, module: &str) -> PanelResult<()> {
    let mut state = PanelState::new(paths)?;
    match state.controller_mut(module)?.kill_lock().await? {
        Some(pid) => println!("Stopped {module} (pid {pid})"),
        None => println!("{module} is not running"),
    }
    Ok(())
}

// ── Runtimes ────────────────────────────────────────

pub fn java_list(paths: PanelPaths) -> PanelResult<()> {
    let state = PanelState::new(paths)?;
    let installs = state.jvm_provisioner().installations();
    if installs.is_empty() {
        println!("No Java runtimes installed");
    }
    for install in installs {
        println!("{:<4} {:<16} {}", install.major, install.version, install.root.display());
    }
    Ok(())
}

pub async fn java_ensure(paths: PanelPaths, major: u32) -> PanelResult<()> {
    let state = PanelState::new(paths)?;
    let cancel = cancel_on_ctrl_c();
    let result = state
        .jvm_provisioner()
        .ensure(major, Some(progress_printer()), &cancel)
        .await;
    eprintln!();
    println!("Java {major}+ at {}", result?.display());
    Ok(())
}

pub fn java_prune(paths: PanelPaths) -> PanelResult<()> {
    let state = PanelState::new(paths)?;
    let removed = state.prune_java()?;
    if removed.is_empty() {
        println!("Nothing to prune");
    }
    for root in removed {
        println!("Removed {}", root.display());
    }
    Ok(())
}

pub async fn media_ensure(paths: PanelPaths) -> PanelResult<()> {
    let state = PanelState::new(paths)?;
    let cancel = cancel_on_ctrl_c();
    let result = state
        .media_provisioner()
        .ensure(Some(progress_printer()), &cancel)
        .await;
    eprintln!();
    let media = result?;
    println!("Media toolchain at {}", media.bin.display());
    if let Some(lib) = media.lib_dir {
        println!("Libraries at {}", lib.display());
    }
    Ok(())
}

// ── Misc ────────────────────────────────────────────

pub fn open_folder(paths: PanelPaths, module: &str) -> PanelResult<()> {
    let state = PanelState::new(paths)?;
    let root = state.controller(module)?.install_root().to_path_buf();
    ensure_dir(&root)?;
    open_path(&root)
}

pub fn help(page: Option<&str>) -> PanelResult<()> {
    let name = page.unwrap_or("overview");
    let bytes = help_page(name).ok_or_else(|| {
        PanelError::Other(format!(
            "No help page '{name}'. Pages: {}",
            help_pages().collect::<Vec<_>>().join(", ")
        ))
    })?;
    println!("{}", String::from_utf8_lossy(bytes));
    if page.is_none() {
        println!("More pages: {}", help_pages().collect::<Vec<_>>().join(", "));
    }
    Ok(())
}
