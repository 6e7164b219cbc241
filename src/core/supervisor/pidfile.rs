use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::error::{PanelError, PanelResult};
use crate::core::platform::process::is_process_alive;

/// One-line decimal PID file in a module's install root. It is the
/// advisory lock between panel instances.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

/// What a PID file currently says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidState {
    Absent,
    /// Missing, unparsable, zero, or naming a dead process.
    Stale,
    Live(u32),
}

impl PidFile {
    pub fn for_module(install_root: &Path, module: &str) -> Self {
        Self {
            path: install_root.join(format!("{module}.pid")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded PID; garbage and `0` read as `None`.
    pub fn read(&self) -> PanelResult<Option<u32>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PanelError::io(&self.path, source)),
        };
        Ok(parse_pid(&raw))
    }

    pub fn state(&self) -> PanelResult<PidState> {
        if !self.path.exists() {
            return Ok(PidState::Absent);
        }
        Ok(match self.read()? {
            Some(pid) if is_process_alive(pid) => PidState::Live(pid),
            _ => PidState::Stale,
        })
    }

    /// The live PID this file names, if any.
    pub fn live_pid(&self) -> PanelResult<Option<u32>> {
        Ok(match self.state()? {
            PidState::Live(pid) => Some(pid),
            _ => None,
        })
    }

    /// Refuse when another process holds the claim; clear a stale file.
    /// The file is never touched while it names a live process.
    pub fn claim(&self) -> PanelResult<()> {
        match self.state()? {
            PidState::Live(pid) => Err(PanelError::AlreadyRunning { pid }),
            PidState::Stale => {
                info!("Removing stale PID file {:?}", self.path);
                self.remove()
            }
            PidState::Absent => Ok(()),
        }
    }

    /// Write `pid` atomically (temp file then rename).
    pub fn write(&self, pid: u32) -> PanelResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PanelError::io(parent, source))?;
        }
        let tmp = self.path.with_extension("pid.tmp");
        std::fs::write(&tmp, pid.to_string()).map_err(|source| PanelError::io(&tmp, source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| PanelError::io(&self.path, source))?;
        debug!("Recorded PID {} in {:?}", pid, self.path);
        Ok(())
    }

    pub fn remove(&self) -> PanelResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PanelError::io(&self.path, source)),
        }
    }

    /// Remove only if the file still names `pid`; another instance may have
    /// claimed it since.
    pub fn remove_if_owned(&self, pid: u32) -> PanelResult<()> {
        match self.read()? {
            Some(recorded) if recorded == pid => self.remove(),
            Some(recorded) => {
                warn!(
                    "PID file {:?} now names {}, not {}; leaving it",
                    self.path, recorded, pid
                );
                Ok(())
            }
            None => self.remove(),
        }
    }
}

/// Optional auxiliary lock file some modules keep next to the PID file.
pub fn lock_file_path(install_root: &Path, module: &str) -> PathBuf {
    install_root.join(format!("{module}.lock"))
}

fn parse_pid(raw: &str) -> Option<u32> {
    match raw.trim().parse::<u32>() {
        Ok(0) | Err(_) => None,
        Ok(pid) => Some(pid),
    }
}
