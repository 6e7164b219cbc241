use std::path::{Path, PathBuf};
use thiserror::Error;

/// Central error type for the control panel core.
/// Every module returns `Result<T, PanelError>`.
#[derive(Debug, Error)]
pub enum PanelError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path:?} is locked by another process; stop the old version first")]
    FileLocked {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("No downloadable asset found for {version} (tried {tried:?})")]
    AssetNotFound { version: String, tried: Vec<String> },

    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha256Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Parse ───────────────────────────────────────────
    #[error("Invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("Invalid version metadata '{input}': {reason}")]
    InvalidMetadata { input: String, reason: String },

    #[error("Malformed archive {path:?}: {reason}")]
    MalformedArchive { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Cancellation ────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    // ── State ───────────────────────────────────────────
    #[error("Module is already running (PID {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Port {port} is already in use")]
    PortBusy { port: u16 },

    #[error("Artifact missing: {0:?}")]
    ArtifactMissing(PathBuf),

    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("No free version name for {base} after {attempts} attempts")]
    NoFreeVersionName { base: String, attempts: u32 },

    #[error("Version {0} is not installed")]
    VersionNotInstalled(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // ── Startup ─────────────────────────────────────────
    #[error("Startup failed: process exited with {status}")]
    StartupFailed { status: String },

    #[error("Startup timed out after {seconds}s waiting for port {port}")]
    StartupTimeout { port: u16, seconds: u64 },

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by callers instead of message matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Parse,
    Io,
    Cancelled,
    State,
    Startup,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::Io => "io",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::State => "state",
            ErrorKind::Startup => "startup",
            ErrorKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Convenience alias used throughout the crate.
pub type PanelResult<T> = Result<T, PanelError>;

impl PanelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PanelError::Io { .. } | PanelError::FileLocked { .. } => ErrorKind::Io,
            PanelError::Http(_)
            | PanelError::DownloadFailed { .. }
            | PanelError::Timeout { .. }
            | PanelError::AssetNotFound { .. }
            | PanelError::Sha256Mismatch { .. } => ErrorKind::Network,
            PanelError::InvalidVersion { .. }
            | PanelError::InvalidMetadata { .. }
            | PanelError::MalformedArchive { .. }
            | PanelError::Json(_)
            | PanelError::Zip(_) => ErrorKind::Parse,
            PanelError::Cancelled => ErrorKind::Cancelled,
            PanelError::AlreadyRunning { .. }
            | PanelError::PortBusy { .. }
            | PanelError::ArtifactMissing(_)
            | PanelError::RuntimeUnavailable(_)
            | PanelError::NoFreeVersionName { .. }
            | PanelError::VersionNotInstalled(_)
            | PanelError::InvalidTransition { .. } => ErrorKind::State,
            PanelError::StartupFailed { .. } | PanelError::StartupTimeout { .. } => {
                ErrorKind::Startup
            }
            PanelError::Other(_) => ErrorKind::Other,
        }
    }

    /// Exit code of the command-line front-end for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PanelError::AlreadyRunning { .. } => 2,
            PanelError::PortBusy { .. } => 3,
            PanelError::ArtifactMissing(_) => 4,
            PanelError::Cancelled => 5,
            _ => 1,
        }
    }

    /// Wrap an I/O error, promoting sharing/lock violations to `FileLocked`.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if is_lock_violation(&source) {
            PanelError::FileLocked { path, source }
        } else {
            PanelError::Io { path, source }
        }
    }

    /// Reinterpret a permission failure as a file held open by a running
    /// version. Only meaningful while copying that version's data.
    pub fn denied_as_locked(self) -> Self {
        match self {
            PanelError::Io { path, source }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                PanelError::FileLocked { path, source }
            }
            other => other,
        }
    }
}

impl From<std::io::Error> for PanelError {
    fn from(source: std::io::Error) -> Self {
        PanelError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

/// Windows reports ERROR_SHARING_VIOLATION (32) and ERROR_LOCK_VIOLATION (33)
/// when a running program holds a file open.
pub fn is_lock_violation(err: &std::io::Error) -> bool {
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}
