pub mod cli;
mod commands;
pub mod core;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::platform::{ensure_dir, PanelPaths};

pub const PANEL_LOG_FILE: &str = "panel.log";

/// Initialise structured logging: stderr plus a daily file under the shared
/// root's `logs/`. Keep the guard alive for the life of the process.
pub fn init_logging(paths: &PanelPaths) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,control_panel_lib=debug"));
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let logs_dir = paths.logs_dir();
    let (file_layer, guard) = match ensure_dir(&logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&logs_dir, PANEL_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .init();

    tracing::info!("Control panel {} starting", env!("CARGO_PKG_VERSION"));
    if guard.is_none() {
        tracing::warn!("File logging disabled, cannot create {:?}", logs_dir);
    }
    guard
}
