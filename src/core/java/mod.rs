// ─── Runtime Provisioner ───
// Shared JVM and media toolchain, found locally or downloaded on demand.

pub mod media;
pub mod runtime;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::downloader::ProgressSink;
use crate::core::error::PanelResult;

pub use media::{default_media_downloads, MediaDownload, MediaInstall, MediaProvisioner, MEDIA_BINARY};
pub use runtime::{
    java_binary_rel, parse_java_version, scan_installations, JvmInstallation, JvmProvisioner,
    ADOPTIUM_API_BASE,
};

/// What the supervisor asks of the provisioner before a launch.
#[async_trait]
pub trait RuntimeResolver: Send + Sync {
    async fn jvm(&self, min_major: u32, cancel: &CancellationToken) -> PanelResult<PathBuf>;
    async fn media(&self, cancel: &CancellationToken) -> PanelResult<MediaInstall>;
}

/// The real resolver: both provisioners over the shared root.
#[derive(Clone)]
pub struct SharedRuntimes {
    pub jvm: JvmProvisioner,
    pub media: MediaProvisioner,
    pub progress: Option<ProgressSink>,
}

#[async_trait]
impl RuntimeResolver for SharedRuntimes {
    async fn jvm(&self, min_major: u32, cancel: &CancellationToken) -> PanelResult<PathBuf> {
        self.jvm.ensure(min_major, self.progress.clone(), cancel).await
    }

    async fn media(&self, cancel: &CancellationToken) -> PanelResult<MediaInstall> {
        self.media.ensure(self.progress.clone(), cancel).await
    }
}
