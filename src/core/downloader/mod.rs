pub mod client;

pub use client::{
    sha256_bytes, sha256_file, sha256_file_blocking, DownloadProgress, Downloader, ProgressSink,
};
