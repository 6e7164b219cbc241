// ─── Control Panel Core ───
// Installation and supervision engine for the server module family.
//
// Architecture:
//   core/
//     platform/  : OS/arch tags, paths, archives, process control
//     version/   : Semver model, metadata, collision-free naming
//     catalog/   : Release lists fetched per module
//     downloader/: Streaming downloads with SHA-256 and progress
//     install/   : Fresh install, rename/duplicate, three-way upgrade
//     java/      : Shared JVM and media toolchain provisioning
//     supervisor/: PID lock, readiness probe, start/stop lifecycle
//     module/    : Descriptors, env.properties, per-module controller
//     state/     : Panel settings and the module controllers
//     assets/    : Embedded help pages

pub mod assets;
pub mod catalog;
pub mod downloader;
pub mod error;
pub mod http;
pub mod install;
pub mod java;
pub mod module;
pub mod platform;
pub mod state;
pub mod supervisor;
pub mod version;

#[cfg(test)]
pub mod test_support;
