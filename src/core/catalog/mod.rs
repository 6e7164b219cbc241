// ─── Release Catalog ───
// Available releases per module, fetched from JSON endpoints and held
// only in memory.

pub mod client;
pub mod release;

pub use client::{fetch_catalog, parse_catalog, ReleaseSource};
pub use release::{Release, ReleaseCatalog, STABLE_RELEASE_CAP};
