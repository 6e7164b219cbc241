// ─── Module Registry ───
// Static module descriptors, their env.properties files and the
// per-module controller the front-end talks to.

pub mod controller;
pub mod descriptor;
pub mod properties;

pub use controller::{ModuleController, ModuleEvent, ModuleRecord, Observer};
pub use descriptor::{ModuleDescriptor, ModuleOverride};
pub use properties::{
    load_module_properties, load_version_properties, merged_pairs, required_java_major,
    EnvProperties, ENV_PROPERTIES,
};
