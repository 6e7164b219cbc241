use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Identifies the panel to every child, whatever the module.
pub const LAUNCHER_ID_ENV: &str = "CONTROL_PANEL_LAUNCHER";
pub const LAUNCHER_ID: &str = concat!("control-panel/", env!("CARGO_PKG_VERSION"));
pub const MODULE_ENV: &str = "CONTROL_PANEL_MODULE";
pub const PORT_ENV: &str = "PORT";
pub const JAVA_HOME_ENV: &str = "JAVA_HOME";
pub const MEDIA_TOOLCHAIN_ENV: &str = "FFMPEG_PATH";

/// Variables handed to a child process. Inherited values need not be UTF-8.
pub type ChildEnv = BTreeMap<OsString, OsString>;

/// Child environment: the parent's variables, the panel's own, the module
/// selectors, then `env.properties` pairs in file order (later wins).
pub fn assemble_environment<I>(
    inherited: I,
    module: &str,
    port: u16,
    selectors: &[(String, String)],
    properties: &[(String, String)],
) -> ChildEnv
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: ChildEnv = inherited.into_iter().collect();
    env.insert(LAUNCHER_ID_ENV.into(), LAUNCHER_ID.into());
    env.insert(MODULE_ENV.into(), module.into());
    env.insert(PORT_ENV.into(), port.to_string().into());
    for (key, value) in selectors.iter().chain(properties) {
        env.insert(key.into(), value.into());
    }
    env
}

/// Put `dir` in front of a search-path variable such as `LD_LIBRARY_PATH`.
pub fn prepend_search_path(env: &mut ChildEnv, var: &str, dir: &Path) {
    let separator = if cfg!(target_os = "windows") { ";" } else { ":" };
    let mut merged = dir.as_os_str().to_owned();
    if let Some(existing) = env.get(OsStr::new(var)).filter(|value| !value.is_empty()) {
        merged.push(separator);
        merged.push(existing);
    }
    env.insert(var.into(), merged);
}

/// Loader search variable for shared libraries on this OS.
pub fn library_path_var() -> &'static str {
    if cfg!(target_os = "windows") {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}
