use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::Client;

pub const APP_USER_AGENT: &str = concat!("ControlPanel/", env!("CARGO_PKG_VERSION"));

/// Catalog fetches give up after this long per endpoint.
pub const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .build()
}

/// Client for local readiness probes: short timeouts, never uses a proxy.
pub fn build_probe_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(APP_USER_AGENT)
        .no_proxy()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}
