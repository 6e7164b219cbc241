use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{PanelError, PanelResult};
use crate::core::http::CATALOG_TIMEOUT;
use crate::core::version::Version;

use super::release::{Release, ReleaseCatalog};

/// Where a module's releases are listed and downloaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReleaseSource {
    /// JSON endpoints returning an array of `{tag_name, name}` objects.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Asset URL template, see [`Release::asset_url`].
    #[serde(default)]
    pub asset_template: String,
}

/// One element of a catalog endpoint's JSON array. Everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl CatalogEntry {
    /// The machine-readable tag wins over the display name.
    fn identifier(&self) -> Option<&str> {
        [self.tag_name.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|value| !value.is_empty())
    }
}

/// Parse one endpoint's payload into releases, skipping unparsable tags.
pub fn parse_catalog(payload: &[u8], asset_template: &str) -> PanelResult<Vec<Release>> {
    let entries: Vec<CatalogEntry> = serde_json::from_slice(payload)?;
    let mut releases = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(tag) = entry.identifier() else {
            continue;
        };
        match Version::parse_tag(tag) {
            Ok(version) => releases.push(Release::new(version, tag, asset_template)),
            Err(err) => debug!("Skipping catalog entry '{}': {}", tag, err),
        }
    }
    Ok(releases)
}

async fn fetch_endpoint(client: &Client, url: &str) -> PanelResult<Vec<u8>> {
    let request = async {
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    };

    tokio::time::timeout(CATALOG_TIMEOUT, request)
        .await
        .map_err(|_| PanelError::Timeout {
            url: url.to_string(),
        })?
}

/// Fetch every endpoint of `source` and merge the results.
///
/// Network and parse failures are logged and swallowed; when no endpoint
/// answered, the returned catalog is flagged offline.
#[instrument(skip(client, source), fields(endpoints = source.endpoints.len()))]
pub async fn fetch_catalog(client: &Client, source: &ReleaseSource) -> ReleaseCatalog {
    let mut releases = Vec::new();
    let mut reached_any = false;

    for endpoint in &source.endpoints {
        match fetch_endpoint(client, endpoint).await {
            Ok(payload) => match parse_catalog(&payload, &source.asset_template) {
                Ok(parsed) => {
                    reached_any = true;
                    releases.extend(parsed);
                }
                Err(err) => warn!("Malformed catalog from {}: {}", endpoint, err),
            },
            Err(err) => warn!("Catalog endpoint {} unreachable: {}", endpoint, err),
        }
    }

    if !reached_any {
        info!("No catalog endpoint reachable, treating as offline");
        return ReleaseCatalog::offline();
    }

    let catalog = ReleaseCatalog::from_releases(releases);
    info!("Loaded {} releases", catalog.len());
    catalog
}
