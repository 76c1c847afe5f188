//! Built-in reader for JSON artifact listings and `.target` files.
//!
//! A repository publishes `artifacts.json` at its root:
//!
//! ```json
//! { "artifacts": [ { "kind": "bundle", "id": "org.example.core",
//!                    "version": "1.0.0", "location": "plugins/org.example.core_1.0.0.jar",
//!                    "checksum": "…md5…", "size": 1024 } ] }
//! ```
//!
//! Relative locations resolve against the listing URL. A `.target` file
//! names repositories via `<repository location="…"/>`; their listings are
//! read in order and concatenated.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use p2index_shared::{ArtifactDescriptor, ArtifactKind, P2IndexError, Result, Version};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::{MetadataReader, MetadataSource};

/// File name of the listing under a repository root.
pub const LISTING_FILE: &str = "artifacts.json";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const USER_AGENT: &str = concat!("p2index/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    artifacts: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    kind: ArtifactKind,
    id: String,
    version: Version,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    checksum: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// Reads listings over HTTP(S) or from `file:` URLs.
#[derive(Debug, Clone)]
pub struct ListingReader {
    client: Client,
}

impl ListingReader {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| P2IndexError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn read_repository(&self, root: &Url) -> Result<Vec<ArtifactDescriptor>> {
        let listing_url = listing_url(root)?;
        let body = self.fetch_text(&listing_url).await?;
        let listing: Listing = serde_json::from_str(&body)
            .map_err(|e| P2IndexError::parse(format!("{listing_url}: {e}")))?;

        let mut descriptors = Vec::with_capacity(listing.artifacts.len());
        for entry in listing.artifacts {
            descriptors.push(into_descriptor(entry, &listing_url)?);
        }
        debug!(url = %listing_url, count = descriptors.len(), "listing read");
        Ok(descriptors)
    }

    async fn fetch_text(&self, url: &Url) -> Result<String> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|()| P2IndexError::validation(format!("not a local path: {url}")))?;
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| P2IndexError::io(path, e));
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| P2IndexError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(P2IndexError::Network(format!("{url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| P2IndexError::Network(format!("{url}: failed to read body: {e}")))
    }
}

#[async_trait]
impl MetadataReader for ListingReader {
    #[instrument(skip_all, fields(source = %source))]
    async fn read(&self, source: &MetadataSource) -> Result<Vec<ArtifactDescriptor>> {
        match source {
            MetadataSource::Repository(url) => self.read_repository(url).await,
            MetadataSource::TargetPlatform(url) => {
                let xml = self.fetch_text(url).await?;
                let repositories = target_repositories(&xml, url)?;
                info!(repositories = repositories.len(), "reading target platform");

                let mut all = Vec::new();
                for repository in &repositories {
                    all.extend(self.read_repository(repository).await?);
                }
                Ok(all)
            }
        }
    }
}

fn listing_url(root: &Url) -> Result<Url> {
    if root.path().ends_with(".json") {
        return Ok(root.clone());
    }
    let mut base = root.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base.join(LISTING_FILE)
        .map_err(|e| P2IndexError::validation(format!("bad repository url {root}: {e}")))
}

fn into_descriptor(entry: ListingEntry, base: &Url) -> Result<ArtifactDescriptor> {
    let location = match (entry.kind, entry.location) {
        (ArtifactKind::Product, _) => None,
        (_, Some(location)) => Some(base.join(&location).map_err(|e| {
            P2IndexError::parse(format!("{}: bad location '{location}': {e}", entry.id))
        })?),
        (kind, None) => {
            return Err(P2IndexError::parse(format!(
                "{kind} {}:{} has no location",
                entry.id, entry.version
            )));
        }
    };
    Ok(ArtifactDescriptor {
        kind: entry.kind,
        id: entry.id,
        version: entry.version,
        location,
        checksum: entry.checksum,
        size: entry.size,
        properties: entry.properties,
    })
}

/// Repository locations named by a target definition, resolved against it.
pub fn target_repositories(xml: &str, target: &Url) -> Result<Vec<Url>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| P2IndexError::parse(format!("{target}: invalid target definition: {e}")))?;

    let mut repositories = Vec::new();
    for node in doc.descendants().filter(|n| n.has_tag_name("repository")) {
        let Some(location) = node.attribute("location") else {
            continue;
        };
        let url = target
            .join(location.trim())
            .map_err(|e| P2IndexError::parse(format!("{target}: bad location '{location}': {e}")))?;
        if !repositories.contains(&url) {
            repositories.push(url);
        }
    }

    if repositories.is_empty() {
        return Err(P2IndexError::parse(format!("{target} names no repositories")));
    }
    Ok(repositories)
}
