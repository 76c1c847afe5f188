//! HTTP transport with an on-disk, time-to-live download cache.
//!
//! Each URL is stored as `cache_dir/<sha256(url)>` with a JSON sidecar
//! (`<hash>.json`) recording when it was fetched and the validators the
//! server returned. Entries younger than `max_stale` are served from disk;
//! older ones are revalidated with `If-None-Match` / `If-Modified-Since`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use p2index_shared::{FetchConfig, P2IndexError, Result};
use reqwest::header::{ETAG, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

const USER_AGENT: &str = concat!("p2index/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Whether the transport wrote new content for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Fresh bytes were written to `path`.
    Updated,
    /// The cached copy was reused.
    Unmodified,
}

/// A local file holding the content of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub state: DownloadState,
}

/// Raw downloads. Implementations must be shareable across tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Download>;
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
}

/// [`Transport`] over `reqwest` with a TTL cache and bounded concurrency.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    cache_dir: PathBuf,
    max_stale: Duration,
    permits: Arc<Semaphore>,
}

impl HttpTransport {
    pub fn new(cache_dir: impl Into<PathBuf>, config: &FetchConfig) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|e| P2IndexError::io(&cache_dir, e))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| P2IndexError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            cache_dir,
            max_stale: config.max_stale,
            permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the content of `url` is cached.
    pub fn cache_path(&self, url: &Url) -> PathBuf {
        self.cache_dir.join(url_hash(url))
    }

    fn sidecar_path(&self, url: &Url) -> PathBuf {
        self.cache_dir.join(format!("{}.json", url_hash(url)))
    }

    async fn read_entry(&self, url: &Url) -> Option<CacheEntry> {
        let raw = tokio::fs::read(self.sidecar_path(url)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    async fn write_entry(&self, url: &Url, entry: &CacheEntry) -> Result<()> {
        let path = self.sidecar_path(url);
        let json = serde_json::to_vec(entry)
            .map_err(|e| P2IndexError::Storage(format!("cache entry for {url}: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| P2IndexError::io(path, e))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let age = Utc::now().signed_duration_since(entry.fetched_at);
        age.to_std().is_ok_and(|age| age < self.max_stale)
    }

    /// Local `file:` URLs are copied into the cache so later cleanup never
    /// touches the original.
    async fn fetch_local(&self, url: &Url) -> Result<Download> {
        let source = url
            .to_file_path()
            .map_err(|()| P2IndexError::validation(format!("not a local path: {url}")))?;
        let target = self.cache_path(url);
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| P2IndexError::Network(format!("{url}: {e}")))?;
        Ok(Download {
            path: target,
            state: DownloadState::Updated,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Download> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| P2IndexError::Network(format!("transport closed: {e}")))?;

        if url.scheme() == "file" {
            return self.fetch_local(url).await;
        }

        let path = self.cache_path(url);
        let cached = match tokio::fs::try_exists(&path).await {
            Ok(true) => self.read_entry(url).await,
            _ => None,
        };

        if let Some(entry) = &cached {
            if self.is_fresh(entry) {
                debug!("cache hit");
                return Ok(Download {
                    path,
                    state: DownloadState::Unmodified,
                });
            }
        }

        let mut request = self.client.get(url.clone());
        if let Some(entry) = &cached {
            if let Some(etag) = &entry.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &entry.last_modified {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| P2IndexError::Network(format!("{url}: {e}")))?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            if let Some(mut entry) = cached {
                debug!("revalidated");
                entry.fetched_at = Utc::now();
                self.write_entry(url, &entry).await?;
                return Ok(Download {
                    path,
                    state: DownloadState::Unmodified,
                });
            }
        }
        if !status.is_success() {
            return Err(P2IndexError::Network(format!("{url}: HTTP {status}")));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let entry = CacheEntry {
            url: url.to_string(),
            fetched_at: Utc::now(),
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        };

        // Stream to a unique partial file, then rename over the cache entry.
        let partial = self.cache_dir.join(format!("{}.{}.part", url_hash(url), Uuid::now_v7()));
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| P2IndexError::io(&partial, e))?;
        let streamed: Result<u64> = async {
            let mut written = 0u64;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| P2IndexError::Network(format!("{url}: {e}")))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| P2IndexError::io(&partial, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| P2IndexError::io(&partial, e))?;
            Ok(written)
        }
        .await;
        drop(file);

        let written = match streamed {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| P2IndexError::io(&path, e))?;
        self.write_entry(url, &entry).await?;

        debug!(bytes = written, "downloaded");
        Ok(Download {
            path,
            state: DownloadState::Updated,
        })
    }
}

fn url_hash(url: &Url) -> String {
    hex::encode(Sha256::digest(url.as_str().as_bytes()))
}
