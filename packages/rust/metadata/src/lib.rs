//! Repository metadata: where artifact lists come from.
//!
//! A [`MetadataReader`] turns a [`MetadataSource`] into the ordered list of
//! [`ArtifactDescriptor`]s the index is built from. Sources whose path ends
//! in `.target` are target-platform definitions naming several repositories.

mod listing;
mod product;

use std::fmt;

use async_trait::async_trait;
use p2index_shared::{ArtifactDescriptor, P2IndexError, Result};
use url::Url;

pub use listing::{LISTING_FILE, ListingReader, target_repositories};
pub use product::{ProductRequirement, decode_product_requirements, encode_product_requirements};

const TARGET_SUFFIX: &str = ".target";

/// Where an index is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataSource {
    Repository(Url),
    TargetPlatform(Url),
}

impl MetadataSource {
    /// Classify a URL.
    pub fn new(url: Url) -> Self {
        if is_target_platform(&url) {
            Self::TargetPlatform(url)
        } else {
            Self::Repository(url)
        }
    }

    /// Accepts an absolute URL or a local path.
    pub fn from_location(location: &str) -> Result<Self> {
        if let Ok(url) = Url::parse(location) {
            // Single letters are Windows drive prefixes, not schemes.
            if url.scheme().len() > 1 {
                return Ok(Self::new(url));
            }
        }
        let path = std::path::absolute(location).map_err(|e| P2IndexError::io(location, e))?;
        let url = Url::from_file_path(&path).map_err(|()| {
            P2IndexError::validation(format!("cannot use '{location}' as a source"))
        })?;
        Ok(Self::new(url))
    }

    pub fn url(&self) -> &Url {
        match self {
            Self::Repository(url) | Self::TargetPlatform(url) => url,
        }
    }
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url().as_str())
    }
}

/// Whether the URL path (query and fragment excluded) ends in `.target`.
pub fn is_target_platform(url: &Url) -> bool {
    url.path().ends_with(TARGET_SUFFIX)
}

/// Supplies the artifact list for a source.
#[async_trait]
pub trait MetadataReader: Send + Sync {
    async fn read(&self, source: &MetadataSource) -> Result<Vec<ArtifactDescriptor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn target_detection_ignores_query_and_fragment() {
        assert!(is_target_platform(&url("https://example.com/p.target")));
        assert!(is_target_platform(&url("https://example.com/p.target?x=1#frag")));
        assert!(!is_target_platform(&url("https://example.com/p.target/")));
        assert!(!is_target_platform(&url("https://example.com/repo?f=p.target")));
    }

    #[test]
    fn from_location_accepts_urls_and_paths() {
        let repo = MetadataSource::from_location("https://download.example.com/releases/").unwrap();
        assert!(matches!(repo, MetadataSource::Repository(_)));

        let local = MetadataSource::from_location("platform.target").unwrap();
        assert!(matches!(local, MetadataSource::TargetPlatform(_)));
        assert_eq!(local.url().scheme(), "file");
    }
}
