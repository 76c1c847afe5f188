//! Artifact descriptors as delivered by a metadata reader.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::version::Version;

/// Property key carrying a product's serialized requirement list.
pub const PRODUCT_REQUIRES_PROPERTY: &str = "_product.requires";

/// Prefix of product properties that are internal to the metadata reader.
pub const INTERNAL_PROPERTY_PREFIX: &str = "_product.";

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

/// The three shapes of installable unit a repository describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A deployable module with downloadable content.
    Bundle,
    /// A grouping unit parsed from its own `feature.xml`.
    Feature,
    /// A metadata-only grouping unit.
    Product,
}

impl ArtifactKind {
    /// The `type` attribute value used on identity capabilities.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Bundle => "osgi.bundle",
            Self::Feature => "org.eclipse.update.feature",
            Self::Product => "org.eclipse.equinox.p2.type.product",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bundle => "bundle",
            Self::Feature => "feature",
            Self::Product => "product",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ArtifactDescriptor
// ---------------------------------------------------------------------------

/// One unit as described by the remote repository. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    /// Stable unit id (bundle symbolic name, feature id, product id).
    pub id: String,
    pub version: Version,
    /// Download location; always `None` for products.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Url>,
    /// Declared MD5 of the content, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Declared content length in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Free-form properties (product metadata, serialized requirements).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl ArtifactDescriptor {
    /// A downloadable bundle or feature.
    pub fn remote(kind: ArtifactKind, id: impl Into<String>, version: Version, location: Url) -> Self {
        Self {
            kind,
            id: id.into(),
            version,
            location: Some(location),
            checksum: None,
            size: None,
            properties: BTreeMap::new(),
        }
    }

    /// A metadata-only product.
    pub fn product(
        id: impl Into<String>,
        version: Version,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind: ArtifactKind::Product,
            id: id.into(),
            version,
            location: None,
            checksum: None,
            size: None,
            properties,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Deduplication key for this descriptor.
    pub fn identity(&self) -> ArtifactIdentity {
        if let Some(checksum) = self.checksum.as_deref() {
            return ArtifactIdentity::Content {
                id: self.id.clone(),
                version: self.version.clone(),
                checksum: checksum.trim().to_ascii_lowercase(),
            };
        }
        match &self.location {
            Some(location) => ArtifactIdentity::Location(location.clone()),
            None => ArtifactIdentity::Unit {
                id: self.id.clone(),
                version: self.version.clone(),
            },
        }
    }

    /// Short human-readable label for logs and reports.
    pub fn label(&self) -> String {
        match &self.location {
            Some(location) => location.to_string(),
            None => format!("{} {}:{}", self.kind, self.id, self.version),
        }
    }
}

// ---------------------------------------------------------------------------
// ArtifactIdentity
// ---------------------------------------------------------------------------

/// Identity used to avoid fetching byte-identical content twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactIdentity {
    /// Declared checksum present: id, version and normalized checksum.
    Content {
        id: String,
        version: Version,
        checksum: String,
    },
    /// No checksum: the download location stands in for the content.
    Location(Url),
    /// Neither checksum nor location (products).
    Unit { id: String, version: Version },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn identity_prefers_checksum() {
        let a = ArtifactDescriptor::remote(
            ArtifactKind::Bundle,
            "org.example.a",
            Version::new(1, 0, 0),
            url("https://mirror-1.example.com/plugins/a.jar"),
        )
        .with_checksum(" ABCDEF ");
        let b = ArtifactDescriptor::remote(
            ArtifactKind::Bundle,
            "org.example.a",
            Version::new(1, 0, 0),
            url("https://mirror-2.example.com/plugins/a.jar"),
        )
        .with_checksum("abcdef");
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_falls_back_to_location() {
        let a = ArtifactDescriptor::remote(
            ArtifactKind::Bundle,
            "org.example.a",
            Version::new(1, 0, 0),
            url("https://mirror-1.example.com/plugins/a.jar"),
        );
        let b = ArtifactDescriptor {
            location: Some(url("https://mirror-2.example.com/plugins/a.jar")),
            ..a.clone()
        };
        assert_ne!(a.identity(), b.identity());
        assert!(matches!(a.identity(), ArtifactIdentity::Location(_)));
    }

    #[test]
    fn product_identity_is_unit() {
        let p = ArtifactDescriptor::product("org.example.ide", Version::new(4, 38, 0), BTreeMap::new());
        assert!(matches!(p.identity(), ArtifactIdentity::Unit { .. }));
        assert_eq!(p.label(), "product org.example.ide:4.38.0");
    }

    #[test]
    fn descriptor_json_shape() {
        let json = r#"{
            "kind": "feature",
            "id": "org.example.feature",
            "version": "1.0.0.v2025",
            "location": "https://example.com/features/org.example.feature_1.0.0.v2025.jar",
            "checksum": "0123456789abcdef0123456789abcdef",
            "size": 2048
        }"#;
        let d: ArtifactDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.kind, ArtifactKind::Feature);
        assert_eq!(d.version.qualifier, "v2025");
        assert_eq!(d.size, Some(2048));
        assert!(d.properties.is_empty());
    }
}
