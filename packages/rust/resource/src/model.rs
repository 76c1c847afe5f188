//! Capabilities, requirements and the per-artifact resource graph.

use std::collections::BTreeMap;
use std::fmt;

use p2index_shared::{ArtifactKind, Version};
use serde::{Deserialize, Serialize};

/// Well-known namespaces.
pub mod namespace {
    /// Identity of a unit: id, version, type.
    pub const IDENTITY: &str = "osgi.identity";
    /// Downloadable content: digest, url, size, mime.
    pub const CONTENT: &str = "osgi.content";
    /// p2 installable unit.
    pub const P2_IU: &str = "org.eclipse.equinox.p2.iu";
    /// Execution environment.
    pub const EXECUTION_ENVIRONMENT: &str = "osgi.ee";
    /// Exported Java packages.
    pub const WIRING_PACKAGE: &str = "osgi.wiring.package";
    /// A bundle as a `Require-Bundle` target.
    pub const WIRING_BUNDLE: &str = "osgi.wiring.bundle";
    /// A bundle as a fragment host.
    pub const WIRING_HOST: &str = "osgi.wiring.host";
}

pub const TYPE_ATTRIBUTE: &str = "type";
pub const VERSION_ATTRIBUTE: &str = "version";
pub const URL_ATTRIBUTE: &str = "url";
pub const SIZE_ATTRIBUTE: &str = "size";
pub const MIME_ATTRIBUTE: &str = "mime";
pub const BUNDLE_SYMBOLIC_NAME_ATTRIBUTE: &str = "bundle-symbolic-name";
pub const BUNDLE_VERSION_ATTRIBUTE: &str = "bundle-version";

pub const FILTER_DIRECTIVE: &str = "filter";
pub const RESOLUTION_DIRECTIVE: &str = "resolution";
pub const RESOLUTION_OPTIONAL: &str = "optional";

/// MIME type recorded on bundle and feature content capabilities.
pub const JAR_MIME: &str = "application/vnd.osgi.bundle";

// ---------------------------------------------------------------------------
// Attr
// ---------------------------------------------------------------------------

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Attr {
    String(String),
    Version(Version),
    Long(i64),
    List(Vec<String>),
}

impl Attr {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            Self::Version(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Version(v) => write!(f, "{v}"),
            Self::Long(n) => write!(f, "{n}"),
            Self::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Attr {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Version> for Attr {
    fn from(value: Version) -> Self {
        Self::Version(value)
    }
}

impl From<i64> for Attr {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<u64> for Attr {
    fn from(value: u64) -> Self {
        Self::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

// ---------------------------------------------------------------------------
// Capability / Requirement
// ---------------------------------------------------------------------------

/// A named, attributed fact a resource provides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attr>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub directives: BTreeMap<String, String>,
}

impl Capability {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            attributes: BTreeMap::new(),
            directives: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&Attr> {
        self.attributes.get(key)
    }

    /// The attribute named like the namespace (`osgi.identity=<id>` and friends).
    pub fn name(&self) -> Option<&str> {
        self.attr(&self.namespace).and_then(Attr::as_str)
    }
}

/// A named, filtered query a resource needs satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Requirement {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attr>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub directives: BTreeMap<String, String>,
}

impl Requirement {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            attributes: BTreeMap::new(),
            directives: BTreeMap::new(),
        }
    }

    /// Shorthand for a requirement carrying only a `filter` directive.
    pub fn filtered(namespace: impl Into<String>, filter: impl Into<String>) -> Self {
        Self::new(namespace).with_directive(FILTER_DIRECTIVE, filter)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.directives.insert(key.into(), value.into());
        self
    }

    /// Mark as `resolution:=optional`.
    pub fn optional(self) -> Self {
        self.with_directive(RESOLUTION_DIRECTIVE, RESOLUTION_OPTIONAL)
    }

    pub fn filter(&self) -> Option<&str> {
        self.directives.get(FILTER_DIRECTIVE).map(String::as_str)
    }

    pub fn is_optional(&self) -> bool {
        self.directives.get(RESOLUTION_DIRECTIVE).map(String::as_str) == Some(RESOLUTION_OPTIONAL)
    }
}

// ---------------------------------------------------------------------------
// ResourceGraph
// ---------------------------------------------------------------------------

/// Content location of a resource, read back from its content capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    /// SHA-256 of the content, hex encoded.
    pub digest: String,
    pub url: String,
    pub size: Option<i64>,
}

/// One artifact's complete set of capabilities and requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceGraph {
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

impl ResourceGraph {
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder::default()
    }

    pub fn capabilities_in<'a>(&'a self, ns: &'a str) -> impl Iterator<Item = &'a Capability> + 'a {
        self.capabilities.iter().filter(move |c| c.namespace == ns)
    }

    pub fn requirements_in<'a>(
        &'a self,
        ns: &'a str,
    ) -> impl Iterator<Item = &'a Requirement> + 'a {
        self.requirements.iter().filter(move |r| r.namespace == ns)
    }

    /// The first identity capability.
    pub fn identity(&self) -> Option<&Capability> {
        self.capabilities_in(namespace::IDENTITY).next()
    }

    pub fn id(&self) -> Option<&str> {
        self.identity().and_then(Capability::name)
    }

    pub fn version(&self) -> Option<&Version> {
        self.identity()
            .and_then(|c| c.attr(VERSION_ATTRIBUTE))
            .and_then(Attr::as_version)
    }

    /// The identity `type` attribute (`osgi.bundle`, feature, product).
    pub fn type_name(&self) -> Option<&str> {
        self.identity()
            .and_then(|c| c.attr(TYPE_ATTRIBUTE))
            .and_then(Attr::as_str)
    }

    pub fn kind(&self) -> Option<ArtifactKind> {
        let type_name = self.type_name()?;
        [ArtifactKind::Bundle, ArtifactKind::Feature, ArtifactKind::Product]
            .into_iter()
            .find(|k| k.type_name() == type_name)
    }

    pub fn content(&self) -> Option<ContentRef> {
        let cap = self.capabilities_in(namespace::CONTENT).next()?;
        Some(ContentRef {
            digest: cap.name()?.to_string(),
            url: cap.attr(URL_ATTRIBUTE)?.to_string(),
            size: match cap.attr(SIZE_ATTRIBUTE) {
                Some(Attr::Long(n)) => Some(*n),
                _ => None,
            },
        })
    }
}

/// Accumulates capabilities and requirements into a [`ResourceGraph`].
#[derive(Debug, Default)]
pub struct ResourceBuilder {
    graph: ResourceGraph,
}

impl ResourceBuilder {
    pub fn add_capability(&mut self, capability: Capability) -> &mut Self {
        self.graph.capabilities.push(capability);
        self
    }

    pub fn add_requirement(&mut self, requirement: Requirement) -> &mut Self {
        self.graph.requirements.push(requirement);
        self
    }

    pub fn build(self) -> ResourceGraph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> ResourceGraph {
        let mut rb = ResourceGraph::builder();
        rb.add_capability(
            Capability::new(namespace::IDENTITY)
                .with_attr(namespace::IDENTITY, "org.example.a")
                .with_attr(VERSION_ATTRIBUTE, Version::new(1, 2, 3))
                .with_attr(TYPE_ATTRIBUTE, "osgi.bundle"),
        )
        .add_capability(
            Capability::new(namespace::CONTENT)
                .with_attr(namespace::CONTENT, "ab12")
                .with_attr(URL_ATTRIBUTE, "https://example.com/a.jar")
                .with_attr(SIZE_ATTRIBUTE, 42u64),
        );
        rb.build()
    }

    #[test]
    fn identity_accessors() {
        let r = bundle();
        assert_eq!(r.id(), Some("org.example.a"));
        assert_eq!(r.version(), Some(&Version::new(1, 2, 3)));
        assert_eq!(r.kind(), Some(ArtifactKind::Bundle));
    }

    #[test]
    fn content_reference() {
        let content = bundle().content().expect("content");
        assert_eq!(content.digest, "ab12");
        assert_eq!(content.url, "https://example.com/a.jar");
        assert_eq!(content.size, Some(42));
    }

    #[test]
    fn optional_requirement() {
        let req = Requirement::filtered(namespace::IDENTITY, "(osgi.identity=x)").optional();
        assert!(req.is_optional());
        assert_eq!(req.filter(), Some("(osgi.identity=x)"));
    }

    #[test]
    fn graph_json_keeps_attribute_types() {
        let json = serde_json::to_string(&bundle()).unwrap();
        assert!(json.contains(r#"{"type":"version","value":"1.2.3"}"#));
        let back: ResourceGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bundle());
    }
}
