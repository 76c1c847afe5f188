//! Feature descriptor parsed from `feature.xml`, and its resource form.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use p2index_resource::{
    Capability, Requirement, ResourceGraph, TYPE_ATTRIBUTE, VERSION_ATTRIBUTE, namespace,
};
use p2index_shared::{ArtifactKind, P2IndexError, Result, Version};
use tracing::debug;

use crate::rules::{MatchRule, conjunction, identity_clauses};

const FEATURE_XML: &str = "feature.xml";
const FEATURE_PROPERTIES: &str = "feature.properties";

/// `<includes>`: a nested feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub id: String,
    pub version: Version,
    pub optional: bool,
}

/// `<plugin>`: a bundle shipped with the feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub id: String,
    pub version: Version,
}

/// `<requires><import>`: a dependency on a plugin or feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub id: String,
    pub kind: ArtifactKind,
    pub version: Version,
    pub rule: MatchRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub id: String,
    pub version: Version,
    pub label: Option<String>,
    pub provider_name: Option<String>,
    pub includes: Vec<Include>,
    pub plugins: Vec<Plugin>,
    pub imports: Vec<Import>,
}

impl Feature {
    /// Read a feature archive, or a bare `feature.xml` when the path says so.
    pub fn read(path: &Path) -> Result<Self> {
        if path.file_name().is_some_and(|n| n == FEATURE_XML) {
            let xml = std::fs::read_to_string(path).map_err(|e| P2IndexError::io(path, e))?;
            return Self::parse_xml(&xml);
        }
        Self::from_archive(path)
    }

    /// Read `feature.xml` (and `feature.properties` for `%key` labels) from a jar.
    pub fn from_archive(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| P2IndexError::io(path, e))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            P2IndexError::parse(format!("{} is not a feature archive: {e}", path.display()))
        })?;

        let xml = read_entry(&mut archive, FEATURE_XML)?.ok_or_else(|| {
            P2IndexError::parse(format!("{} has no {FEATURE_XML}", path.display()))
        })?;
        let mut feature = Self::parse_xml(&xml)?;

        if let Some(properties) = read_entry(&mut archive, FEATURE_PROPERTIES)? {
            feature.localize(&parse_properties(&properties));
        }
        debug!(id = %feature.id, version = %feature.version, "parsed feature archive");
        Ok(feature)
    }

    pub fn parse_xml(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| P2IndexError::parse(format!("invalid {FEATURE_XML}: {e}")))?;
        let root = doc.root_element();
        if !root.has_tag_name("feature") {
            return Err(P2IndexError::parse(format!(
                "expected <feature> root, found <{}>",
                root.tag_name().name()
            )));
        }

        let id = root
            .attribute("id")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| P2IndexError::parse("feature without id"))?
            .trim()
            .to_string();

        let mut feature = Self {
            id,
            version: version_attr(&root)?,
            label: root.attribute("label").map(str::to_string),
            provider_name: root.attribute("provider-name").map(str::to_string),
            includes: Vec::new(),
            plugins: Vec::new(),
            imports: Vec::new(),
        };

        for node in root.children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "includes" => {
                    let Some(id) = node.attribute("id") else { continue };
                    feature.includes.push(Include {
                        id: id.to_string(),
                        version: version_attr(&node)?,
                        optional: node.attribute("optional") == Some("true"),
                    });
                }
                "plugin" => {
                    let Some(id) = node.attribute("id") else { continue };
                    feature.plugins.push(Plugin {
                        id: id.to_string(),
                        version: version_attr(&node)?,
                    });
                }
                "requires" => {
                    for import in node.children().filter(|n| n.has_tag_name("import")) {
                        let (id, kind) = match (import.attribute("plugin"), import.attribute("feature")) {
                            (Some(p), _) => (p, ArtifactKind::Bundle),
                            (None, Some(f)) => (f, ArtifactKind::Feature),
                            (None, None) => continue,
                        };
                        feature.imports.push(Import {
                            id: id.to_string(),
                            kind,
                            version: version_attr(&import)?,
                            rule: MatchRule::parse(import.attribute("match").unwrap_or("")),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(feature)
    }

    /// Replace `%key` label and provider with values from `feature.properties`.
    fn localize(&mut self, properties: &HashMap<String, String>) {
        for field in [&mut self.label, &mut self.provider_name] {
            let Some(key) = field.as_deref().and_then(|s| s.strip_prefix('%')) else {
                continue;
            };
            if let Some(value) = properties.get(key) {
                *field = Some(value.clone());
            }
        }
    }

    /// The feature's capabilities and requirements.
    pub fn to_resource(&self) -> ResourceGraph {
        let mut rb = ResourceGraph::builder();

        let mut identity = Capability::new(namespace::IDENTITY)
            .with_attr(namespace::IDENTITY, self.id.as_str())
            .with_attr(TYPE_ATTRIBUTE, ArtifactKind::Feature.type_name())
            .with_attr(VERSION_ATTRIBUTE, self.version.clone());
        if let Some(label) = &self.label {
            identity = identity.with_attr("label", label.as_str());
        }
        if let Some(provider) = &self.provider_name {
            identity = identity.with_attr("provider-name", provider.as_str());
        }
        rb.add_capability(identity);

        for include in &self.includes {
            let mut clauses = identity_clauses(&include.id, Some(ArtifactKind::Feature));
            if !include.version.is_zero() {
                clauses.push(format!("({VERSION_ATTRIBUTE}={})", include.version));
            }
            let req = Requirement::filtered(namespace::IDENTITY, conjunction(clauses));
            rb.add_requirement(if include.optional { req.optional() } else { req });
        }

        for plugin in &self.plugins {
            let mut clauses = identity_clauses(&plugin.id, None);
            if !plugin.version.is_zero() {
                clauses.push(format!("({VERSION_ATTRIBUTE}={})", plugin.version));
            }
            rb.add_requirement(Requirement::filtered(namespace::IDENTITY, conjunction(clauses)));
        }

        for import in &self.imports {
            let kind = (import.kind == ArtifactKind::Feature).then_some(ArtifactKind::Feature);
            let mut clauses = identity_clauses(&import.id, kind);
            clauses.extend(import.rule.version_clauses(&import.version));
            rb.add_requirement(Requirement::filtered(namespace::IDENTITY, conjunction(clauses)));
        }

        rb.build()
    }
}

fn version_attr(node: &roxmltree::Node<'_, '_>) -> Result<Version> {
    Version::parse(node.attribute("version").unwrap_or(""))
}

pub(crate) fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(P2IndexError::parse(format!("reading {name}: {e}"))),
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| P2IndexError::parse(format!("reading {name}: {e}")))?;
    Ok(Some(content))
}

/// Minimal `key=value` properties reader; `#`/`!` lines are comments.
fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter_map(|l| l.split_once(['=', ':']))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
