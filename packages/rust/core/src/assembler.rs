//! Artifact to [`ResourceGraph`] conversion.
//!
//! One assembler per [`ArtifactKind`]. Bundles and features describe a local
//! file (its digest, size and source URL end up in the content capability);
//! products are metadata only and are built from descriptor properties.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use p2index_feature::{BundleManifest, Feature};
use p2index_metadata::{ProductRequirement, decode_product_requirements};
use p2index_resource::filter::escape;
use p2index_resource::{
    Capability, Filter, JAR_MIME, MIME_ATTRIBUTE, Requirement, ResourceGraph, SIZE_ATTRIBUTE,
    TYPE_ATTRIBUTE, URL_ATTRIBUTE, VERSION_ATTRIBUTE, namespace,
};
use p2index_shared::{
    ArtifactDescriptor, ArtifactKind, INTERNAL_PROPERTY_PREFIX, P2IndexError,
    PRODUCT_REQUIRES_PROPERTY, Result, VersionRange,
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

/// Range text meaning "any version".
const WILDCARD_RANGE: &str = "0.0.0";

/// Product requirements on build tooling are not part of the product.
const TOOLING_PREFIX: &str = "tooling";

/// p2 property keys that get short names on product identity capabilities.
const PRODUCT_PROPERTY_NAMES: &[(&str, &str)] = &[
    ("org.eclipse.equinox.p2.name", "name"),
    ("org.eclipse.equinox.p2.description", "description"),
    ("org.eclipse.equinox.p2.provider", "provider"),
    ("org.eclipse.equinox.p2.type.group", "type.group"),
    ("org.eclipse.equinox.p2.type.product", "type.product"),
];

/// Build the resource for one artifact.
///
/// `file` is the verified local copy; it is required for bundles and
/// features and ignored for products.
#[instrument(skip_all, fields(kind = %descriptor.kind, id = %descriptor.id, version = %descriptor.version))]
pub fn assemble(descriptor: &ArtifactDescriptor, file: Option<&Path>) -> Result<ResourceGraph> {
    let graph = match descriptor.kind {
        ArtifactKind::Bundle => assemble_bundle(descriptor, local_file(descriptor, file)?)?,
        ArtifactKind::Feature => assemble_feature(descriptor, local_file(descriptor, file)?)?,
        ArtifactKind::Product => assemble_product(descriptor)?,
    };
    debug!(
        capabilities = graph.capabilities.len(),
        requirements = graph.requirements.len(),
        "assembled"
    );
    Ok(graph)
}

fn local_file<'a>(descriptor: &ArtifactDescriptor, file: Option<&'a Path>) -> Result<&'a Path> {
    file.ok_or_else(|| P2IndexError::Assembly(format!("{} has no local file", descriptor.label())))
}

// ---------------------------------------------------------------------------
// Bundle / Feature
// ---------------------------------------------------------------------------

/// Identity, p2 IU and content, plus the wiring of the jar's manifest when
/// it has one. The identity always follows the descriptor so index lookups
/// match the listing.
pub fn assemble_bundle(descriptor: &ArtifactDescriptor, file: &Path) -> Result<ResourceGraph> {
    let mut rb = ResourceGraph::builder();
    rb.add_capability(identity_capability(descriptor))
        .add_capability(p2_iu_capability(descriptor))
        .add_capability(content_capability(descriptor, file)?);

    match BundleManifest::from_jar(file)? {
        Some(manifest) => {
            if manifest.symbolic_name != descriptor.id || manifest.version != descriptor.version {
                debug!(
                    symbolic_name = %manifest.symbolic_name,
                    bundle_version = %manifest.version,
                    "manifest identity differs from the listing"
                );
            }
            for capability in manifest.capabilities()? {
                rb.add_capability(capability);
            }
            for requirement in manifest.requirements()? {
                rb.add_requirement(requirement);
            }
        }
        None => debug!("no bundle manifest"),
    }
    Ok(rb.build())
}

/// Everything the feature's own `feature.xml` declares, plus the p2 IU and
/// content capabilities of its archive.
pub fn assemble_feature(descriptor: &ArtifactDescriptor, file: &Path) -> Result<ResourceGraph> {
    let parsed = Feature::read(file)?.to_resource();

    let mut rb = ResourceGraph::builder();
    for capability in parsed.capabilities {
        rb.add_capability(capability);
    }
    for requirement in parsed.requirements {
        rb.add_requirement(requirement);
    }
    rb.add_capability(p2_iu_capability(descriptor))
        .add_capability(content_capability(descriptor, file)?);
    Ok(rb.build())
}

fn identity_capability(descriptor: &ArtifactDescriptor) -> Capability {
    Capability::new(namespace::IDENTITY)
        .with_attr(namespace::IDENTITY, descriptor.id.as_str())
        .with_attr(TYPE_ATTRIBUTE, descriptor.kind.type_name())
        .with_attr(VERSION_ATTRIBUTE, descriptor.version.clone())
}

fn p2_iu_capability(descriptor: &ArtifactDescriptor) -> Capability {
    Capability::new(namespace::P2_IU)
        .with_attr(namespace::P2_IU, descriptor.id.as_str())
        .with_attr(VERSION_ATTRIBUTE, descriptor.version.clone())
}

fn content_capability(descriptor: &ArtifactDescriptor, file: &Path) -> Result<Capability> {
    let url = descriptor.location.as_ref().ok_or_else(|| {
        P2IndexError::Assembly(format!("{} has no source location", descriptor.label()))
    })?;
    let (digest, size) = sha256_file(file)?;
    Ok(Capability::new(namespace::CONTENT)
        .with_attr(namespace::CONTENT, digest)
        .with_attr(URL_ATTRIBUTE, url.as_str())
        .with_attr(SIZE_ATTRIBUTE, size)
        .with_attr(MIME_ATTRIBUTE, JAR_MIME))
}

/// SHA-256 hex digest and length of a file.
fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let file = File::open(path).map_err(|e| P2IndexError::io(path, e))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut BufReader::new(file), &mut hasher)
        .map_err(|e| P2IndexError::io(path, e))?;
    Ok((hex::encode(hasher.finalize()), size))
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

pub fn assemble_product(descriptor: &ArtifactDescriptor) -> Result<ResourceGraph> {
    let mut identity = identity_capability(descriptor);
    for (key, value) in &descriptor.properties {
        if key.starts_with(INTERNAL_PROPERTY_PREFIX) {
            continue;
        }
        identity = identity.with_attr(product_property_name(key), value.as_str());
    }

    let mut rb = ResourceGraph::builder();
    rb.add_capability(identity);

    if let Some(encoded) = descriptor.properties.get(PRODUCT_REQUIRES_PROPERTY) {
        for requirement in decode_product_requirements(encoded) {
            if requirement.name.starts_with(TOOLING_PREFIX) {
                debug!(name = %requirement.name, "dropping tooling requirement");
                continue;
            }
            rb.add_requirement(product_requirement(&requirement)?);
        }
    }
    Ok(rb.build())
}

fn product_property_name(key: &str) -> &str {
    PRODUCT_PROPERTY_NAMES
        .iter()
        .find(|(p2, _)| *p2 == key)
        .map_or(key, |(_, short)| *short)
}

/// Translate one decoded product requirement into a filtered requirement.
///
/// Only installable-unit requirements carry a version clause; `osgi.ee` and
/// everything else match on the name alone.
pub fn product_requirement(requirement: &ProductRequirement) -> Result<Requirement> {
    let ns = requirement.namespace.as_str();
    let mut filter = format!("({ns}={})", escape(&requirement.name));

    let range = requirement.range.trim();
    if ns == namespace::P2_IU && !range.is_empty() && range != WILDCARD_RANGE {
        let range = VersionRange::parse(range).map_err(|e| {
            P2IndexError::Assembly(format!("requirement on {}: {e}", requirement.name))
        })?;
        if !range.is_unbounded() {
            let clauses = range.to_filter(VERSION_ATTRIBUTE);
            let clauses = clauses
                .strip_prefix("(&")
                .and_then(|inner| inner.strip_suffix(')'))
                .unwrap_or(&clauses);
            filter = format!("(&{filter}{clauses})");
        }
    }

    if let Some(extra) = requirement.filter.as_deref() {
        filter = format!("(&{filter}{extra})");
    }

    Filter::parse(&filter).map_err(|e| {
        P2IndexError::Assembly(format!("requirement on {}: {e}", requirement.name))
    })?;

    let req = Requirement::filtered(ns, filter);
    Ok(if requirement.optional { req.optional() } else { req })
}
