//! Feature and product views over an [`Indexer`].

use std::collections::BTreeMap;

use p2index_feature::Feature;
use p2index_metadata::ProductRequirement;
use p2index_resource::{
    Attr, Filter, Op, Requirement, ResourceGraph, TYPE_ATTRIBUTE, VERSION_ATTRIBUTE, namespace,
};
use p2index_shared::{ArtifactKind, P2IndexError, Result, Version, VersionRange};
use tracing::{debug, instrument};

use crate::indexer::Indexer;

/// Identity attributes shown as dedicated product fields.
const PRODUCT_FIELDS: &[&str] = &[
    namespace::IDENTITY,
    TYPE_ATTRIBUTE,
    VERSION_ATTRIBUTE,
    "name",
    "description",
    "provider",
];

/// A feature as listed in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSummary {
    pub id: String,
    pub version: Version,
    pub label: Option<String>,
    pub provider: Option<String>,
}

/// A product reconstructed from its resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: String,
    pub version: Version,
    pub name: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
    /// Remaining identity attributes.
    pub properties: BTreeMap<String, String>,
    pub requirements: Vec<ProductRequirement>,
}

impl Indexer {
    pub fn features(&self) -> Vec<FeatureSummary> {
        self.of_kind(ArtifactKind::Feature)
            .iter()
            .filter_map(|r| {
                let identity = r.identity()?;
                Some(FeatureSummary {
                    id: r.id()?.to_string(),
                    version: r.version()?.clone(),
                    label: identity.attr("label").map(Attr::to_string),
                    provider: identity.attr("provider-name").map(Attr::to_string),
                })
            })
            .collect()
    }

    /// Parse the feature archive of `id` at `version`, fetching it through
    /// the download cache.
    #[instrument(skip_all, fields(%id, %version))]
    pub async fn feature(&self, id: &str, version: &Version) -> Result<Option<Feature>> {
        match self.resource(id, version) {
            Some(r) if r.kind() == Some(ArtifactKind::Feature) => {}
            _ => return Ok(None),
        }
        let Some(link) = self.get(id, version, Vec::new()).await? else {
            return Ok(None);
        };

        let feature = tokio::task::spawn_blocking(move || Feature::read(&link))
            .await
            .map_err(|e| P2IndexError::Assembly(format!("feature parse task failed: {e}")))??;
        Ok(Some(feature))
    }

    pub fn products(&self) -> Vec<Product> {
        self.of_kind(ArtifactKind::Product)
            .iter()
            .filter_map(|r| product_from_resource(r))
            .collect()
    }

    pub fn product(&self, id: &str, version: &Version) -> Option<Product> {
        self.resource(id, version)
            .filter(|r| r.kind() == Some(ArtifactKind::Product))
            .and_then(|r| product_from_resource(&r))
    }

    fn of_kind(&self, kind: ArtifactKind) -> Vec<std::sync::Arc<ResourceGraph>> {
        let mut found: Vec<_> = self
            .repository()
            .resources()
            .iter()
            .filter(|r| r.kind() == Some(kind))
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.id(), a.version()).cmp(&(b.id(), b.version())));
        found
    }
}

// ---------------------------------------------------------------------------
// Product reconstruction
// ---------------------------------------------------------------------------

pub fn product_from_resource(resource: &ResourceGraph) -> Option<Product> {
    let identity = resource.identity()?;
    let text = |key: &str| identity.attr(key).map(Attr::to_string);

    let properties = identity
        .attributes
        .iter()
        .filter(|(key, _)| !PRODUCT_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect();

    let requirements = resource
        .requirements
        .iter()
        .filter_map(|r| {
            let decoded = decode_requirement(r);
            if decoded.is_none() {
                debug!(namespace = %r.namespace, filter = ?r.filter(), "undecodable product requirement");
            }
            decoded
        })
        .collect();

    Some(Product {
        id: resource.id()?.to_string(),
        version: resource.version()?.clone(),
        name: text("name"),
        description: text("description"),
        provider: text("provider"),
        properties,
        requirements,
    })
}

/// Recover name, range and extra filter from a product requirement filter.
///
/// The generated part is either `(ns=name)` or
/// `(&(ns=name)<version clauses>)`; anything else ANDed in is the extra
/// filter.
pub fn decode_requirement(requirement: &Requirement) -> Option<ProductRequirement> {
    let ns = requirement.namespace.as_str();
    let mut clauses = match Filter::parse(requirement.filter()?).ok()? {
        Filter::And(items) => items,
        other => vec![other],
    };
    if let Some(Filter::And(generated)) = clauses.first().cloned() {
        clauses.splice(0..1, generated);
    }

    let mut name = None;
    let mut bounds = RangeBounds::default();
    let mut extra = Vec::new();
    for clause in clauses {
        match clause {
            Filter::Compare { attr, op: Op::Eq, value } if attr == ns && name.is_none() => {
                name = Some(value);
            }
            clause => {
                if !bounds.absorb(&clause) {
                    extra.push(clause);
                }
            }
        }
    }

    Some(ProductRequirement {
        namespace: ns.to_string(),
        name: name?,
        range: bounds.into_range_text(),
        optional: requirement.is_optional(),
        filter: match extra.len() {
            0 => None,
            1 => Some(extra[0].to_string()),
            _ => Some(Filter::And(extra).to_string()),
        },
    })
}

/// Version bounds collected from filter clauses.
#[derive(Default)]
struct RangeBounds {
    low: Option<(Version, bool)>,
    high: Option<(Version, bool)>,
}

impl RangeBounds {
    /// Take `clause` if it is a version bound.
    fn absorb(&mut self, clause: &Filter) -> bool {
        let (negated, inner) = match clause {
            Filter::Not(inner) => (true, inner.as_ref()),
            other => (false, other),
        };
        let Filter::Compare { attr, op, value } = inner else {
            return false;
        };
        if attr != VERSION_ATTRIBUTE {
            return false;
        }
        let Ok(version) = Version::parse(value) else {
            return false;
        };

        match (negated, op) {
            (false, Op::Eq) => {
                self.low = Some((version.clone(), true));
                self.high = Some((version, true));
            }
            (false, Op::Ge) => self.low = Some((version, true)),
            (true, Op::Le) => self.low = Some((version, false)),
            (false, Op::Le) => self.high = Some((version, true)),
            (true, Op::Ge) => self.high = Some((version, false)),
            _ => return false,
        }
        true
    }

    fn into_range_text(self) -> String {
        let (low, low_inclusive) = self.low.unwrap_or((Version::zero(), true));
        VersionRange {
            low,
            low_inclusive,
            high_inclusive: self.high.as_ref().is_some_and(|(_, inclusive)| *inclusive),
            high: self.high.map(|(v, _)| v),
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use p2index_metadata::encode_product_requirements;
    use p2index_shared::{ArtifactDescriptor, PRODUCT_REQUIRES_PROPERTY};

    use super::*;
    use crate::assembler::assemble;

    fn requirement(ns: &str, name: &str, range: &str) -> ProductRequirement {
        ProductRequirement::new(ns, name, range)
    }

    #[test]
    fn product_round_trips_through_its_resource() {
        let mut optional = requirement(namespace::EXECUTION_ENVIRONMENT, "JavaSE-17", "0.0.0");
        optional.optional = true;
        let mut gtk = requirement(namespace::P2_IU, "org.example.gtk", "[1.0.0,2.0.0)");
        gtk.filter = Some("(osgi.os=linux)".into());
        let kept = vec![
            requirement(namespace::P2_IU, "org.example.any", "0.0.0"),
            requirement(namespace::P2_IU, "org.example.compat", "[1.2.0,1.3.0)"),
            requirement(namespace::P2_IU, "org.example.exact", "[3.0.0.v1,3.0.0.v1]"),
            requirement(namespace::P2_IU, "org.example.open", "(1.0.0,2.0.0]"),
            optional,
            gtk,
        ];
        let mut all = kept.clone();
        all.push(requirement(namespace::P2_IU, "tooling.example.launcher", "1.0.0"));

        let mut props = BTreeMap::new();
        props.insert("org.eclipse.equinox.p2.name".into(), "Example IDE".into());
        props.insert("org.eclipse.equinox.p2.type.product".into(), "true".into());
        props.insert(PRODUCT_REQUIRES_PROPERTY.into(), encode_product_requirements(&all));
        let descriptor =
            ArtifactDescriptor::product("org.example.ide", Version::new(4, 30, 0), props);

        let graph = assemble(&descriptor, None).unwrap();
        let product = product_from_resource(&graph).unwrap();

        assert_eq!(product.id, "org.example.ide");
        assert_eq!(product.name.as_deref(), Some("Example IDE"));
        assert_eq!(product.description, None);
        assert_eq!(product.properties.get("type.product").map(String::as_str), Some("true"));
        assert_eq!(product.requirements, kept);
    }

    #[test]
    fn bare_at_least_range_is_recovered() {
        let req = Requirement::filtered(
            namespace::P2_IU,
            "(&(org.eclipse.equinox.p2.iu=a)(version>=1.5.0))",
        );
        let decoded = decode_requirement(&req).unwrap();
        assert_eq!(decoded.name, "a");
        assert_eq!(decoded.range, "1.5.0");
        assert_eq!(decoded.filter, None);
    }

    #[test]
    fn requirement_without_name_clause_is_not_a_product_requirement() {
        let req = Requirement::filtered(namespace::P2_IU, "(osgi.os=linux)");
        assert!(decode_requirement(&req).is_none());
    }
}
