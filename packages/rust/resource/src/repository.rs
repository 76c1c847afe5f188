//! In-memory resource set with identity lookups and provider matching.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use p2index_shared::{P2IndexError, Result, Version};
use regex::Regex;
use tracing::debug;

use crate::filter::Filter;
use crate::model::{Capability, Requirement, ResourceGraph, namespace};

/// A capability that satisfies a requirement, with the resource declaring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub resource: Arc<ResourceGraph>,
    pub capability: Capability,
}

/// Read-only view over a set of resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceRepository {
    resources: Vec<Arc<ResourceGraph>>,
}

impl ResourceRepository {
    pub fn new(resources: impl IntoIterator<Item = ResourceGraph>) -> Self {
        Self {
            resources: resources.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn resources(&self) -> &[Arc<ResourceGraph>] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Capabilities matching one requirement, in resource order.
    ///
    /// A requirement without a filter matches every capability in its
    /// namespace.
    pub fn providers(&self, requirement: &Requirement) -> Result<Vec<Provider>> {
        let filter = requirement.filter().map(Filter::parse).transpose()?;
        let mut found = Vec::new();
        for resource in &self.resources {
            for cap in resource.capabilities_in(&requirement.namespace) {
                if filter.as_ref().is_none_or(|f| f.matches(&cap.attributes)) {
                    found.push(Provider {
                        resource: Arc::clone(resource),
                        capability: cap.clone(),
                    });
                }
            }
        }
        Ok(found)
    }

    /// Providers for each requirement. Every requirement gets an entry, empty
    /// when nothing matches.
    pub fn find_providers(
        &self,
        requirements: &[Requirement],
    ) -> Result<HashMap<Requirement, Vec<Provider>>> {
        let mut result = HashMap::with_capacity(requirements.len());
        for requirement in requirements {
            let providers = self.providers(requirement)?;
            debug!(
                namespace = %requirement.namespace,
                filter = requirement.filter().unwrap_or(""),
                count = providers.len(),
                "provider lookup"
            );
            result.insert(requirement.clone(), providers);
        }
        Ok(result)
    }

    /// Sorted, distinct identity ids, optionally restricted to a glob pattern.
    pub fn list(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let regex = pattern.map(glob_to_regex).transpose()?;
        let ids: BTreeSet<&str> = self
            .identities()
            .filter_map(|cap| cap.name())
            .filter(|id| regex.as_ref().is_none_or(|r| r.is_match(id)))
            .collect();
        Ok(ids.into_iter().map(str::to_string).collect())
    }

    /// Every version published for `id`, ascending.
    pub fn versions(&self, id: &str) -> BTreeSet<Version> {
        self.resources
            .iter()
            .filter(|r| r.id() == Some(id))
            .filter_map(|r| r.version().cloned())
            .collect()
    }

    pub fn get(&self, id: &str, version: &Version) -> Option<Arc<ResourceGraph>> {
        self.resources
            .iter()
            .find(|r| r.id() == Some(id) && r.version() == Some(version))
            .cloned()
    }

    fn identities(&self) -> impl Iterator<Item = &Capability> {
        self.resources
            .iter()
            .flat_map(|r| r.capabilities_in(namespace::IDENTITY))
    }
}

/// Compile a glob (`*` any run, `?` one character) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$"))
        .map_err(|e| P2IndexError::parse(format!("invalid pattern '{pattern}': {e}")))
}
