//! Eclipse feature and bundle metadata.
//!
//! Reads `feature.xml` from a feature jar and turns it into a
//! [`ResourceGraph`](p2index_resource::ResourceGraph): one identity
//! capability plus identity requirements for included features, bundled
//! plugins and imports. Bundle jars contribute the wiring declared in
//! their `META-INF/MANIFEST.MF`.

pub mod feature;
pub mod manifest;
pub mod rules;

pub use feature::{Feature, Import, Include, Plugin};
pub use manifest::{BundleManifest, Clause, parse_clauses};
pub use rules::MatchRule;
