//! Capability/requirement model for p2index.
//!
//! - [`ResourceGraph`]: one artifact's capabilities and requirements
//! - [`Filter`]: LDAP-style filter parsing and evaluation
//! - [`ResourceRepository`]: lookups and provider matching over a set of resources

pub mod filter;
pub mod model;
pub mod repository;

pub use filter::{Filter, Op};
pub use model::{
    Attr, BUNDLE_SYMBOLIC_NAME_ATTRIBUTE, BUNDLE_VERSION_ATTRIBUTE, Capability, ContentRef, FILTER_DIRECTIVE, JAR_MIME, MIME_ATTRIBUTE, RESOLUTION_DIRECTIVE,
    RESOLUTION_OPTIONAL, Requirement, ResourceBuilder, ResourceGraph, SIZE_ATTRIBUTE,
    TYPE_ATTRIBUTE, URL_ATTRIBUTE, VERSION_ATTRIBUTE, namespace,
};
pub use repository::{Provider, ResourceRepository, glob_to_regex};
