//! Shared types, error model, and configuration for p2index.
//!
//! This crate is the foundation depended on by all other p2index crates.
//! It provides:
//! - [`P2IndexError`]: the unified error type
//! - Domain types ([`ArtifactDescriptor`], [`ArtifactKind`], [`ArtifactIdentity`])
//! - OSGi versions ([`Version`], [`VersionRange`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;
pub mod version;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, FetchSection, RepositoryEntry, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{P2IndexError, Result};
pub use types::{
    ArtifactDescriptor, ArtifactIdentity, ArtifactKind, INTERNAL_PROPERTY_PREFIX,
    PRODUCT_REQUIRES_PROPERTY,
};
pub use version::{Version, VersionRange};
