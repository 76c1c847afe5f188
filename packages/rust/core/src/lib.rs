//! Index building and querying for p2index.
//!
//! This crate ties metadata reading, artifact fetching, resource assembly
//! and persistence together:
//! - [`pipeline::build_index`]: dedup, fan-out and the per-artifact pipeline
//! - [`assembler`]: artifact → resource conversion per kind
//! - [`Indexer`]: persisted index lifecycle plus the query façade
//! - [`catalog`]: feature and product views

pub mod assembler;
pub mod catalog;
pub mod indexer;
pub mod pipeline;

pub use catalog::{FeatureSummary, Product};
pub use indexer::{Collaborators, DownloadListener, Indexer};
pub use pipeline::{
    BuildContext, BuildOutput, BuildReport, ProgressReporter, SilentProgress, SkippedArtifact,
    build_index,
};
