//! # Project State
//!
//! On-disk project layout, round reports, and the typed specification.

pub mod io;
pub mod specs;
pub mod store;

pub use specs::{Feature, ProjectType, Specification};
pub use store::{
    normalize_artifact_path, read_tree, MergeOutcome, ProjectLayout, ProjectStore, RejectedPath,
    RoundSummary, VerificationCopy,
};
