//! Crate assembly for nbcrate.
//!
//! This crate ties together notebook discovery, remote inspection and the
//! crate graph into the end-to-end [`update_crate`] workflow.

pub mod actions;
pub mod entities;
pub mod files;
pub mod graph;
pub mod maker;
pub mod pipeline;

pub use entities::EntityProperty;
pub use graph::{CrateGraph, Entity, EntityKind, METADATA_FILE, Payload, ROOT_ID};
pub use maker::{CrateMaker, PreparedCrate};
pub use pipeline::{ProgressReporter, SilentProgress, UpdateCrateResult, update_crate};
