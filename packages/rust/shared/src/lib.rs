//! Shared types, error model, and configuration for nbcrate.
//!
//! This crate is the foundation depended on by all other nbcrate crates.
//! It provides:
//! - [`CrateError`]: the unified error type
//! - JSON-LD value helpers ([`listify`], [`delistify`], [`id_ref`]) and [`PersonRecord`]
//! - Configuration ([`RunConfig`], [`CrateDefaults`], [`LicenceTable`], [`FetchConfig`])

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    CrateDefaults, DEFAULT_GITHUB_API, FetchConfig, LicenceTable, METADATA_LICENCE_KEY, RunConfig,
    load_defaults,
};
pub use error::{CrateError, Result};
pub use types::{
    PersonRecord, Properties, delistify, id_ref, id_refs, is_truthy, listify, ref_id,
};
