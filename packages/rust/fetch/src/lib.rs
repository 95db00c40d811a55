//! Remote and local resource inspection.
//!
//! This crate provides:
//! - [`Fetcher`]: the shared HTTP client: page titles, HEAD-based stats, payload downloads
//! - [`GitHubClient`]: default branches and file contents metadata from the GitHub REST API
//! - [`stats`]: size/modification metadata for local files and directories

pub mod client;
pub mod github;
pub mod stats;

pub use client::{Fetcher, extract_title};
pub use github::{GitHubClient, GitHubContents};
pub use stats::{FileStats, local_file_stats, now_timestamp};
