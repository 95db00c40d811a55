//! Run configuration for nbcrate.
//!
//! Everything comes from CLI flags plus two optional JSON documents: the crate
//! defaults file (`--defaults`) and the licence table (`--licences`). When no
//! licence table is given, a built-in one is used.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{CrateError, Result};
use crate::types::Properties;

/// Licence table key reserved for the crate's own metadata licence.
pub const METADATA_LICENCE_KEY: &str = "metadata";

/// Default GitHub REST API base URL.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Default timeout for HTTP requests, in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Defaults file
// ---------------------------------------------------------------------------

/// Contents of the `--defaults` JSON file. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrateDefaults {
    /// Crate name used when there is no prior crate.
    #[serde(default)]
    pub name: Option<String>,

    /// Crate description used when there is no prior crate.
    #[serde(default)]
    pub description: Option<String>,

    /// Author records (`{"name": ..., "orcid": ...}` plus free-form extras).
    #[serde(default)]
    pub authors: Vec<Value>,

    /// Code repository URL; defaults to the local git remote.
    #[serde(default, rename = "codeRepository")]
    pub code_repository: Option<String>,

    /// Source the data crate is based on; defaults to the code repository.
    #[serde(default, rename = "isBasedOn")]
    pub is_based_on: Option<Value>,
}

/// Load the defaults file from a specific path.
pub fn load_defaults(path: &Path) -> Result<CrateDefaults> {
    let content = std::fs::read_to_string(path).map_err(|e| CrateError::io(path, e))?;

    serde_json::from_str(&content)
        .map_err(|e| CrateError::config(format!("failed to parse {}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Licence table
// ---------------------------------------------------------------------------

/// Licence key → full JSON-LD entity definition (including `@id` and `@type`).
#[derive(Debug, Clone, PartialEq)]
pub struct LicenceTable {
    entries: BTreeMap<String, Properties>,
}

impl LicenceTable {
    /// The built-in table: a few common licences plus CC0 for the metadata itself.
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        for (key, id, name) in [
            (
                METADATA_LICENCE_KEY,
                "https://creativecommons.org/publicdomain/zero/1.0/",
                "CC0 1.0 Universal (CC0 1.0) Public Domain Dedication",
            ),
            (
                "CC0-1.0",
                "https://creativecommons.org/publicdomain/zero/1.0/",
                "CC0 1.0 Universal (CC0 1.0) Public Domain Dedication",
            ),
            (
                "CC-BY-4.0",
                "https://creativecommons.org/licenses/by/4.0/",
                "Creative Commons Attribution 4.0 International",
            ),
            ("MIT", "https://spdx.org/licenses/MIT", "MIT License"),
        ] {
            let entity = json!({
                "@id": id,
                "@type": "CreativeWork",
                "name": name,
                "url": id,
            });
            if let Value::Object(props) = entity {
                entries.insert(key.to_string(), props);
            }
        }
        Self { entries }
    }

    /// Load a licence table from a JSON file.
    ///
    /// The file must be an object whose values are entity objects carrying an `@id`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CrateError::io(path, e))?;
        let entries: BTreeMap<String, Properties> = serde_json::from_str(&content)
            .map_err(|e| CrateError::config(format!("failed to parse {}: {e}", path.display())))?;

        if let Some((key, _)) = entries
            .iter()
            .find(|(_, entity)| !entity.get("@id").is_some_and(Value::is_string))
        {
            return Err(CrateError::config(format!(
                "licence '{key}' in {} has no @id",
                path.display()
            )));
        }

        tracing::debug!(?path, count = entries.len(), "loaded licence table");
        Ok(Self { entries })
    }

    /// Look up a licence entity by key.
    pub fn get(&self, key: &str) -> Result<&Properties> {
        self.entries
            .get(key)
            .ok_or_else(|| CrateError::Licence(key.to_string()))
    }
}

impl Default for LicenceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Fetch config
// ---------------------------------------------------------------------------

/// HTTP settings for titles, stats, payloads and the GitHub API.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// GitHub REST API base URL (overridable for tests and GitHub Enterprise).
    pub github_api: String,
    /// Optional token sent as a bearer credential to the GitHub API.
    pub github_token: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            github_api: DEFAULT_GITHUB_API.to_string(),
            github_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run config
// ---------------------------------------------------------------------------

/// Runtime configuration for one crate update, merged from CLI flags and files.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Working directory: notebooks are discovered here and the code crate is written here.
    pub crate_path: PathBuf,
    /// Values from the defaults file.
    pub defaults: CrateDefaults,
    /// New version number, if this run publishes a version.
    pub version: Option<String>,
    /// Data repository URL; when set a data crate is built instead of a code crate.
    pub data_repo: Option<String>,
    /// Licence table.
    pub licences: LicenceTable,
    /// HTTP settings.
    pub fetch: FetchConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            crate_path: PathBuf::from("./"),
            defaults: CrateDefaults::default(),
            version: None,
            data_repo: None,
            licences: LicenceTable::builtin(),
            fetch: FetchConfig::default(),
        }
    }
}
