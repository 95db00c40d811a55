//! Notebook discovery and front-matter metadata reading.
//!
//! Notebooks are plain nbformat JSON. The crate metadata lives under
//! `metadata.rocrate`; only truthy values are read from it.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::{debug, instrument};

use nbcrate_shared::{CrateError, Properties, Result, is_truthy, listify};

/// Notebook file extension.
const NOTEBOOK_EXTENSION: &str = "ipynb";

/// Key under the notebook's `metadata` holding the crate metadata block.
const METADATA_KEY: &str = "rocrate";

/// File name prefixes (case-insensitive) of notebooks that are never published.
const SKIPPED_PREFIXES: [&str; 3] = ["draft", "untitled", "index"];

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// List the publishable notebooks directly inside `dir`, sorted by file name.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn find_notebooks(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| CrateError::io(dir, e))?;

    let mut notebooks = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CrateError::io(dir, e))?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(NOTEBOOK_EXTENSION)
        {
            continue;
        }
        let name = file_name(&path).to_lowercase();
        if SKIPPED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            debug!(notebook = %name, "skipping unpublished notebook");
            continue;
        }
        notebooks.push(path);
    }

    notebooks.sort();
    debug!(count = notebooks.len(), "notebooks found");
    Ok(notebooks)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Notebook
// ---------------------------------------------------------------------------

/// A notebook on disk with its parsed top-level `metadata` object.
#[derive(Debug, Clone)]
pub struct Notebook {
    path: PathBuf,
    metadata: Value,
}

impl Notebook {
    /// Read and parse a notebook file.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CrateError::io(path, e))?;
        let doc: Value = serde_json::from_str(&content).map_err(|e| {
            CrateError::parse(format!("{}: invalid notebook JSON: {e}", path.display()))
        })?;

        let metadata = match doc.get("metadata") {
            Some(meta @ Value::Object(_)) => meta.clone(),
            Some(_) => {
                return Err(CrateError::parse(format!(
                    "{}: notebook metadata is not an object",
                    path.display()
                )));
            }
            None => Value::Object(Properties::new()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
        })
    }

    /// File name including the `.ipynb` extension.
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }

    /// The truthy entries of the notebook's `metadata.rocrate` block.
    pub fn crate_metadata(&self) -> Properties {
        match self.metadata.get(METADATA_KEY) {
            Some(Value::Object(block)) => block
                .iter()
                .filter(|(_, value)| is_truthy(value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Properties::new(),
        }
    }

    /// URLs of every `result` file declared by the notebook's actions.
    pub fn result_urls(&self) -> Vec<String> {
        let Some(actions) = self.crate_metadata().remove("action") else {
            return Vec::new();
        };
        listify(actions)
            .iter()
            .filter_map(|action| action.get("result").cloned())
            .flat_map(listify)
            .filter_map(|file| file.get("url").and_then(Value::as_str).map(String::from))
            .collect()
    }

    /// Python version recorded by the kernel (`metadata.language_info.version`).
    pub fn python_version(&self) -> Option<String> {
        let info = self.metadata.get("language_info")?;
        let is_python = info
            .get("name")
            .and_then(Value::as_str)
            .is_none_or(|name| name.eq_ignore_ascii_case("python"));
        if !is_python {
            return None;
        }
        info.get("version")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(String::from)
    }
}

/// Version of the Python interpreter on `PATH`, from `python3 --version` or `python --version`.
pub fn interpreter_version() -> Option<String> {
    ["python3", "python"].iter().find_map(|bin| {
        let output = Command::new(bin).arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        // Python 2 printed its version to stderr.
        let text = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            String::from_utf8_lossy(&output.stdout).to_string()
        };
        parse_version_banner(&text)
    })
}

/// `"Python 3.11.4\n"` → `"3.11.4"`.
fn parse_version_banner(text: &str) -> Option<String> {
    text.trim()
        .strip_prefix("Python ")
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
