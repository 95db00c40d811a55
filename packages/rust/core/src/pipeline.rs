//! End-to-end update: prior crate → root properties → version → notebooks → write.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use nbcrate_shared::{Result, RunConfig};

use crate::maker::CrateMaker;

/// Result of one crate update.
#[derive(Debug)]
pub struct UpdateCrateResult {
    /// Directory the crate was written to.
    pub crate_dir: PathBuf,
    /// Path of the written `ro-crate-metadata.json`.
    pub metadata_path: PathBuf,
    /// Number of notebooks added to the crate.
    pub notebook_count: usize,
    /// Number of entities in the final graph.
    pub entity_count: usize,
    /// Whether a data crate (rather than a code crate) was built.
    pub data_crate: bool,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting update status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each notebook has been added.
    fn notebook_added(&self, path: &str, current: usize, total: usize);
    /// Called when the update completes.
    fn done(&self, result: &UpdateCrateResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn notebook_added(&self, _path: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &UpdateCrateResult) {}
}

/// Create or update the crate described by `config`.
///
/// 1. Read the prior crate (or fall back to defaults)
/// 2. Merge root properties, version history and carried entities
/// 3. Add default authors and the new version, if any
/// 4. Add every publishable notebook
/// 5. Set the metadata licence and write the crate
#[instrument(skip_all, fields(crate_path = %config.crate_path.display()))]
pub async fn update_crate(
    config: &RunConfig,
    progress: &dyn ProgressReporter,
) -> Result<UpdateCrateResult> {
    let start = Instant::now();
    let mut maker = CrateMaker::new(config.clone())?;

    info!(
        repo = %maker.repo().name,
        data_repo = config.data_repo.as_deref().unwrap_or(""),
        "starting crate update"
    );

    // --- Phase 1: Prior crate ---
    progress.phase("Reading prior crate");
    let prepared = maker.prepare();
    let crate_dir = prepared.crate_dir.clone();

    // --- Phase 2: Root properties ---
    progress.phase("Updating root properties");
    maker.apply_prepared(prepared).await?;
    maker.add_default_authors().await?;

    // --- Phase 3: Version ---
    if let Some(version) = config.version.as_deref().filter(|v| !v.is_empty()) {
        progress.phase("Recording version");
        maker.add_version(version)?;
    }

    // --- Phase 4: Notebooks ---
    progress.phase("Adding notebooks");
    let notebooks = maker.publishable_notebooks()?;
    let total = notebooks.len();
    for (i, notebook) in notebooks.iter().enumerate() {
        maker.add_notebook(notebook).await?;
        progress.notebook_added(&notebook.file_name(), i + 1, total);
    }

    // --- Phase 5: Write ---
    progress.phase("Writing crate");
    maker.add_metadata_licence()?;
    let metadata_path = maker.write(&crate_dir).await?;

    let result = UpdateCrateResult {
        crate_dir,
        metadata_path,
        notebook_count: total,
        entity_count: maker.graph().len(),
        data_crate: maker.is_data_crate(),
        elapsed: start.elapsed(),
    };

    info!(
        notebooks = result.notebook_count,
        entities = result.entity_count,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "crate update complete"
    );

    progress.done(&result);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use nbcrate_shared::{CrateDefaults, id_ref};

    use crate::graph::{CrateGraph, ROOT_ID};

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("nbcrate-pipeline-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_notebook(dir: &Path, name: &str, rocrate: Value) {
        let doc = json!({
            "cells": [],
            "metadata": {
                "language_info": {"name": "python", "version": "3.11.4"},
                "rocrate": rocrate,
            },
            "nbformat": 4,
            "nbformat_minor": 5,
        });
        std::fs::write(dir.join(name), serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    }

    fn config(dir: &Path) -> RunConfig {
        RunConfig {
            crate_path: dir.to_path_buf(),
            ..RunConfig::default()
        }
    }

    /// The written document with per-run `sdDatePublished` stamps removed.
    fn stable_document(crate_dir: &Path) -> Value {
        let content = std::fs::read_to_string(crate_dir.join("ro-crate-metadata.json")).unwrap();
        let mut doc: Value = serde_json::from_str(&content).unwrap();
        if let Some(nodes) = doc["@graph"].as_array_mut() {
            for node in nodes {
                if let Some(map) = node.as_object_mut() {
                    map.remove("sdDatePublished");
                }
            }
        }
        doc
    }

    #[tokio::test]
    async fn notebook_authors_reach_the_root() {
        let dir = temp_dir();
        write_notebook(
            &dir,
            "harvest.ipynb",
            json!({"name": "Harvest", "author": [{"name": "Smith, J", "orcid": ""}]}),
        );
        write_notebook(&dir, "draft-ideas.ipynb", json!({"author": [{"name": "Jones, K"}]}));

        let result = update_crate(&config(&dir), &SilentProgress).await.unwrap();
        assert_eq!(result.notebook_count, 1);
        assert!(!result.data_crate);
        assert_eq!(result.crate_dir, dir);

        let graph = CrateGraph::load(&dir).unwrap();
        let root = graph.root().unwrap();
        assert_eq!(root.get("author"), Some(&id_ref("#Smith_J")));
        assert_eq!(root.get("hasPart"), Some(&id_ref("harvest.ipynb")));
        assert_eq!(
            root.get("license"),
            Some(&id_ref("https://creativecommons.org/publicdomain/zero/1.0/"))
        );
        assert!(graph.get("#Jones_K").is_none());

        let notebook = graph.get("harvest.ipynb").unwrap();
        assert_eq!(notebook.get("name"), Some(&json!("Harvest")));
        assert!(notebook.has_type("File") && notebook.has_type("SoftwareSourceCode"));
        assert_eq!(notebook.get("encodingFormat"), Some(&json!("application/x-ipynb+json")));
        assert_eq!(
            notebook.get("programmingLanguage"),
            Some(&id_ref("https://www.python.org/downloads/release/python-3114/"))
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn default_authors_come_first() {
        let dir = temp_dir();
        write_notebook(&dir, "harvest.ipynb", json!({"author": {"name": "Smith, J"}}));

        let mut config = config(&dir);
        config.defaults = CrateDefaults {
            name: Some("GLAM notebooks".into()),
            authors: vec![json!({"name": "Sherratt, Tim", "orcid": "0000-0001-7956-4498"})],
            ..CrateDefaults::default()
        };
        update_crate(&config, &SilentProgress).await.unwrap();

        let graph = CrateGraph::load(&dir).unwrap();
        let root = graph.root().unwrap();
        assert_eq!(root.get("name"), Some(&json!("GLAM notebooks")));
        assert_eq!(
            root.ref_ids("author"),
            vec!["https://orcid.org/0000-0001-7956-4498", "#Smith_J"]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn version_adds_one_update_action() {
        let dir = temp_dir();
        write_notebook(&dir, "harvest.ipynb", json!({}));

        let mut config = config(&dir);
        config.version = Some("1.2.0".into());
        update_crate(&config, &SilentProgress).await.unwrap();

        let graph = CrateGraph::load(&dir).unwrap();
        let updates: Vec<&str> = graph.by_type("UpdateAction").map(|e| e.id()).collect();
        assert_eq!(updates, vec!["create_version_1_2_0"]);
        assert_eq!(graph.root().unwrap().get("version"), Some(&json!("1.2.0")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn prior_crate_history_is_kept() {
        let dir = temp_dir();
        std::fs::copy(
            "../../../fixtures/crates/code/ro-crate-metadata.json",
            dir.join("ro-crate-metadata.json"),
        )
        .unwrap();
        write_notebook(&dir, "harvest.ipynb", json!({}));

        let mut config = config(&dir);
        config.version = Some("1.1.0".into());
        update_crate(&config, &SilentProgress).await.unwrap();

        let graph = CrateGraph::load(&dir).unwrap();
        let root = graph.root().unwrap();
        assert_eq!(root.get("name"), Some(&json!("GLAM notebooks")));
        assert_eq!(root.get("datePublished"), Some(&json!("2024-03-01T09:30:00+00:00")));
        assert_eq!(root.get("version"), Some(&json!("1.1.0")));

        let mut updates: Vec<&str> = graph.by_type("UpdateAction").map(|e| e.id()).collect();
        updates.sort();
        assert_eq!(updates, vec!["create_version_1_0_0", "create_version_1_1_0"]);

        let page = graph.get("https://glam-workbench.net/trove-newspapers/").unwrap();
        assert_eq!(page.get("name"), Some(&json!("Trove newspapers section")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn data_crate_keeps_only_data_repo_files() {
        let dir = temp_dir();
        std::fs::write(dir.join("articles.csv"), "id,title\n1,a\n").unwrap();
        write_notebook(
            &dir,
            "harvest.ipynb",
            json!({
                "author": {"name": "Smith, J"},
                "action": [{
                    "result": [
                        {
                            "url": "https://github.com/org/data/blob/main/articles.csv",
                            "localPath": "articles.csv",
                            "isPartOf": {"url": "https://github.com/org/data", "name": "Data"},
                        },
                        {"url": "https://github.com/org/other/blob/main/skip.csv", "localPath": "skip.csv"},
                    ]
                }]
            }),
        );
        write_notebook(
            &dir,
            "explore.ipynb",
            json!({"action": [{"result": {"url": "https://github.com/org/other/blob/main/x.csv"}}]}),
        );

        let mut config = config(&dir);
        config.data_repo = Some("https://github.com/org/data".into());
        let result = update_crate(&config, &SilentProgress).await.unwrap();

        let crate_dir = dir.join("data-rocrate");
        assert!(result.data_crate);
        assert_eq!(result.crate_dir, crate_dir);
        assert_eq!(result.notebook_count, 1);
        assert_eq!(
            std::fs::read_to_string(crate_dir.join("articles.csv")).unwrap(),
            "id,title\n1,a\n"
        );
        assert!(crate_dir.join("harvest.ipynb").exists());

        let graph = CrateGraph::load(&crate_dir).unwrap();
        let root = graph.root().unwrap();
        assert_eq!(root.get("name"), Some(&json!("data")));
        assert_eq!(root.get("mentions"), Some(&id_ref("#harvest_run_0")));
        assert!(graph.get("explore.ipynb").is_none());
        assert!(graph.get("skip.csv").is_none());

        let action = graph.get("#harvest_run_0").unwrap();
        assert_eq!(action.get("result"), Some(&id_ref("articles.csv")));
        assert!(action.get("endDate").is_some());

        let download = "https://github.com/org/data/archive/refs/heads/main.zip";
        assert_eq!(root.get("distribution"), Some(&id_ref(download)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn remote_only_results_are_downloaded_into_data_crates() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/org/data/raw/out.csv"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "8")
                    .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/org/data/raw/out.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("a,b\n1,2\n"))
            .mount(&server)
            .await;

        let dir = temp_dir();
        let url = format!("{}/org/data/raw/out.csv", server.uri());
        write_notebook(&dir, "harvest.ipynb", json!({"action": {"result": {"url": url}}}));

        let mut config = config(&dir);
        config.data_repo = Some("https://github.com/org/data".into());
        update_crate(&config, &SilentProgress).await.unwrap();

        let crate_dir = dir.join("data-rocrate");
        assert_eq!(std::fs::read_to_string(crate_dir.join("out.csv")).unwrap(), "a,b\n1,2\n");

        let graph = CrateGraph::load(&crate_dir).unwrap();
        let file = graph.get("out.csv").unwrap();
        assert_eq!(file.get("url"), Some(&json!(url)));
        assert_eq!(file.get("contentSize"), Some(&json!(8)));
        let action = graph.get("#harvest_run_0").unwrap();
        assert_eq!(action.get("endDate"), Some(&json!("2024-01-01T00:00:00+00:00")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_run_is_stable() {
        let dir = temp_dir();
        std::fs::write(dir.join("out.csv"), "id\n1\n").unwrap();
        write_notebook(
            &dir,
            "harvest.ipynb",
            json!({
                "name": "Harvest",
                "author": [{"name": "Smith, J"}, {"name": "Jones, K"}],
                "action": [{"result": {"localPath": "out.csv"}}],
            }),
        );

        let mut config = config(&dir);
        config.version = Some("2.0.0".into());
        update_crate(&config, &SilentProgress).await.unwrap();
        let first = stable_document(&dir);

        update_crate(&config, &SilentProgress).await.unwrap();
        let second = stable_document(&dir);

        assert_eq!(first, second);
        assert_eq!(
            CrateGraph::load(&dir).unwrap().get(ROOT_ID).unwrap().ref_ids("author"),
            vec!["#Smith_J", "#Jones_K"]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
