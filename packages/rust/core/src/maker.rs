//! Crate assembly state: the graph under construction plus everything needed to
//! resolve entities for it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use nbcrate_discovery::{GitHubRepo, Notebook, RepoInfo, find_notebooks, interpreter_version};
use nbcrate_fetch::Fetcher;
use nbcrate_shared::{
    METADATA_LICENCE_KEY, Properties, Result, RunConfig, id_ref, is_truthy, listify,
};

use crate::entities::EntityProperty;
use crate::graph::{CrateGraph, Entity, EntityKind, Payload, ROOT_ID};

/// Media type of Jupyter notebooks.
const NOTEBOOK_FORMAT: &str = "application/x-ipynb+json";

/// Profile notebooks declare conformance to.
const NOTEBOOK_PROFILE: &str = "https://purl.archive.org/textcommons/profile#Notebook";

/// Status recorded on completed actions.
pub(crate) const COMPLETED_STATUS: &str = "http://schema.org/CompletedActionStatus";

/// Root keys carried over from a prior crate when they hold plain values.
const CARRIED_ROOT_KEYS: [&str; 4] = ["name", "description", "mainEntityOfPage", "codeRepository"];

/// Root keys carried over from a prior crate when they reference entities.
const CARRIED_ENTITY_KEYS: [&str; 4] = ["mainEntityOfPage", "license", "isBasedOn", "distribution"];

/// Root bookkeeping keys kept across runs.
const CARRIED_HISTORY_KEYS: [&str; 2] = ["version", "datePublished"];

// ---------------------------------------------------------------------------
// Prior crate
// ---------------------------------------------------------------------------

/// What survives from a previously written crate.
#[derive(Debug, Default)]
struct PriorState {
    root_props: Properties,
    history: Properties,
    entities: Vec<(String, Entity)>,
    versions: Vec<Entity>,
}

impl PriorState {
    fn from_graph(graph: &CrateGraph) -> Self {
        let mut state = Self::default();
        let Some(root) = graph.root() else {
            return state;
        };

        for key in CARRIED_ROOT_KEYS {
            let plain = root
                .get(key)
                .filter(|v| listify((*v).clone()).iter().all(|item| !item.is_object()));
            if let Some(value) = plain {
                state.root_props.insert(key.to_string(), value.clone());
            }
        }
        for key in CARRIED_HISTORY_KEYS {
            if let Some(value) = root.get(key) {
                state.history.insert(key.to_string(), value.clone());
            }
        }
        for key in CARRIED_ENTITY_KEYS {
            for id in root.ref_ids(key) {
                match graph.get(&id) {
                    Some(entity) => state.entities.push((key.to_string(), entity.clone())),
                    None => warn!(%key, %id, "prior crate references a missing entity"),
                }
            }
        }
        state.versions = graph.by_type("UpdateAction").cloned().collect();
        state
    }
}

/// Starting point of an update: where to write and what to seed the root with.
#[derive(Debug)]
pub struct PreparedCrate {
    /// Directory the crate is read from and written to.
    pub crate_dir: PathBuf,
    /// Plain root properties (name, description, ...).
    pub root_props: Properties,
    /// Root bookkeeping values (`version`, `datePublished`) from the prior crate.
    pub history: Properties,
    /// Entities to re-add, paired with the root property that references them.
    pub entities: Vec<(String, Entity)>,
    /// `UpdateAction` entities from the prior crate.
    pub versions: Vec<Entity>,
}

// ---------------------------------------------------------------------------
// CrateMaker
// ---------------------------------------------------------------------------

/// Builds one crate from the working directory, its notebooks and a prior crate.
#[derive(Debug)]
pub struct CrateMaker {
    pub(crate) config: RunConfig,
    pub(crate) fetcher: Fetcher,
    pub(crate) repo: RepoInfo,
    pub(crate) graph: CrateGraph,
    interpreter: OnceLock<Option<String>>,
}

impl CrateMaker {
    /// Create a maker with an empty graph, resolving the local git repository.
    pub fn new(config: RunConfig) -> Result<Self> {
        let fetcher = Fetcher::new(&config.fetch)?;
        let repo = RepoInfo::locate_or_placeholder(&config.crate_path);
        Ok(Self::with_parts(config, fetcher, repo))
    }

    /// Create a maker with an explicit repository and HTTP client.
    pub fn with_parts(config: RunConfig, fetcher: Fetcher, repo: RepoInfo) -> Self {
        Self {
            config,
            fetcher,
            repo,
            graph: CrateGraph::new(),
            interpreter: OnceLock::new(),
        }
    }

    pub fn graph(&self) -> &CrateGraph {
        &self.graph
    }

    pub fn repo(&self) -> &RepoInfo {
        &self.repo
    }

    /// The data repository URL, when building a data crate.
    pub fn data_repo(&self) -> Option<&str> {
        self.config.data_repo.as_deref().filter(|url| !url.is_empty())
    }

    pub fn is_data_crate(&self) -> bool {
        self.data_repo().is_some()
    }

    /// Owner/name of the data repository, if it is a GitHub URL.
    pub(crate) fn data_repo_github(&self) -> Option<GitHubRepo> {
        self.data_repo().and_then(GitHubRepo::from_url)
    }

    /// Resolve a path from notebook metadata against the working directory.
    pub(crate) fn resolve(&self, path: &str) -> PathBuf {
        self.config.crate_path.join(path)
    }

    // -----------------------------------------------------------------------
    // Preparation
    // -----------------------------------------------------------------------

    /// Read the prior crate and decide the crate directory and root seed values.
    pub fn prepare(&self) -> PreparedCrate {
        if self.is_data_crate() {
            self.prepare_data_crate()
        } else {
            self.prepare_code_crate()
        }
    }

    /// A code crate lives in the working directory itself.
    #[instrument(skip_all)]
    pub fn prepare_code_crate(&self) -> PreparedCrate {
        let crate_dir = self.config.crate_path.clone();
        let prior = CrateGraph::load(&crate_dir)
            .map(|graph| PriorState::from_graph(&graph))
            .unwrap_or_default();

        if !prior.root_props.is_empty() {
            return PreparedCrate {
                crate_dir,
                root_props: prior.root_props,
                history: prior.history,
                entities: prior.entities,
                versions: prior.versions,
            };
        }

        let defaults = &self.config.defaults;
        let mut root_props = Properties::new();
        root_props.insert(
            "name".into(),
            json!(defaults.name.clone().unwrap_or_else(|| self.repo.name.clone())),
        );
        root_props.insert(
            "description".into(),
            json!(defaults.description.clone().unwrap_or_default()),
        );
        root_props.insert(
            "codeRepository".into(),
            json!(
                defaults
                    .code_repository
                    .clone()
                    .unwrap_or_else(|| self.repo.url.clone())
            ),
        );

        debug!("no prior code crate, using defaults");
        PreparedCrate {
            crate_dir,
            root_props,
            history: prior.history,
            entities: prior.entities,
            versions: Vec::new(),
        }
    }

    /// A data crate lives in `<data-repo-name>-rocrate` under the working directory.
    #[instrument(skip_all)]
    pub fn prepare_data_crate(&self) -> PreparedCrate {
        let data_repo = self.data_repo().unwrap_or_default();
        let repo_name = self.data_repo_github().map(|gh| gh.name);
        let dir_name = match &repo_name {
            Some(name) => format!("{name}-rocrate"),
            None => "data-rocrate".to_string(),
        };
        let crate_dir = self.config.crate_path.join(dir_name);

        let prior = CrateGraph::load(&crate_dir)
            .map(|graph| PriorState::from_graph(&graph))
            .unwrap_or_default();

        if !prior.root_props.is_empty() {
            return PreparedCrate {
                crate_dir,
                root_props: prior.root_props,
                history: prior.history,
                entities: prior.entities,
                versions: prior.versions,
            };
        }

        let defaults = &self.config.defaults;
        let mut root_props = Properties::new();
        let name = defaults
            .name
            .clone()
            .or(repo_name)
            .unwrap_or_else(|| "data".to_string());
        root_props.insert("name".into(), json!(name));
        root_props.insert(
            "description".into(),
            json!(defaults.description.clone().unwrap_or_default()),
        );
        root_props.insert(
            "isBasedOn".into(),
            defaults
                .is_based_on
                .clone()
                .unwrap_or_else(|| json!(self.repo.url)),
        );
        root_props.insert(
            "distribution".into(),
            json!(format!(
                "{}/archive/refs/heads/main.zip",
                data_repo.trim_end_matches('/')
            )),
        );

        debug!(crate_dir = %crate_dir.display(), "no prior data crate, using defaults");
        PreparedCrate {
            crate_dir,
            root_props,
            history: prior.history,
            entities: Vec::new(),
            versions: Vec::new(),
        }
    }

    /// Seed the fresh graph with the prepared root values, versions and entities.
    pub async fn apply_prepared(&mut self, prepared: PreparedCrate) -> Result<()> {
        let root = self.graph.entity_mut(ROOT_ID)?;
        for (key, value) in prepared.history {
            root.set(&key, value);
        }

        for version in prepared.versions {
            self.graph.add(version);
        }

        for (key, entity) in prepared.entities {
            let id = self.graph.add(entity);
            self.graph.append_ref(ROOT_ID, &key, &id)?;
        }

        self.update_properties(ROOT_ID, &prepared.root_props, &[]).await
    }

    /// Add the authors from the defaults file to the root dataset.
    pub async fn add_default_authors(&mut self) -> Result<()> {
        let authors = self.config.defaults.authors.clone();
        if authors.is_empty() {
            return Ok(());
        }
        self.add_entities(ROOT_ID, EntityProperty::Author, authors).await
    }

    // -----------------------------------------------------------------------
    // Version
    // -----------------------------------------------------------------------

    /// Set the root version and record an `UpdateAction` for it.
    pub fn add_version(&mut self, version: &str) -> Result<String> {
        self.graph
            .entity_mut(ROOT_ID)?
            .set("version", json!(version));
        let id = self.add_update_action(version);
        info!(%version, "version recorded");
        Ok(id)
    }

    pub(crate) fn add_update_action(&mut self, version: &str) -> String {
        let id = format!("create_version_{}", version.replace('.', "_"));
        let mut props = Properties::new();
        props.insert("@type".into(), json!("UpdateAction"));
        props.insert(
            "endDate".into(),
            json!(Local::now().format("%Y-%m-%d").to_string()),
        );
        props.insert("name".into(), json!(format!("Create version {version}")));
        props.insert("actionStatus".into(), id_ref(COMPLETED_STATUS));
        self.graph.add(Entity::new(id, EntityKind::Action, props))
    }

    // -----------------------------------------------------------------------
    // Notebooks
    // -----------------------------------------------------------------------

    /// Notebooks in the working directory that belong in this crate.
    pub fn publishable_notebooks(&self) -> Result<Vec<Notebook>> {
        let mut notebooks = Vec::new();
        for path in find_notebooks(&self.config.crate_path)? {
            let notebook = Notebook::read(&path)?;
            if self.creates_data(&notebook) {
                notebooks.push(notebook);
            } else {
                debug!(notebook = %notebook.file_name(), "notebook creates no data for this crate");
            }
        }
        Ok(notebooks)
    }

    /// Whether a notebook belongs in the crate being built.
    ///
    /// Every notebook belongs in a code crate. In a data crate only notebooks
    /// with a result inside the data repository do.
    pub fn creates_data(&self, notebook: &Notebook) -> bool {
        if !self.is_data_crate() {
            return true;
        }
        let Some(data_repo) = self.data_repo_github() else {
            return false;
        };
        notebook
            .result_urls()
            .iter()
            .any(|url| data_repo.contains_url(url))
    }

    /// Add a notebook entity, its metadata, and its authors to the root.
    #[instrument(skip_all, fields(notebook = %notebook.file_name()))]
    pub async fn add_notebook(&mut self, notebook: &Notebook) -> Result<String> {
        let rel_path = notebook.file_name();
        let web_url = match self.repo.github() {
            Some(gh) => Some(self.fetcher.github().blob_url(&gh, &rel_path).await?),
            None => None,
        };

        let (notebook_id, payload) = match (&web_url, self.is_data_crate()) {
            (Some(url), true) => (url.clone(), None),
            _ => (rel_path.clone(), Some(Payload::Local(PathBuf::from(&rel_path)))),
        };

        let mut metadata = notebook.crate_metadata();
        self.add_repo_link(&mut metadata);

        let mut props = Properties::new();
        props.insert("@type".into(), json!(["File", "SoftwareSourceCode"]));
        props.insert("encodingFormat".into(), json!(NOTEBOOK_FORMAT));
        props.insert("conformsTo".into(), id_ref(NOTEBOOK_PROFILE));
        if let Some(language) = self.add_python_version(notebook) {
            props.insert("programmingLanguage".into(), id_ref(&language));
        }
        if let Some(url) = web_url {
            props.insert("url".into(), json!(url));
        }

        self.graph
            .add(Entity::new(notebook_id.clone(), EntityKind::File, props).with_payload(payload));
        self.update_properties(&notebook_id, &metadata, &[]).await?;
        self.graph.append_ref(ROOT_ID, "hasPart", &notebook_id)?;

        let authors = self
            .graph
            .get(&notebook_id)
            .map(|nb| nb.ref_ids("author"))
            .unwrap_or_default();
        for author in authors {
            self.graph.append_ref(ROOT_ID, "author", &author)?;
        }

        debug!(id = %notebook_id, "notebook added");
        Ok(notebook_id)
    }

    /// Add the Python language entity a notebook was run with.
    ///
    /// The version the notebook's kernel recorded (`language_info.version`) wins
    /// over the local interpreter. The interpreter is asked only when the notebook
    /// has no version, and at most once per run.
    pub(crate) fn add_python_version(&mut self, notebook: &Notebook) -> Option<String> {
        let version = notebook
            .python_version()
            .or_else(|| self.interpreter.get_or_init(interpreter_version).clone());
        let Some(version) = version else {
            warn!(notebook = %notebook.file_name(), "no Python version available");
            return None;
        };

        let id = format!(
            "https://www.python.org/downloads/release/python-{}/",
            version.replace('.', "")
        );
        let mut props = Properties::new();
        props.insert("@type".into(), json!(["ComputerLanguage", "SoftwareApplication"]));
        props.insert("name".into(), json!(format!("Python {version}")));
        props.insert("version".into(), json!(version));
        props.insert("url".into(), json!(id));
        Some(self.graph.add(Entity::new(id.clone(), EntityKind::Context, props)))
    }

    // -----------------------------------------------------------------------
    // Finish
    // -----------------------------------------------------------------------

    /// Set the root licence to the metadata licence.
    pub fn add_metadata_licence(&mut self) -> Result<()> {
        let licence = self.config.licences.get(METADATA_LICENCE_KEY)?.clone();
        let id = self.add_context_entity(licence)?;
        self.graph.entity_mut(ROOT_ID)?.set("license", id_ref(&id));
        Ok(())
    }

    /// Write the graph and its payloads into `crate_dir`.
    pub async fn write(&self, crate_dir: &Path) -> Result<PathBuf> {
        self.graph
            .write(crate_dir, &self.config.crate_path, &self.fetcher)
            .await
    }

    /// Whether an entity already carries a non-empty `name`.
    pub(crate) fn has_name(&self, id: &str) -> bool {
        self.graph
            .get(id)
            .and_then(|e| e.get("name"))
            .is_some_and(is_truthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbcrate_shared::{CrateDefaults, FetchConfig};
    use serde_json::Value;

    use crate::graph::METADATA_FILE;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nbcrate-maker-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn maker(dir: &Path, data_repo: Option<&str>) -> CrateMaker {
        let config = RunConfig {
            crate_path: dir.to_path_buf(),
            data_repo: data_repo.map(String::from),
            ..RunConfig::default()
        };
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let repo = RepoInfo::from_remote("https://github.com/org/notebooks.git");
        CrateMaker::with_parts(config, fetcher, repo)
    }

    fn notebook_with(dir: &Path, name: &str, metadata: Value) -> Notebook {
        let path = dir.join(name);
        let doc = json!({"cells": [], "metadata": metadata, "nbformat": 4, "nbformat_minor": 5});
        std::fs::write(&path, doc.to_string()).unwrap();
        Notebook::read(&path).unwrap()
    }

    #[test]
    fn code_crate_defaults_without_prior_crate() {
        let dir = temp_dir();
        let prepared = maker(&dir, None).prepare();

        assert_eq!(prepared.crate_dir, dir);
        assert_eq!(prepared.root_props["name"], "notebooks");
        assert_eq!(prepared.root_props["description"], "");
        assert_eq!(prepared.root_props["codeRepository"], "https://github.com/org/notebooks");
        assert!(prepared.versions.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn defaults_file_overrides_repo_values() {
        let dir = temp_dir();
        let mut m = maker(&dir, None);
        m.config.defaults = CrateDefaults {
            name: Some("GLAM Workbench".into()),
            description: Some("Notebooks".into()),
            code_repository: Some("https://github.com/glam/workbench".into()),
            ..CrateDefaults::default()
        };
        let prepared = m.prepare();
        assert_eq!(prepared.root_props["name"], "GLAM Workbench");
        assert_eq!(prepared.root_props["codeRepository"], "https://github.com/glam/workbench");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn data_crate_defaults() {
        let dir = temp_dir();
        let prepared = maker(&dir, Some("https://github.com/org/data/")).prepare();

        assert_eq!(prepared.crate_dir, dir.join("data-rocrate"));
        assert_eq!(prepared.root_props["name"], "data");
        assert_eq!(prepared.root_props["isBasedOn"], "https://github.com/org/notebooks");
        assert_eq!(
            prepared.root_props["distribution"],
            "https://github.com/org/data/archive/refs/heads/main.zip"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn prior_crate_values_are_carried() {
        let dir = temp_dir();
        std::fs::copy(
            "../../../fixtures/crates/code/ro-crate-metadata.json",
            dir.join(METADATA_FILE),
        )
        .unwrap();

        let prepared = maker(&dir, None).prepare();
        assert_eq!(prepared.root_props["name"], "GLAM notebooks");
        assert_eq!(prepared.root_props["codeRepository"], "https://github.com/glam/notebooks");
        assert_eq!(prepared.history["version"], "1.0.0");
        assert_eq!(prepared.versions.len(), 1);
        assert_eq!(prepared.versions[0].id(), "create_version_1_0_0");

        let keys: Vec<&str> = prepared.entities.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["mainEntityOfPage", "license"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn update_action_ids_replace_dots() {
        let dir = temp_dir();
        let mut m = maker(&dir, None);
        let id = m.add_version("1.2.0").unwrap();

        assert_eq!(id, "create_version_1_2_0");
        let action = m.graph().get(&id).unwrap();
        assert!(action.has_type("UpdateAction"));
        assert_eq!(action.get("name"), Some(&json!("Create version 1.2.0")));
        assert_eq!(action.get("actionStatus"), Some(&id_ref(COMPLETED_STATUS)));
        assert_eq!(m.graph().root().unwrap().get("version"), Some(&json!("1.2.0")));
        assert!(m.graph().root().unwrap().get("mentions").is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn python_version_entity_from_kernel() {
        let dir = temp_dir();
        let mut m = maker(&dir, None);
        let nb = notebook_with(
            &dir,
            "a.ipynb",
            json!({"language_info": {"name": "python", "version": "3.11.4"}}),
        );

        let id = m.add_python_version(&nb).unwrap();
        assert_eq!(id, "https://www.python.org/downloads/release/python-3114/");
        let language = m.graph().get(&id).unwrap();
        assert!(language.has_type("ComputerLanguage"));
        assert_eq!(language.get("name"), Some(&json!("Python 3.11.4")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn python_version_falls_back_to_interpreter() {
        let dir = temp_dir();
        let mut m = maker(&dir, None);
        m.interpreter.set(Some("3.12.1".to_string())).unwrap();

        let bare = notebook_with(&dir, "b.ipynb", json!({}));
        let id = m.add_python_version(&bare).unwrap();
        assert_eq!(id, "https://www.python.org/downloads/release/python-3121/");
        assert_eq!(m.graph().get(&id).unwrap().get("version"), Some(&json!("3.12.1")));

        let kernel = notebook_with(
            &dir,
            "c.ipynb",
            json!({"language_info": {"name": "python", "version": "3.10.2"}}),
        );
        assert_eq!(
            m.add_python_version(&kernel).as_deref(),
            Some("https://www.python.org/downloads/release/python-3102/")
        );

        m.interpreter = OnceLock::from(None);
        assert!(m.add_python_version(&bare).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn data_crates_only_take_notebooks_writing_to_the_data_repo() {
        let dir = temp_dir();
        let writes = notebook_with(
            &dir,
            "harvest.ipynb",
            json!({"rocrate": {"action": [{"result": [{"url": "https://github.com/org/data/blob/main/out.csv"}]}]}}),
        );
        let elsewhere = notebook_with(
            &dir,
            "explore.ipynb",
            json!({"rocrate": {"action": [{"result": [{"url": "https://github.com/org/other/blob/main/out.csv"}]}]}}),
        );

        let data = maker(&dir, Some("https://github.com/org/data"));
        assert!(data.creates_data(&writes));
        assert!(!data.creates_data(&elsewhere));

        let code = maker(&dir, None);
        assert!(code.creates_data(&elsewhere));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
