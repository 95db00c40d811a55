//! In-memory RO-Crate graph.
//!
//! A flat, insertion-ordered collection of entities keyed by `@id`, with the
//! metadata descriptor and the root dataset always present. Adding an entity
//! whose `@id` already exists merges its properties into the stored one.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use nbcrate_fetch::Fetcher;
use nbcrate_shared::{CrateError, Properties, Result, delistify, id_ref, listify, ref_id};

/// `@id` of the root dataset.
pub const ROOT_ID: &str = "./";

/// File name (and `@id`) of the crate metadata descriptor.
pub const METADATA_FILE: &str = "ro-crate-metadata.json";

/// JSON-LD context of RO-Crate 1.1.
const CONTEXT: &str = "https://w3id.org/ro/crate/1.1/context";

/// Specification the metadata descriptor conforms to.
const CRATE_PROFILE: &str = "https://w3id.org/ro/crate/1.1";

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Coarse classification of an entity, inferred from its `@type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// The `ro-crate-metadata.json` descriptor.
    Metadata,
    /// The root dataset (`./`).
    Root,
    Person,
    /// `File` / `Dataset` data entities.
    File,
    /// `CreateAction`, `UpdateAction`, ...
    Action,
    /// Any other contextual entity (pages, licences, languages, downloads).
    Context,
}

impl EntityKind {
    /// Classify an entity loaded from an existing crate.
    pub fn infer(id: &str, types: Option<&Value>) -> Self {
        if id == METADATA_FILE {
            return Self::Metadata;
        }
        if id == ROOT_ID {
            return Self::Root;
        }
        let types: Vec<&str> = types
            .cloned()
            .map(listify)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(|t| match t {
                "Person" => "Person",
                "File" | "Dataset" | "MediaObject" => "File",
                t if t.ends_with("Action") => "Action",
                _ => "",
            })
            .collect();
        if types.contains(&"Person") {
            Self::Person
        } else if types.contains(&"File") {
            Self::File
        } else if types.contains(&"Action") {
            Self::Action
        } else {
            Self::Context
        }
    }
}

/// Where the content of a file entity comes from when the crate is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Copy from this path (relative to the working directory).
    Local(PathBuf),
    /// Download from this URL.
    Remote(String),
}

/// A single node of the crate graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: String,
    kind: EntityKind,
    properties: Properties,
    payload: Option<Payload>,
}

impl Entity {
    /// Create an entity. An `@id` key in `properties` is dropped in favour of `id`.
    pub fn new(id: impl Into<String>, kind: EntityKind, mut properties: Properties) -> Self {
        properties.remove("@id");
        Self {
            id: id.into(),
            kind,
            properties,
            payload: None,
        }
    }

    /// Attach (or clear) the payload source of a file entity.
    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Overwrite a property.
    pub fn set(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }

    /// Whether `@type` is, or includes, `type_name`.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.properties
            .get("@type")
            .cloned()
            .map(listify)
            .is_some_and(|types| types.iter().any(|t| t.as_str() == Some(type_name)))
    }

    /// Ids referenced by a property, in order.
    pub fn ref_ids(&self, key: &str) -> Vec<String> {
        self.properties
            .get(key)
            .cloned()
            .map(listify)
            .unwrap_or_default()
            .iter()
            .filter_map(ref_id)
            .map(String::from)
            .collect()
    }

    fn to_jsonld(&self) -> Value {
        let mut node = Properties::new();
        node.insert("@id".into(), Value::String(self.id.clone()));
        node.extend(self.properties.clone());
        Value::Object(node)
    }

    fn from_jsonld(node: &Value) -> Option<Self> {
        let Value::Object(props) = node else {
            return None;
        };
        let id = props.get("@id")?.as_str()?.to_string();
        let kind = EntityKind::infer(&id, props.get("@type"));
        Some(Self::new(id, kind, props.clone()))
    }

    /// Output position class: descriptor, root, data entities, then contextual ones.
    fn rank(&self) -> u8 {
        match self.kind {
            EntityKind::Metadata => 0,
            EntityKind::Root => 1,
            EntityKind::File => 2,
            EntityKind::Person => 3,
            EntityKind::Action => 4,
            EntityKind::Context => 5,
        }
    }

    /// Merge another entity's properties into this one; incoming values win.
    fn merge(&mut self, other: Entity) {
        self.properties.extend(other.properties);
        if other.payload.is_some() {
            self.payload = other.payload;
        }
    }
}

// ---------------------------------------------------------------------------
// CrateGraph
// ---------------------------------------------------------------------------

/// The JSON-LD graph of one crate.
#[derive(Debug, Clone)]
pub struct CrateGraph {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
}

impl Default for CrateGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CrateGraph {
    /// A new crate holding only the metadata descriptor and an empty root dataset.
    pub fn new() -> Self {
        let mut graph = Self {
            entities: Vec::new(),
            index: HashMap::new(),
        };
        graph.add(Entity::new(
            METADATA_FILE,
            EntityKind::Metadata,
            object(json!({
                "@type": "CreativeWork",
                "conformsTo": id_ref(CRATE_PROFILE),
                "about": id_ref(ROOT_ID),
            })),
        ));
        graph.add(Entity::new(
            ROOT_ID,
            EntityKind::Root,
            object(json!({
                "@type": "Dataset",
                "datePublished": Utc::now().to_rfc3339(),
            })),
        ));
        graph
    }

    /// Insert an entity, or merge it into the existing entity with the same `@id`.
    ///
    /// Returns the entity's id.
    pub fn add(&mut self, entity: Entity) -> String {
        let id = entity.id.clone();
        match self.index.get(&id) {
            Some(&pos) => {
                debug!(%id, "merging into existing entity");
                self.entities[pos].merge(entity);
            }
            None => {
                self.index.insert(id.clone(), self.entities.len());
                self.entities.push(entity);
            }
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).map(|&pos| &self.entities[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Mutable access to an entity that must exist.
    pub fn entity_mut(&mut self, id: &str) -> Result<&mut Entity> {
        match self.index.get(id) {
            Some(&pos) => Ok(&mut self.entities[pos]),
            None => Err(CrateError::validation(format!("no entity with @id '{id}'"))),
        }
    }

    pub fn root(&self) -> Option<&Entity> {
        self.get(ROOT_ID)
    }

    /// Entities whose `@type` includes `type_name`.
    pub fn by_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.entities.iter().filter(move |e| e.has_type(type_name))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Append a reference to `target_id` under `key` of `entity_id`, unless already present.
    ///
    /// The stored value stays canonical: one reference is a scalar, more are a list.
    pub fn append_ref(&mut self, entity_id: &str, key: &str, target_id: &str) -> Result<()> {
        let entity = self.entity_mut(entity_id)?;
        let mut refs = entity.get(key).cloned().map(listify).unwrap_or_default();
        if !refs.iter().any(|r| ref_id(r) == Some(target_id)) {
            refs.push(id_ref(target_id));
        }
        entity.set(key, delistify(refs));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// The full JSON-LD document.
    ///
    /// The descriptor and root come first, then every other entity ordered by `@id`,
    /// so the output does not depend on the order entities were added in.
    pub fn to_jsonld(&self) -> Value {
        let mut ordered: Vec<&Entity> = self.entities.iter().collect();
        ordered.sort_by(|a, b| (a.rank(), a.id.as_str()).cmp(&(b.rank(), b.id.as_str())));
        let graph: Vec<Value> = ordered.into_iter().map(Entity::to_jsonld).collect();
        json!({
            "@context": CONTEXT,
            "@graph": graph,
        })
    }

    /// Parse a JSON-LD document. The graph must contain a root dataset.
    pub fn from_jsonld(doc: &Value) -> Result<Self> {
        let nodes = doc
            .get("@graph")
            .and_then(Value::as_array)
            .ok_or_else(|| CrateError::parse("crate metadata has no @graph array"))?;

        let root_id = nodes
            .iter()
            .find(|n| n.get("@id").and_then(Value::as_str) == Some(METADATA_FILE))
            .and_then(|n| n.get("about"))
            .and_then(ref_id)
            .unwrap_or(ROOT_ID)
            .to_string();

        let mut graph = Self {
            entities: Vec::new(),
            index: HashMap::new(),
        };
        for node in nodes {
            match Entity::from_jsonld(node) {
                Some(mut entity) => {
                    if entity.id == root_id {
                        entity.id = ROOT_ID.to_string();
                        entity.kind = EntityKind::Root;
                    }
                    graph.add(entity);
                }
                None => warn!(%node, "skipping graph node without @id"),
            }
        }

        if graph.root().is_none() {
            return Err(CrateError::parse("crate metadata has no root dataset"));
        }
        Ok(graph)
    }

    /// Load the crate in `dir`. A missing or malformed crate is `None`.
    pub fn load(dir: &Path) -> Option<Self> {
        let path = dir.join(METADATA_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no prior crate");
                return None;
            }
        };
        let parsed = serde_json::from_str::<Value>(&content)
            .map_err(|e| CrateError::parse(e.to_string()))
            .and_then(|doc| Self::from_jsonld(&doc));
        match parsed {
            Ok(graph) => {
                debug!(path = %path.display(), entities = graph.len(), "loaded prior crate");
                Some(graph)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed prior crate");
                None
            }
        }
    }

    /// Write payload files and `ro-crate-metadata.json` into `crate_dir`.
    ///
    /// Local payload paths are resolved against `source_dir`. Returns the path of
    /// the metadata file.
    #[instrument(skip_all, fields(crate_dir = %crate_dir.display()))]
    pub async fn write(
        &self,
        crate_dir: &Path,
        source_dir: &Path,
        fetcher: &Fetcher,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(crate_dir).map_err(|e| CrateError::io(crate_dir, e))?;

        let mut payloads = 0;
        for entity in &self.entities {
            if entity.kind != EntityKind::File {
                continue;
            }
            let Some(payload) = &entity.payload else {
                continue;
            };
            if !is_contained_path(&entity.id) {
                warn!(id = %entity.id, "payload id escapes the crate directory, not writing it");
                continue;
            }
            let dest = crate_dir.join(&entity.id);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CrateError::io(parent, e))?;
            }
            match payload {
                Payload::Local(path) => {
                    let src = source_dir.join(path);
                    if same_file(&src, &dest) {
                        continue;
                    }
                    std::fs::copy(&src, &dest).map_err(|e| CrateError::io(&src, e))?;
                    debug!(src = %src.display(), dest = %dest.display(), "copied payload");
                }
                Payload::Remote(url) => {
                    let bytes = fetcher.download(url).await?;
                    std::fs::write(&dest, bytes).map_err(|e| CrateError::io(&dest, e))?;
                    debug!(%url, dest = %dest.display(), "fetched payload");
                }
            }
            payloads += 1;
        }

        let metadata_path = crate_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(&self.to_jsonld())
            .map_err(|e| CrateError::validation(format!("JSON serialization failed: {e}")))?;
        std::fs::write(&metadata_path, json).map_err(|e| CrateError::io(&metadata_path, e))?;

        info!(
            entities = self.entities.len(),
            payloads,
            path = %metadata_path.display(),
            "crate written"
        );
        Ok(metadata_path)
    }
}

fn object(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}

/// Relative path without `..` or root components.
fn is_contained_path(id: &str) -> bool {
    !id.contains("://")
        && Path::new(id)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbcrate_shared::FetchConfig;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("nbcrate-graph-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn person(id: &str, name: &str) -> Entity {
        Entity::new(id, EntityKind::Person, object(json!({"@type": "Person", "name": name})))
    }

    #[test]
    fn new_graph_has_descriptor_and_root() {
        let graph = CrateGraph::new();
        assert_eq!(graph.len(), 2);
        let root = graph.root().unwrap();
        assert!(root.has_type("Dataset"));
        assert!(root.get("datePublished").is_some());
        let descriptor = graph.get(METADATA_FILE).unwrap();
        assert_eq!(descriptor.get("about"), Some(&id_ref(ROOT_ID)));
    }

    #[test]
    fn add_merges_duplicates() {
        let mut graph = CrateGraph::new();
        graph.add(person("#Smith_J", "Smith, J"));
        let mut update = person("#Smith_J", "Smith, John");
        update.set("affiliation", json!("ANU"));
        graph.add(update);

        assert_eq!(graph.len(), 3);
        let merged = graph.get("#Smith_J").unwrap();
        assert_eq!(merged.get("name"), Some(&json!("Smith, John")));
        assert_eq!(merged.get("affiliation"), Some(&json!("ANU")));
        assert_eq!(merged.kind(), EntityKind::Person);
    }

    #[test]
    fn append_ref_skips_existing_and_stays_canonical() {
        let mut graph = CrateGraph::new();
        graph.append_ref(ROOT_ID, "author", "#a").unwrap();
        assert_eq!(graph.root().unwrap().get("author"), Some(&id_ref("#a")));

        graph.append_ref(ROOT_ID, "author", "#b").unwrap();
        graph.append_ref(ROOT_ID, "author", "#a").unwrap();
        assert_eq!(graph.root().unwrap().ref_ids("author"), vec!["#a", "#b"]);
    }

    #[test]
    fn entity_mut_requires_existing_entity() {
        let mut graph = CrateGraph::new();
        assert!(graph.entity_mut("#nobody").is_err());
    }

    #[test]
    fn kind_inference() {
        assert_eq!(EntityKind::infer("#x", Some(&json!("Person"))), EntityKind::Person);
        assert_eq!(EntityKind::infer("a.csv", Some(&json!(["File", "Dataset"]))), EntityKind::File);
        assert_eq!(EntityKind::infer("#run", Some(&json!("CreateAction"))), EntityKind::Action);
        assert_eq!(
            EntityKind::infer("https://x", Some(&json!("CreativeWork"))),
            EntityKind::Context
        );
        assert_eq!(EntityKind::infer("./", None), EntityKind::Root);
    }

    #[test]
    fn output_groups_entities_by_kind() {
        let mut graph = CrateGraph::new();
        graph.add(Entity::new(
            "https://creativecommons.org/publicdomain/zero/1.0/",
            EntityKind::Context,
            object(json!({"@type": "CreativeWork"})),
        ));
        graph.add(Entity::new("#harvest_run_0", EntityKind::Action, Properties::new()));
        graph.add(person("#Smith_J", "Smith, J"));
        graph.add(Entity::new("b.csv", EntityKind::File, Properties::new()));
        graph.add(Entity::new("a.csv", EntityKind::File, Properties::new()));

        let doc = graph.to_jsonld();
        let ids: Vec<&str> = doc["@graph"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|node| node["@id"].as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                METADATA_FILE,
                ROOT_ID,
                "a.csv",
                "b.csv",
                "#Smith_J",
                "#harvest_run_0",
                "https://creativecommons.org/publicdomain/zero/1.0/",
            ]
        );
    }

    #[tokio::test]
    async fn only_file_entities_write_payloads() {
        let source = temp_dir();
        let crate_dir = source.join("data-rocrate");
        std::fs::write(source.join("notes.txt"), "n").unwrap();

        let mut graph = CrateGraph::new();
        graph.add(
            Entity::new("notes.txt", EntityKind::Context, Properties::new())
                .with_payload(Some(Payload::Local(PathBuf::from("notes.txt")))),
        );

        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        graph.write(&crate_dir, &source, &fetcher).await.unwrap();
        assert!(crate_dir.join(METADATA_FILE).exists());
        assert!(!crate_dir.join("notes.txt").exists());

        let _ = std::fs::remove_dir_all(&source);
    }

    #[test]
    fn fixture_crate_parses() {
        let content =
            std::fs::read_to_string("../../../fixtures/crates/code/ro-crate-metadata.json")
                .expect("read crate fixture");
        let doc: Value = serde_json::from_str(&content).unwrap();
        let graph = CrateGraph::from_jsonld(&doc).unwrap();

        let root = graph.root().unwrap();
        assert_eq!(root.get("name"), Some(&json!("GLAM notebooks")));
        assert_eq!(graph.by_type("UpdateAction").count(), 1);
        assert_eq!(graph.get("#Smith_J").unwrap().kind(), EntityKind::Person);
    }

    #[test]
    fn load_treats_missing_and_malformed_as_absent() {
        let dir = temp_dir();
        assert!(CrateGraph::load(&dir).is_none());

        std::fs::write(dir.join(METADATA_FILE), "{\"@graph\": 3").unwrap();
        assert!(CrateGraph::load(&dir).is_none());

        std::fs::write(dir.join(METADATA_FILE), r#"{"@graph": [{"@id": "x.csv"}]}"#).unwrap();
        assert!(CrateGraph::load(&dir).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn write_then_load_preserves_entities() {
        let source = temp_dir();
        let crate_dir = source.join("data-rocrate");
        std::fs::write(source.join("out.csv"), "a\n1\n").unwrap();

        let mut graph = CrateGraph::new();
        graph.add(person("#Smith_J", "Smith, J"));
        graph.add(
            Entity::new("out.csv", EntityKind::File, object(json!({"@type": ["File", "Dataset"]})))
                .with_payload(Some(Payload::Local(PathBuf::from("out.csv")))),
        );

        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let path = graph.write(&crate_dir, &source, &fetcher).await.unwrap();
        assert_eq!(path, crate_dir.join(METADATA_FILE));
        assert_eq!(std::fs::read_to_string(crate_dir.join("out.csv")).unwrap(), "a\n1\n");

        let loaded = CrateGraph::load(&crate_dir).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.get("out.csv").unwrap().kind(), EntityKind::File);
        assert_eq!(loaded.get("#Smith_J").unwrap().get("name"), Some(&json!("Smith, J")));

        let _ = std::fs::remove_dir_all(&source);
    }

    #[test]
    fn payload_paths_must_stay_inside_crate() {
        assert!(is_contained_path("data/out.csv"));
        assert!(is_contained_path("./out.csv"));
        assert!(!is_contained_path("../out.csv"));
        assert!(!is_contained_path("/etc/passwd"));
        assert!(!is_contained_path("https://example.com/out.csv"));
    }
}
