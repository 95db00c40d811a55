//! Property merging and contextual entity construction.
//!
//! Metadata records are merged onto entities key by key. Keys naming a
//! relation to another entity ([`EntityProperty`]) are turned into entities of
//! their own and stored as `{"@id": ...}` references; everything else is
//! copied verbatim.

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use nbcrate_shared::{
    CrateError, PersonRecord, Properties, Result, delistify, id_refs, is_truthy, listify,
};

use crate::graph::{Entity, EntityKind};
use crate::maker::CrateMaker;

/// Name given to repository zip downloads.
const DOWNLOAD_NAME: &str = "Download repository as zip";

/// Media type of repository zip downloads.
const DOWNLOAD_FORMAT: &str = "application/zip";

/// Properties whose values become linked entities rather than literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityProperty {
    Author,
    Action,
    WorkExample,
    MainEntityOfPage,
    SubjectOf,
    IsBasedOn,
    Distribution,
    IsPartOf,
    License,
}

impl EntityProperty {
    pub const ALL: [Self; 9] = [
        Self::Author,
        Self::Action,
        Self::WorkExample,
        Self::MainEntityOfPage,
        Self::SubjectOf,
        Self::IsBasedOn,
        Self::Distribution,
        Self::IsPartOf,
        Self::License,
    ];

    /// The JSON-LD property name.
    pub fn key(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Action => "action",
            Self::WorkExample => "workExample",
            Self::MainEntityOfPage => "mainEntityOfPage",
            Self::SubjectOf => "subjectOf",
            Self::IsBasedOn => "isBasedOn",
            Self::Distribution => "distribution",
            Self::IsPartOf => "isPartOf",
            Self::License => "license",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.key() == key)
    }
}

impl CrateMaker {
    /// Merge `updates` onto the entity `entity_id`.
    ///
    /// Relation keys are materialized as entities. `@`-prefixed keys and keys in
    /// `exclude` are skipped.
    pub(crate) async fn update_properties(
        &mut self,
        entity_id: &str,
        updates: &Properties,
        exclude: &[&str],
    ) -> Result<()> {
        for (key, value) in updates {
            if let Some(property) = EntityProperty::from_key(key) {
                Box::pin(self.add_entities(entity_id, property, listify(value.clone()))).await?;
            } else if !key.starts_with('@') && !exclude.contains(&key.as_str()) {
                self.graph.entity_mut(entity_id)?.set(key, value.clone());
            }
        }
        Ok(())
    }

    /// Build the entities for one relation of `record_id` and link them.
    ///
    /// Actions are linked from the root's `mentions` instead of from the record.
    #[instrument(skip(self, property, values), fields(property = property.key()))]
    pub(crate) async fn add_entities(
        &mut self,
        record_id: &str,
        property: EntityProperty,
        values: Vec<Value>,
    ) -> Result<()> {
        let added = match property {
            EntityProperty::Author => self.add_people(values).await?,
            EntityProperty::Action => {
                self.add_actions(record_id, values).await?;
                return Ok(());
            }
            EntityProperty::License => self.add_licences(values)?,
            EntityProperty::IsBasedOn => self.add_pages(values, "SoftwareSourceCode").await?,
            EntityProperty::Distribution => self.add_downloads(values),
            EntityProperty::WorkExample
            | EntityProperty::MainEntityOfPage
            | EntityProperty::SubjectOf
            | EntityProperty::IsPartOf => self.add_pages(values, "CreativeWork").await?,
        };

        if !added.is_empty() {
            self.graph
                .entity_mut(record_id)?
                .set(property.key(), delistify(id_refs(&added)));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // People
    // -----------------------------------------------------------------------

    /// Add `Person` entities, merging extra record keys onto them.
    ///
    /// A bare string is taken as the person's name.
    pub(crate) async fn add_people(&mut self, people: Vec<Value>) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for value in people {
            let record = match value {
                Value::String(name) => object(json!({ "name": name })),
                Value::Object(record) => record,
                other => {
                    return Err(CrateError::validation(format!(
                        "invalid author record {other}"
                    )));
                }
            };
            let person = PersonRecord::from_value(&Value::Object(record.clone()))?;
            let id = person.entity_id();

            if !self.graph.contains(&id) {
                let mut props = Properties::new();
                props.insert("@type".into(), json!("Person"));
                props.insert("name".into(), json!(person.name));
                self.graph.add(Entity::new(id.clone(), EntityKind::Person, props));
            }
            self.update_properties(&id, &record, &["orcid"]).await?;
            added.push(id);
        }
        Ok(added)
    }

    // -----------------------------------------------------------------------
    // Pages
    // -----------------------------------------------------------------------

    /// Add page-like entities identified by URL.
    pub(crate) async fn add_pages(
        &mut self,
        pages: Vec<Value>,
        page_type: &str,
    ) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for page in pages.into_iter().filter(is_truthy) {
            added.push(self.add_page(page, page_type).await?);
        }
        Ok(added)
    }

    /// Add one page. A string value is the page URL.
    ///
    /// A supplied `name` always wins. Without one an existing name is kept, and
    /// only unnamed pages get the fetched HTML title.
    async fn add_page(&mut self, page: Value, page_type: &str) -> Result<String> {
        let record = match page {
            Value::String(url) => object(json!({ "url": url })),
            Value::Object(record) => record,
            other => {
                return Err(CrateError::validation(format!("invalid page record {other}")));
            }
        };
        let url = record
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| CrateError::validation(format!("page record without url: {record:?}")))?
            .to_string();

        if !self.graph.contains(&url) {
            let mut props = Properties::new();
            props.insert("@type".into(), json!(page_type));
            props.insert("url".into(), json!(url));
            self.graph.add(Entity::new(url.clone(), EntityKind::Context, props));
        }
        self.update_properties(&url, &record, &[]).await?;

        if !self.has_name(&url) {
            match self.fetcher.page_title(&url).await? {
                Some(title) => self.graph.entity_mut(&url)?.set("name", json!(title)),
                None => debug!(%url, "page has no title"),
            }
        }
        Ok(url)
    }

    // -----------------------------------------------------------------------
    // Licences and downloads
    // -----------------------------------------------------------------------

    /// Add licence entities looked up by key in the licence table.
    pub(crate) fn add_licences(&mut self, keys: Vec<Value>) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for key in keys {
            let Some(key) = key.as_str() else {
                return Err(CrateError::validation(format!("invalid licence key {key}")));
            };
            let licence = self.config.licences.get(key)?.clone();
            added.push(self.add_context_entity(licence)?);
        }
        Ok(added)
    }

    /// Add `DataDownload` entities for zip URLs.
    pub(crate) fn add_downloads(&mut self, urls: Vec<Value>) -> Vec<String> {
        let mut added = Vec::new();
        for url in urls {
            let Some(url) = url.as_str().filter(|u| !u.is_empty()) else {
                warn!(%url, "skipping invalid download url");
                continue;
            };
            let mut props = Properties::new();
            props.insert("@type".into(), json!("DataDownload"));
            props.insert("name".into(), json!(DOWNLOAD_NAME));
            props.insert("encodingFormat".into(), json!(DOWNLOAD_FORMAT));
            props.insert("url".into(), json!(url));
            props.insert("contentUrl".into(), json!(url));
            added.push(self.graph.add(Entity::new(url, EntityKind::Context, props)));
        }
        added
    }

    /// Add a contextual entity from a full definition carrying its own `@id`.
    pub(crate) fn add_context_entity(&mut self, definition: Properties) -> Result<String> {
        let id = definition
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| CrateError::validation("contextual entity without @id"))?
            .to_string();
        Ok(self.graph.add(Entity::new(id, EntityKind::Context, definition)))
    }
}

fn object(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}
