//! `CreateAction` entities describing notebook runs.

use chrono::{DateTime, FixedOffset};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use nbcrate_shared::{CrateError, Properties, Result, delistify, id_ref, id_refs, listify};

use crate::graph::{Entity, EntityKind, ROOT_ID};
use crate::maker::{COMPLETED_STATUS, CrateMaker};

/// Action keys holding file records.
const FILE_RELATIONS: [&str; 2] = ["result", "object"];

impl CrateMaker {
    /// Add one `CreateAction` per action record of a notebook.
    ///
    /// Actions are mentioned by the root dataset; the notebook is their
    /// instrument. `endDate` is the latest modification time of the results.
    #[instrument(skip(self, actions), fields(count = actions.len()))]
    pub(crate) async fn add_actions(
        &mut self,
        notebook_id: &str,
        actions: Vec<Value>,
    ) -> Result<Vec<String>> {
        let file_name = notebook_file_name(notebook_id);
        let stem = file_name.strip_suffix(".ipynb").unwrap_or(file_name);

        let mut added = Vec::new();
        for (index, action) in actions.into_iter().enumerate() {
            let Value::Object(record) = action else {
                return Err(CrateError::validation(format!(
                    "action {index} of {notebook_id} is not an object"
                )));
            };
            let action_id = format!("#{stem}_run_{index}");

            let mut props = Properties::new();
            props.insert("@type".into(), json!("CreateAction"));
            props.insert("instrument".into(), id_ref(notebook_id));
            props.insert("actionStatus".into(), id_ref(COMPLETED_STATUS));
            props.insert("name".into(), json!(format!("Run of notebook: {file_name}")));

            let mut result_dates = Vec::new();
            for relation in FILE_RELATIONS {
                let files = self.filter_files(&record, relation);
                let file_ids = self.add_files(files).await?;
                if file_ids.is_empty() {
                    continue;
                }
                if relation == "result" {
                    result_dates.extend(file_ids.iter().filter_map(|id| {
                        self.graph
                            .get(id)
                            .and_then(|file| file.get("dateModified"))
                            .and_then(Value::as_str)
                            .map(String::from)
                    }));
                }
                props.insert(relation.into(), delistify(id_refs(&file_ids)));
            }
            if let Some(end_date) = latest_timestamp(&result_dates)? {
                props.insert("endDate".into(), json!(end_date));
            }

            self.graph.add(Entity::new(action_id.clone(), EntityKind::Action, props));
            self.update_properties(&action_id, &record, &FILE_RELATIONS).await?;
            self.graph.append_ref(ROOT_ID, "mentions", &action_id)?;
            debug!(id = %action_id, "action added");
            added.push(action_id);
        }
        Ok(added)
    }

    /// File records of one relation that belong in the crate being built.
    ///
    /// A data crate only keeps files whose URL lies inside the data repository.
    pub(crate) fn filter_files(&self, action: &Properties, relation: &str) -> Vec<Value> {
        let files = action.get(relation).cloned().map(listify).unwrap_or_default();
        if !self.is_data_crate() {
            return files;
        }
        let Some(data_repo) = self.data_repo_github() else {
            return Vec::new();
        };
        files
            .into_iter()
            .filter(|file| {
                file.get("url")
                    .and_then(Value::as_str)
                    .is_some_and(|url| data_repo.contains_url(url))
            })
            .collect()
    }
}

/// Last path segment of a notebook id (a relative path or a blob URL).
fn notebook_file_name(notebook_id: &str) -> &str {
    notebook_id.rsplit('/').next().unwrap_or(notebook_id)
}

/// The latest of a set of RFC 3339 timestamps, compared as instants.
///
/// Returns the original string of the latest one. Malformed timestamps are errors.
pub(crate) fn latest_timestamp(timestamps: &[String]) -> Result<Option<String>> {
    let mut latest: Option<(DateTime<FixedOffset>, &String)> = None;
    for raw in timestamps {
        let instant = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| CrateError::parse(format!("invalid timestamp '{raw}': {e}")))?;
        if latest.is_none_or(|(current, _)| instant > current) {
            latest = Some((instant, raw));
        }
    }
    Ok(latest.map(|(_, raw)| raw.clone()))
}
