//! File entities for action inputs and outputs.

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use url::Url;

use nbcrate_discovery::GitHubRepo;
use nbcrate_fetch::local_file_stats;
use nbcrate_shared::{Properties, Result, is_truthy};

use crate::graph::{Entity, EntityKind, Payload, ROOT_ID};
use crate::maker::CrateMaker;

impl CrateMaker {
    /// Add `File` entities for the records of one action relation.
    ///
    /// Each record may carry a `url`, a `localPath`, or both; records with
    /// neither are skipped. A URL identifies the file in a code crate. In a data
    /// crate the file is stored in the crate itself, under its local path or,
    /// for remote-only files, its URL basename.
    #[instrument(skip_all, fields(count = files.len()))]
    pub(crate) async fn add_files(&mut self, files: Vec<Value>) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for file in files {
            let mut record = match file {
                Value::Object(record) => record,
                other => {
                    warn!(record = %other, "skipping file record that is not an object");
                    continue;
                }
            };
            let url = string_field(&record, "url");
            let local_path = string_field(&record, "localPath");

            let stats = match (&local_path, &url) {
                (Some(path), _) => local_file_stats(&self.resolve(path))?,
                (None, Some(url)) => self.fetcher.web_file_stats(url).await?,
                (None, None) => {
                    debug!("skipping file record without url or localPath");
                    continue;
                }
            };

            let (file_id, default_name, payload) = match (url, local_path) {
                (Some(url), local) => {
                    let name = url_basename(&url);
                    match (self.is_data_crate(), local) {
                        (true, Some(path)) => {
                            (path.clone(), name, Some(Payload::Local(path.into())))
                        }
                        (true, None) => (name.clone(), name, Some(Payload::Remote(url))),
                        (false, _) => (url, name, None),
                    }
                }
                (None, Some(path)) => (
                    path.clone(),
                    path_basename(&path),
                    Some(Payload::Local(path.into())),
                ),
                (None, None) => continue,
            };

            self.add_repo_link(&mut record);

            let mut props = Properties::new();
            props.insert("@type".into(), json!(["File", "Dataset"]));
            props.insert("name".into(), json!(default_name));
            props.extend(stats.into_properties());

            self.graph
                .add(Entity::new(file_id.clone(), EntityKind::File, props).with_payload(payload));
            self.update_properties(&file_id, &record, &["localPath"]).await?;
            self.graph.append_ref(ROOT_ID, "hasPart", &file_id)?;
            added.push(file_id);
        }
        Ok(added)
    }

    /// Set `isPartOf` on a metadata record that lacks one.
    ///
    /// A record with a GitHub `url` is part of that repository; anything else is
    /// part of the local code repository.
    pub(crate) fn add_repo_link(&self, record: &mut Properties) {
        if record.get("isPartOf").is_some_and(is_truthy) {
            return;
        }
        let link = match string_field(record, "url") {
            Some(url) => GitHubRepo::from_url(&url).map(|gh| gh.html_url()),
            None => Some(self.repo.url.clone()).filter(|url| !url.is_empty()),
        };
        if let Some(link) = link {
            record.insert("isPartOf".into(), json!(link));
        }
    }
}

fn string_field(record: &Properties, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Last path segment of a URL, ignoring query and fragment.
fn url_basename(url: &str) -> String {
    let from_path = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(String::from))
            .filter(|segment| !segment.is_empty())
    });
    from_path.unwrap_or_else(|| path_basename(url))
}

fn path_basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}
