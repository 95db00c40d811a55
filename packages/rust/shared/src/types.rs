//! JSON-LD value helpers and raw metadata record types.
//!
//! Entity properties are kept as plain `serde_json` maps. These helpers keep
//! property values canonical: a single reference is stored as a scalar, several
//! references as a list.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::error::{CrateError, Result};

/// Property bag of a JSON-LD entity (everything except `@id`).
pub type Properties = Map<String, Value>;

/// ORCID resolver prefix used for bare identifiers.
const ORCID_PREFIX: &str = "https://orcid.org/";

// ---------------------------------------------------------------------------
// listify / delistify
// ---------------------------------------------------------------------------

/// Wrap a non-list value in a one-element list. Lists pass through unchanged.
pub fn listify(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Collapse a list whose elements are all equal to its first element.
///
/// An empty list stays an empty list.
pub fn delistify(mut values: Vec<Value>) -> Value {
    let collapses = match values.first() {
        Some(first) => values.iter().all(|v| v == first),
        None => false,
    };
    if collapses {
        values.swap_remove(0)
    } else {
        Value::Array(values)
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Build a `{"@id": ...}` reference.
pub fn id_ref(id: &str) -> Value {
    json!({ "@id": id })
}

/// Build a list of `{"@id": ...}` references, preserving order.
pub fn id_refs<S: AsRef<str>>(ids: &[S]) -> Vec<Value> {
    ids.iter().map(|id| id_ref(id.as_ref())).collect()
}

/// Return the `@id` of a reference value, if it is one.
pub fn ref_id(value: &Value) -> Option<&str> {
    value.get("@id").and_then(Value::as_str)
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// PersonRecord
// ---------------------------------------------------------------------------

/// The identity-bearing part of an author record (`{"name": ..., "orcid": ...}`).
///
/// Any other keys in the raw record are merged onto the person entity as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersonRecord {
    /// Display name, conventionally `"Surname, Givenname"`.
    pub name: String,
    /// ORCID, either bare (`0000-0002-...`) or as a URL.
    #[serde(default)]
    pub orcid: Option<String>,
}

impl PersonRecord {
    /// Parse the identity fields out of a raw author record.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| CrateError::validation(format!("invalid author record {value}: {e}")))
    }

    /// The `@id` this person is stored under.
    pub fn entity_id(&self) -> String {
        match self.orcid.as_deref() {
            Some(orcid) if orcid.starts_with("http") => orcid.to_string(),
            Some(orcid) if !orcid.is_empty() => format!("{ORCID_PREFIX}{orcid}"),
            _ => format!("#{}", self.name.replace(", ", "_")),
        }
    }
}
