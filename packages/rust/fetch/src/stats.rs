//! Size and modification metadata for files.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use nbcrate_shared::{CrateError, Properties, Result};

/// Extensions of line-delimited data files whose rows are counted.
const LINE_COUNTED_EXTENSIONS: [&str; 2] = ["csv", "ndjson"];

/// Statistics gathered for a file, directory, or remote resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileStats {
    /// Size in bytes.
    pub content_size: Option<u64>,
    /// Entry count for directories, line count for CSV/NDJSON files.
    pub size: Option<u64>,
    /// Last modification time (RFC 3339).
    pub date_modified: Option<String>,
    /// When these stats were collected (RFC 3339).
    pub sd_date_published: Option<String>,
}

impl FileStats {
    /// Render as JSON-LD properties, omitting unknown values.
    pub fn into_properties(self) -> Properties {
        let mut props = Properties::new();
        if let Some(published) = self.sd_date_published {
            props.insert("sdDatePublished".into(), Value::String(published));
        }
        if let Some(content_size) = self.content_size {
            props.insert("contentSize".into(), Value::from(content_size));
        }
        if let Some(modified) = self.date_modified {
            props.insert("dateModified".into(), Value::String(modified));
        }
        if let Some(size) = self.size {
            props.insert("size".into(), Value::from(size));
        }
        props
    }
}

/// Current time as an RFC 3339 string.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn system_time_to_rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

/// Collect stats for a local file or directory.
pub fn local_file_stats(path: &Path) -> Result<FileStats> {
    let metadata = std::fs::metadata(path).map_err(|e| CrateError::io(path, e))?;
    let modified = metadata.modified().map_err(|e| CrateError::io(path, e))?;

    if metadata.is_dir() {
        return Ok(FileStats {
            size: Some(count_entries(path)?),
            date_modified: Some(system_time_to_rfc3339(modified)),
            ..Default::default()
        });
    }

    let mut stats = FileStats {
        content_size: Some(metadata.len()),
        date_modified: Some(system_time_to_rfc3339(modified)),
        sd_date_published: Some(now_timestamp()),
        size: None,
    };

    let counted = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| LINE_COUNTED_EXTENSIONS.contains(&ext));
    if counted {
        stats.size = Some(count_lines(path)?);
    }

    debug!(path = %path.display(), ?stats, "local file stats");
    Ok(stats)
}

/// Count visible (non-dot) entries of a directory.
fn count_entries(dir: &Path) -> Result<u64> {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).map_err(|e| CrateError::io(dir, e))? {
        let entry = entry.map_err(|e| CrateError::io(dir, e))?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            count += 1;
        }
    }
    Ok(count)
}

/// Count lines; a final line without a trailing newline still counts.
fn count_lines(path: &Path) -> Result<u64> {
    let file = std::fs::File::open(path).map_err(|e| CrateError::io(path, e))?;
    let mut count = 0;
    for line in BufReader::new(file).split(b'\n') {
        line.map_err(|e| CrateError::io(path, e))?;
        count += 1;
    }
    Ok(count)
}

/// Parse an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`) into RFC 3339 UTC.
pub(crate) fn parse_http_date(value: &str) -> Result<String> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
        .map_err(|e| CrateError::parse(format!("invalid HTTP date '{value}': {e}")))
}
