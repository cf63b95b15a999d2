//! Source resolution
//!
//! Turns a [`SourceRequest`] (one explicit file, a file-list path, or a
//! catalog definition name) into an ordered, deduplicated list of
//! [`Source`]s. Exactly one input mode must be set.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::catalog::Catalog;
use crate::error::{Result, TreeflowError};

/// Storage tier hint attached to every source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Disk,
    #[default]
    Tape,
    Scratch,
    Nersc,
}

impl Location {
    pub fn as_str(self) -> &'static str {
        match self {
            Location::Disk => "disk",
            Location::Tape => "tape",
            Location::Scratch => "scratch",
            Location::Nersc => "nersc",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = TreeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(Location::Disk),
            "tape" => Ok(Location::Tape),
            "scratch" => Ok(Location::Scratch),
            "nersc" => Ok(Location::Nersc),
            other => Err(TreeflowError::config(format!(
                "unknown location '{other}' (expected disk, tape, scratch or nersc)"
            ))),
        }
    }
}

/// One resolved input file
///
/// Identity is the `id` string; the remote flag and location tier only tell
/// the reader where to look.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub remote: bool,
    pub location: Location,
}

impl Source {
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote: false,
            location: Location::default(),
        }
    }

    pub fn remote(id: impl Into<String>, location: Location) -> Self {
        Self {
            id: id.into(),
            remote: true,
            location,
        }
    }

    /// File name part of the identifier, for compact log lines
    pub fn short_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// What to process: exactly one of `file`, `file_list`, `defname`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub file: Option<String>,
    pub file_list: Option<PathBuf>,
    pub defname: Option<String>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub location: Location,
}

impl SourceRequest {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            ..Default::default()
        }
    }

    pub fn file_list(path: impl Into<PathBuf>) -> Self {
        Self {
            file_list: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn defname(defname: impl Into<String>) -> Self {
        Self {
            defname: Some(defname.into()),
            ..Default::default()
        }
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    fn make_source(&self, id: String) -> Source {
        Source {
            id,
            remote: self.remote,
            location: self.location,
        }
    }
}

/// Resolve a request into an ordered, deduplicated, non-empty source list
#[instrument(skip(catalog), fields(remote = request.remote, location = %request.location))]
pub async fn resolve(request: &SourceRequest, catalog: &dyn Catalog) -> Result<Vec<Source>> {
    let ids = match (&request.file, &request.file_list, &request.defname) {
        (Some(file), None, None) => {
            let file = file.trim();
            if file.is_empty() {
                return Err(TreeflowError::config("explicit file name is empty"));
            }
            vec![file.to_string()]
        }
        (None, Some(path), None) => read_file_list(path)?,
        (None, None, Some(defname)) => {
            let ids = catalog.lookup(defname).await?;
            if ids.is_empty() {
                return Err(TreeflowError::CatalogLookupFailed {
                    defname: defname.clone(),
                    reason: "definition resolved to zero files".to_string(),
                });
            }
            ids
        }
        (file, list, defname) => {
            let given = [file.is_some(), list.is_some(), defname.is_some()]
                .iter()
                .filter(|set| **set)
                .count();
            return Err(TreeflowError::config(format!(
                "exactly one of file, file list or definition name must be provided (got {given})"
            )));
        }
    };

    let sources: Vec<Source> = dedup(ids)
        .into_iter()
        .map(|id| request.make_source(id))
        .collect();
    debug!(count = sources.len(), "Resolved sources");
    Ok(sources)
}

/// Read a file list: one source per line, blank lines and `#` comments skipped
pub fn read_file_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| TreeflowError::MalformedList {
        path: path.to_path_buf(),
        reason: format!("cannot open: {e}"),
    })?;
    parse_file_list(path, &content)
}

fn parse_file_list(path: &Path, content: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !is_plausible_source(line) {
            return Err(TreeflowError::MalformedList {
                path: path.to_path_buf(),
                reason: format!("line {}: '{}' is not a file reference", lineno + 1, line),
            });
        }
        ids.push(line.to_string());
    }

    if ids.is_empty() {
        return Err(TreeflowError::MalformedList {
            path: path.to_path_buf(),
            reason: "list contains no files".to_string(),
        });
    }
    Ok(ids)
}

/// A trimmed, non-empty line without control characters; interior spaces are allowed
fn is_plausible_source(line: &str) -> bool {
    !line.is_empty() && !line.chars().any(char::is_control)
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if seen.insert(id.clone()) {
            out.push(id);
        } else {
            warn!(source = %id, "Duplicate source dropped");
        }
    }
    out
}
