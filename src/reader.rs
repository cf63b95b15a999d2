//! Single-file tree reader
//!
//! The binary tree format is decoded elsewhere; this module only defines the
//! seam ([`TreeReader`] / [`TreeHandle`]) plus [`JsonTreeReader`], a reader
//! for JSON tree dumps used by the CLI and the test suite:
//!
//! ```json
//! {
//!   "trees": {
//!     "EventNtuple/ntuple": {
//!       "event": [1, 2, 3],
//!       "trksegs": [[{"mom": 1.0}], [], [{"mom": 2.5}]]
//!     }
//!   }
//! }
//! ```
//!
//! Remote sources are opened under `<remote_root>/<tier>/<name>`; without a
//! remote root configured, a remote open fails with an open error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::source::Source;

/// Default tree inside each file
pub const DEFAULT_TREE_PATH: &str = "EventNtuple/ntuple";

/// Rows of one column
///
/// Cells are opaque JSON values: scalars, fixed-size arrays, or nested
/// variable-length arrays all concatenate the same way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnData {
    rows: Vec<Value>,
}

impl ColumnData {
    pub fn new(rows: Vec<Value>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    /// Append `other`'s rows after this column's rows
    pub fn extend(&mut self, other: ColumnData) {
        self.rows.extend(other.rows);
    }
}

impl From<Vec<Value>> for ColumnData {
    fn from(rows: Vec<Value>) -> Self {
        Self::new(rows)
    }
}

/// Read failure reported by a reader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("cannot open '{source_id}': {reason}")]
    Open { source_id: String, reason: String },

    #[error("branch '{branch}' not found in '{source_id}'")]
    MissingBranch { source_id: String, branch: String },
}

/// An open tree inside one source
pub trait TreeHandle: Send {
    /// Every column name the tree reports; ordering is up to the reader
    fn branch_names(&self) -> Vec<String>;

    /// Number of entries in the tree
    fn entries(&self) -> usize;

    /// Read one column
    fn read_branch(&self, name: &str) -> Result<ColumnData, ReadError>;
}

/// Opens sources
pub trait TreeReader: Send + Sync {
    fn open(&self, source: &Source, tree_path: &str) -> Result<Box<dyn TreeHandle>, ReadError>;
}

/// Reader settings, serializable so worker processes can rebuild the reader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Root under which remote tiers are mounted (`<root>/<tier>/<name>`)
    #[serde(default)]
    pub remote_root: Option<PathBuf>,
}

/// Reader for JSON tree dumps
#[derive(Debug, Clone, Default)]
pub struct JsonTreeReader {
    config: ReaderConfig,
}

#[derive(Deserialize)]
struct JsonTreeFile {
    trees: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

struct JsonTree {
    source_id: String,
    branches: BTreeMap<String, Vec<Value>>,
}

impl JsonTreeReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Local path the source should be read from
    pub fn locate(&self, source: &Source) -> Result<PathBuf, ReadError> {
        if !source.remote {
            return Ok(PathBuf::from(&source.id));
        }
        let root = self.config.remote_root.as_ref().ok_or_else(|| ReadError::Open {
            source_id: source.id.clone(),
            reason: "remote source but no remote_root configured".to_string(),
        })?;
        Ok(root.join(source.location.as_str()).join(source.short_name()))
    }

    fn load(path: &Path, source: &Source) -> Result<JsonTreeFile, ReadError> {
        let open_error = |reason: String| ReadError::Open {
            source_id: source.id.clone(),
            reason,
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| open_error(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content).map_err(|e| open_error(format!("not a tree dump: {e}")))
    }
}

impl TreeReader for JsonTreeReader {
    fn open(&self, source: &Source, tree_path: &str) -> Result<Box<dyn TreeHandle>, ReadError> {
        let path = self.locate(source)?;
        let mut file = Self::load(&path, source)?;
        let branches = file.trees.remove(tree_path).ok_or_else(|| ReadError::Open {
            source_id: source.id.clone(),
            reason: format!("tree '{tree_path}' not found"),
        })?;
        Ok(Box::new(JsonTree {
            source_id: source.id.clone(),
            branches,
        }))
    }
}

impl TreeHandle for JsonTree {
    /// Sorted by name, whatever the order in the dump
    fn branch_names(&self) -> Vec<String> {
        self.branches.keys().cloned().collect()
    }

    fn entries(&self) -> usize {
        self.branches.values().map(Vec::len).max().unwrap_or(0)
    }

    fn read_branch(&self, name: &str) -> Result<ColumnData, ReadError> {
        self.branches
            .get(name)
            .cloned()
            .map(ColumnData::new)
            .ok_or_else(|| ReadError::MissingBranch {
                source_id: self.source_id.clone(),
                branch: name.to_string(),
            })
    }
}
