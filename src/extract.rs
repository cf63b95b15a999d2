//! Per-file extraction
//!
//! [`Extractor`] opens one source through a [`TreeReader`] and reads the
//! columns named by a [`BranchSpec`]. A missing requested column fails the
//! whole file; there is no partial success.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::branches::BranchSpec;
use crate::engine::{FileOutcome, FileTask, TaskError};
use crate::reader::{
    ColumnData, JsonTreeReader, ReaderConfig, TreeHandle, TreeReader, DEFAULT_TREE_PATH,
};
use crate::source::Source;

/// Column name → data
pub type Table = BTreeMap<String, ColumnData>;

/// Columns read from one file, shaped like the spec that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileColumns {
    /// `All` and `Flat` specs: one implicit group
    Flat(Table),
    /// `Grouped` spec: group name → its columns
    Grouped(BTreeMap<String, Table>),
}

impl FileColumns {
    /// Top-level keys: column names, or group names
    pub fn keys(&self) -> Vec<&str> {
        match self {
            FileColumns::Flat(table) => table.keys().map(String::as_str).collect(),
            FileColumns::Grouped(groups) => groups.keys().map(String::as_str).collect(),
        }
    }

    /// Row count per column; grouped columns are reported as `group/column`
    pub fn lengths(&self) -> BTreeMap<String, usize> {
        match self {
            FileColumns::Flat(table) => table
                .iter()
                .map(|(name, column)| (name.clone(), column.len()))
                .collect(),
            FileColumns::Grouped(groups) => groups
                .iter()
                .flat_map(|(group, table)| {
                    table
                        .iter()
                        .map(move |(name, column)| (format!("{group}/{name}"), column.len()))
                })
                .collect(),
        }
    }
}

fn default_tree_path() -> String {
    DEFAULT_TREE_PATH.to_string()
}

/// Reads the requested columns from one source
///
/// Serializable so it can run in worker processes. A reader installed with
/// [`Extractor::with_reader`] stays in this process; workers rebuild a
/// [`JsonTreeReader`] from `reader_config`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Extractor {
    spec: BranchSpec,
    #[serde(default = "default_tree_path")]
    tree_path: String,
    #[serde(default)]
    reader_config: ReaderConfig,
    #[serde(skip)]
    reader: Option<Arc<dyn TreeReader>>,
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("spec", &self.spec)
            .field("tree_path", &self.tree_path)
            .field("reader_config", &self.reader_config)
            .field("custom_reader", &self.reader.is_some())
            .finish()
    }
}

impl Extractor {
    pub fn new(spec: BranchSpec) -> Self {
        Self {
            spec,
            tree_path: default_tree_path(),
            reader_config: ReaderConfig::default(),
            reader: None,
        }
    }

    pub fn with_tree_path(mut self, tree_path: impl Into<String>) -> Self {
        self.tree_path = tree_path.into();
        self
    }

    pub fn with_reader_config(mut self, config: ReaderConfig) -> Self {
        self.reader_config = config;
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn TreeReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn spec(&self) -> &BranchSpec {
        &self.spec
    }

    pub fn has_custom_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// Extract one source without going through the engine
    pub fn extract(&self, source: &Source) -> FileOutcome<FileColumns> {
        FileOutcome::from_result(source.clone(), self.process_one(source))
    }

    fn open(&self, source: &Source) -> Result<Box<dyn TreeHandle>, TaskError> {
        let handle = match &self.reader {
            Some(reader) => reader.open(source, &self.tree_path)?,
            None => JsonTreeReader::new(self.reader_config.clone()).open(source, &self.tree_path)?,
        };
        Ok(handle)
    }
}

fn read_table(tree: &dyn TreeHandle, names: &[String]) -> Result<Table, TaskError> {
    let mut table = Table::new();
    for name in names {
        table.insert(name.clone(), tree.read_branch(name)?);
    }
    Ok(table)
}

impl FileTask for Extractor {
    type Output = FileColumns;
    const NAME: &'static str = "extract";

    #[instrument(skip(self), fields(source = %source))]
    fn process_one(&self, source: &Source) -> Result<FileColumns, TaskError> {
        let tree = self.open(source)?;
        let columns = match &self.spec {
            BranchSpec::All => FileColumns::Flat(read_table(tree.as_ref(), &tree.branch_names())?),
            BranchSpec::Flat(names) => FileColumns::Flat(read_table(tree.as_ref(), names)?),
            BranchSpec::Grouped(groups) => {
                let mut out = BTreeMap::new();
                for (group, names) in groups {
                    out.insert(group.clone(), read_table(tree.as_ref(), names)?);
                }
                FileColumns::Grouped(out)
            }
        };
        debug!(keys = columns.keys().len(), "Extracted");
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branches::{normalize, BranchRequest};
    use crate::engine::FailureKind;
    use crate::reader::ReadError;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    /// In-memory reader: one fixed tree for every source except `missing.json`
    struct FixedReader;

    struct FixedTree(BTreeMap<String, Vec<Value>>);

    impl TreeReader for FixedReader {
        fn open(&self, source: &Source, _tree_path: &str) -> Result<Box<dyn TreeHandle>, ReadError> {
            if source.id == "missing.json" {
                return Err(ReadError::Open {
                    source_id: source.id.clone(),
                    reason: "no such file".into(),
                });
            }
            let mut branches = BTreeMap::new();
            branches.insert("event".to_string(), vec![json!(1), json!(2)]);
            branches.insert("crvcoincs.PEs".to_string(), vec![json!([1.5]), json!([])]);
            branches.insert("crvcoincs.nHits".to_string(), vec![json!(3), json!(0)]);
            Ok(Box::new(FixedTree(branches)))
        }
    }

    impl TreeHandle for FixedTree {
        fn branch_names(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }

        fn entries(&self) -> usize {
            2
        }

        fn read_branch(&self, name: &str) -> Result<ColumnData, ReadError> {
            self.0
                .get(name)
                .cloned()
                .map(ColumnData::new)
                .ok_or_else(|| ReadError::MissingBranch {
                    source_id: "fixed".into(),
                    branch: name.into(),
                })
        }
    }

    fn extractor(request: BranchRequest) -> Extractor {
        Extractor::new(normalize(request).unwrap()).with_reader(Arc::new(FixedReader))
    }

    #[test]
    fn test_wildcard_reads_every_column() {
        let outcome = extractor("*".into()).extract(&Source::local("a.json"));
        let FileColumns::Flat(table) = outcome.value().unwrap() else {
            panic!("expected flat columns");
        };
        assert_eq!(
            table.keys().collect::<Vec<_>>(),
            vec!["crvcoincs.PEs", "crvcoincs.nHits", "event"]
        );
    }

    #[test]
    fn test_flat_reads_only_named() {
        let outcome = extractor(vec!["event"].into()).extract(&Source::local("a.json"));
        assert_eq!(outcome.value().unwrap().keys(), vec!["event"]);
    }

    #[test]
    fn test_grouped_keys_by_group() {
        let request = BranchRequest::from_group_args(&["evt=event", "crv=crvcoincs.PEs,crvcoincs.nHits"])
            .unwrap();
        let outcome = extractor(request).extract(&Source::local("a.json"));
        let columns = outcome.value().unwrap();
        assert_eq!(columns.keys(), vec!["crv", "evt"]);
        let FileColumns::Grouped(groups) = columns else {
            panic!("expected groups");
        };
        assert_eq!(groups["evt"].len(), 1);
        assert_eq!(groups["crv"].len(), 2);
        assert_eq!(columns.lengths()["crv/crvcoincs.nHits"], 2);
    }

    #[test]
    fn test_missing_column_fails_whole_file() {
        let outcome = extractor(vec!["event", "trksegs"].into()).extract(&Source::local("a.json"));
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::MissingBranch);
        assert_eq!(failure.message, "trksegs");
    }

    #[test]
    fn test_open_error() {
        let outcome = extractor("*".into()).extract(&Source::local("missing.json"));
        assert_eq!(outcome.failure().unwrap().kind, FailureKind::OpenError);
    }

    #[test]
    fn test_params_roundtrip_drops_custom_reader() {
        let original = extractor(vec!["event"].into()).with_tree_path("run");
        let json = serde_json::to_value(&original).unwrap();
        assert_eq!(json["tree_path"], "run");
        let back: Extractor = serde_json::from_value(json).unwrap();
        assert_eq!(back.spec(), original.spec());
        assert!(!back.has_custom_reader());
    }
}
