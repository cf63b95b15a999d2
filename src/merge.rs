//! Result merging
//!
//! Concatenates the per-file columns of every successful file, in source
//! order, into one [`AggregateResult`]. The first successful file fixes the
//! schema; later files whose keys differ are handled by [`SchemaPolicy`].

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::engine::{FailureKind, FileFailure, FileOutcome};
use crate::error::{Result, TreeflowError};
use crate::extract::{FileColumns, Table};
use crate::reader::ColumnData;
use crate::source::Source;

/// What to do with a file whose keys differ from the first successful file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Move the file to the failure ledger and keep merging
    #[default]
    Isolate,
    /// Fail the whole batch
    Abort,
}

impl FromStr for SchemaPolicy {
    type Err = TreeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(SchemaPolicy::Isolate),
            "abort" => Ok(SchemaPolicy::Abort),
            other => Err(TreeflowError::config(format!(
                "unknown schema policy '{other}' (expected isolate or abort)"
            ))),
        }
    }
}

/// Merged columns plus the failure ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub data: FileColumns,
    /// Files that did not contribute, in source order
    pub failures: Vec<FileFailure>,
    /// Files that contributed, in source order
    pub files: Vec<Source>,
}

impl AggregateResult {
    pub fn keys(&self) -> Vec<&str> {
        self.data.keys()
    }

    /// Column of a flat result
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        match &self.data {
            FileColumns::Flat(table) => table.get(name),
            FileColumns::Grouped(_) => None,
        }
    }

    /// Columns of one group of a grouped result
    pub fn group(&self, name: &str) -> Option<&Table> {
        match &self.data {
            FileColumns::Flat(_) => None,
            FileColumns::Grouped(groups) => groups.get(name),
        }
    }

    pub fn lengths(&self) -> BTreeMap<String, usize> {
        self.data.lengths()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Merge ordered per-file outcomes
///
/// Fails with `NoUsableData` when no file succeeded, and with
/// `SchemaMismatch` under [`SchemaPolicy::Abort`].
#[instrument(skip(results), fields(files = results.len()))]
pub fn merge(results: Vec<FileOutcome<FileColumns>>, policy: SchemaPolicy) -> Result<AggregateResult> {
    let mut data: Option<FileColumns> = None;
    let mut failures = Vec::new();
    let mut files = Vec::new();

    for outcome in results {
        let (source, columns) = match outcome {
            FileOutcome::Failed(failure) => {
                failures.push(failure);
                continue;
            }
            FileOutcome::Ok { source, value } => (source, value),
        };

        if data.is_none() {
            data = Some(columns);
            files.push(source);
            continue;
        }
        let Some(acc) = data.as_mut() else {
            continue;
        };

        match append(acc, columns) {
            Ok(()) => files.push(source),
            Err(reason) => match policy {
                SchemaPolicy::Isolate => {
                    warn!(source = %source, %reason, "Schema mismatch, file isolated");
                    failures.push(FileFailure::new(source, FailureKind::SchemaMismatch, reason));
                }
                SchemaPolicy::Abort => {
                    return Err(TreeflowError::SchemaMismatch {
                        source_id: source.id,
                        reason,
                    });
                }
            },
        }
    }

    let data = data.ok_or_else(|| TreeflowError::NoUsableData {
        failed: failures.len(),
    })?;
    debug!(merged = files.len(), failed = failures.len(), "Merge complete");
    Ok(AggregateResult {
        data,
        failures,
        files,
    })
}

/// Append `next` after `acc`; nothing is modified if the schemas differ
fn append(acc: &mut FileColumns, next: FileColumns) -> std::result::Result<(), String> {
    match (acc, next) {
        (FileColumns::Flat(acc), FileColumns::Flat(next)) => {
            same_keys(&*acc, &next, "columns")?;
            append_table(acc, next);
            Ok(())
        }
        (FileColumns::Grouped(acc), FileColumns::Grouped(next)) => {
            same_keys(&*acc, &next, "groups")?;
            for (group, table) in &next {
                if let Some(existing) = acc.get(group) {
                    same_keys(existing, table, &format!("columns of group '{group}'"))?;
                }
            }
            for (group, table) in next {
                if let Some(existing) = acc.get_mut(&group) {
                    append_table(existing, table);
                }
            }
            Ok(())
        }
        (FileColumns::Flat(_), FileColumns::Grouped(_)) => {
            Err("expected flat columns, got groups".to_string())
        }
        (FileColumns::Grouped(_), FileColumns::Flat(_)) => {
            Err("expected groups, got flat columns".to_string())
        }
    }
}

fn append_table(acc: &mut Table, next: Table) {
    for (name, column) in next {
        acc.entry(name).or_default().extend(column);
    }
}

fn same_keys<V, W>(
    expected: &BTreeMap<String, V>,
    found: &BTreeMap<String, W>,
    what: &str,
) -> std::result::Result<(), String> {
    let expected: BTreeSet<&String> = expected.keys().collect();
    let found: BTreeSet<&String> = found.keys().collect();
    if expected == found {
        return Ok(());
    }
    let missing: Vec<&str> = expected.difference(&found).map(|s| s.as_str()).collect();
    let extra: Vec<&str> = found.difference(&expected).map(|s| s.as_str()).collect();
    Err(format!(
        "{what} differ: missing [{}], unexpected [{}]",
        missing.join(", "),
        extra.join(", ")
    ))
}
