//! Per-file task contract and outcomes

use std::any::Any;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::reader::ReadError;
use crate::source::Source;

/// Work the engine runs once per source
///
/// Implementations must be serializable: in multi-process mode the task is
/// sent by value to a freshly spawned worker, which rebuilds it from the
/// registry entry named [`FileTask::NAME`].
pub trait FileTask: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Result of processing one source
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Registry name used by worker processes
    const NAME: &'static str;

    fn process_one(&self, source: &Source) -> Result<Self::Output, TaskError>;
}

/// Why a single source failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    OpenError,
    MissingBranch,
    SchemaMismatch,
    TaskFailed,
    WorkerCrashed,
    WorkerPanicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::OpenError => "OpenError",
            FailureKind::MissingBranch => "MissingBranch",
            FailureKind::SchemaMismatch => "SchemaMismatch",
            FailureKind::TaskFailed => "TaskFailed",
            FailureKind::WorkerCrashed => "WorkerCrashed",
            FailureKind::WorkerPanicked => "WorkerPanicked",
        };
        f.write_str(s)
    }
}

/// Failure returned by [`FileTask::process_one`]; the engine attaches the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Generic failure for caller-defined tasks
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TaskFailed, message)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

impl From<ReadError> for TaskError {
    fn from(err: ReadError) -> Self {
        match &err {
            ReadError::Open { .. } => TaskError::new(FailureKind::OpenError, err.to_string()),
            ReadError::MissingBranch { branch, .. } => {
                TaskError::new(FailureKind::MissingBranch, branch.clone())
            }
        }
    }
}

/// One entry of the failure ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub source: Source,
    pub kind: FailureKind,
    pub message: String,
}

impl FileFailure {
    pub fn new(source: Source, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
        }
    }

    pub fn from_task(source: Source, err: TaskError) -> Self {
        Self::new(source, err.kind, err.message)
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.source, self.kind, self.message)
    }
}

/// Result of running a task on one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome<T> {
    Ok { source: Source, value: T },
    Failed(FileFailure),
}

impl<T> FileOutcome<T> {
    pub fn from_result(source: Source, result: Result<T, TaskError>) -> Self {
        match result {
            Ok(value) => FileOutcome::Ok { source, value },
            Err(err) => FileOutcome::Failed(FileFailure::from_task(source, err)),
        }
    }

    pub fn source(&self) -> &Source {
        match self {
            FileOutcome::Ok { source, .. } => source,
            FileOutcome::Failed(failure) => &failure.source,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, FileOutcome::Ok { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            FileOutcome::Ok { value, .. } => Some(value),
            FileOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FileFailure> {
        match self {
            FileOutcome::Ok { .. } => None,
            FileOutcome::Failed(failure) => Some(failure),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FileOutcome<U> {
        match self {
            FileOutcome::Ok { source, value } => FileOutcome::Ok {
                source,
                value: f(value),
            },
            FileOutcome::Failed(failure) => FileOutcome::Failed(failure),
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_maps_to_kind() {
        let open: TaskError = ReadError::Open {
            source_id: "a".into(),
            reason: "gone".into(),
        }
        .into();
        assert_eq!(open.kind, FailureKind::OpenError);

        let missing: TaskError = ReadError::MissingBranch {
            source_id: "a".into(),
            branch: "crvcoincs.nHits".into(),
        }
        .into();
        assert_eq!(missing.kind, FailureKind::MissingBranch);
        assert_eq!(missing.message, "crvcoincs.nHits");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = FileOutcome::from_result(Source::local("a"), Ok::<_, TaskError>(3));
        assert!(ok.is_ok());
        assert_eq!(ok.value(), Some(&3));
        assert_eq!(ok.clone().map(|v| v * 2).value(), Some(&6));

        let failed = FileOutcome::<i32>::from_result(Source::local("b"), Err(TaskError::failed("x")));
        assert!(!failed.is_ok());
        assert_eq!(failed.source().id, "b");
        assert_eq!(failed.failure().unwrap().kind, FailureKind::TaskFailed);
    }

    #[test]
    fn test_outcome_serde_roundtrip_keeps_failure() {
        let failed = FileOutcome::<u32>::Failed(FileFailure::new(
            Source::local("x.json"),
            FailureKind::OpenError,
            "no such file",
        ));
        let json = serde_json::to_string(&failed).unwrap();
        let back: FileOutcome<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
    }
}
