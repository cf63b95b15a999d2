//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - TF-000-009: Configuration errors
//! - TF-010-019: Source resolution errors
//! - TF-020-029: Branch specification errors
//! - TF-030-039: Merge errors
//! - TF-040-049: Worker process errors
//! - TF-090-099: IO / serialization errors
//!
//! Per-file failures (open errors, missing branches, ...) are not errors at
//! this level: they are recorded as [`FileFailure`](crate::engine::FileFailure)
//! values and end up in the failure ledger.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreeflowError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum TreeflowError {
    // ═══════════════════════════════════════════
    // CONFIGURATION ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[TF-001] Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("[TF-002] Invalid config file '{path}': {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    // ═══════════════════════════════════════════
    // SOURCE RESOLUTION ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[TF-010] Malformed file list '{path}': {reason}")]
    MalformedList { path: PathBuf, reason: String },

    #[error("[TF-011] Catalog lookup failed for definition '{defname}': {reason}")]
    CatalogLookupFailed { defname: String, reason: String },

    // ═══════════════════════════════════════════
    // BRANCH SPECIFICATION ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[TF-020] Invalid branch specification: {reason}")]
    InvalidBranchSpec { reason: String },

    // ═══════════════════════════════════════════
    // MERGE ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[TF-030] No usable data: all {failed} source(s) failed")]
    NoUsableData { failed: usize },

    #[error("[TF-031] Schema mismatch in '{source_id}': {reason}")]
    SchemaMismatch { source_id: String, reason: String },

    // ═══════════════════════════════════════════
    // WORKER PROCESS ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[TF-040] Failed to spawn worker process '{program}': {reason}")]
    WorkerSpawn { program: PathBuf, reason: String },

    #[error("[TF-041] Worker protocol error: {reason}")]
    WorkerProtocol { reason: String },

    #[error("[TF-042] Task '{name}' is not registered with this worker")]
    UnknownTask { name: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[TF-090] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[TF-091] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("[TF-092] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TreeflowError {
    /// Shorthand for the most common fatal error
    pub fn config(reason: impl Into<String>) -> Self {
        TreeflowError::Configuration {
            reason: reason.into(),
        }
    }

    /// Shorthand for branch specification errors
    pub fn branch_spec(reason: impl Into<String>) -> Self {
        TreeflowError::InvalidBranchSpec {
            reason: reason.into(),
        }
    }

    /// Error code (e.g. "TF-010"), used by the CLI and in tests
    pub fn code(&self) -> &'static str {
        match self {
            TreeflowError::Configuration { .. } => "TF-001",
            TreeflowError::ConfigFile { .. } => "TF-002",
            TreeflowError::MalformedList { .. } => "TF-010",
            TreeflowError::CatalogLookupFailed { .. } => "TF-011",
            TreeflowError::InvalidBranchSpec { .. } => "TF-020",
            TreeflowError::NoUsableData { .. } => "TF-030",
            TreeflowError::SchemaMismatch { .. } => "TF-031",
            TreeflowError::WorkerSpawn { .. } => "TF-040",
            TreeflowError::WorkerProtocol { .. } => "TF-041",
            TreeflowError::UnknownTask { .. } => "TF-042",
            TreeflowError::Io(_) => "TF-090",
            TreeflowError::Json(_) => "TF-091",
            TreeflowError::Yaml(_) => "TF-092",
        }
    }
}

impl FixSuggestion for TreeflowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TreeflowError::Configuration { .. } => {
                Some("Provide exactly one of --file, --file-list or --defname")
            }
            TreeflowError::ConfigFile { .. } => Some("Check TOML syntax in the config file"),
            TreeflowError::MalformedList { .. } => {
                Some("Use one file per line; blank lines and '#' comments are ignored")
            }
            TreeflowError::CatalogLookupFailed { .. } => {
                Some("Check the definition name and that the catalog command is on PATH")
            }
            TreeflowError::InvalidBranchSpec { .. } => {
                Some("Use '*', a list of unique names, or groups like evt=event")
            }
            TreeflowError::NoUsableData { .. } => {
                Some("Inspect the failure ledger: every file failed to open or read")
            }
            TreeflowError::SchemaMismatch { .. } => {
                Some("Request explicit branches, or use schema_policy = \"isolate\"")
            }
            TreeflowError::WorkerSpawn { .. } => {
                Some("Check the worker program path or use --mode threads")
            }
            TreeflowError::WorkerProtocol { .. } => {
                Some("Worker and parent must be the same treeflow build")
            }
            TreeflowError::UnknownTask { .. } => {
                Some("Register the task with WorkerRegistry in the worker binary")
            }
            TreeflowError::Io(_) => Some("Check file path and permissions"),
            TreeflowError::Json(_) => Some("Check JSON syntax"),
            TreeflowError::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
        }
    }
}
