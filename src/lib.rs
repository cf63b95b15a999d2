//! Treeflow - concurrent multi-file column extraction for tree-structured data files
//!
//! ```text
//!   SourceRequest ──► source::resolve ──► Engine::run(Extractor) ──► merge ──► AggregateResult
//!                                               │
//!                                  threads | worker processes
//! ```

pub mod branches;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod logger;
pub mod merge;
pub mod processor;
pub mod reader;
pub mod selftest;
pub mod skeleton;
pub mod source;
pub mod worker;

pub use branches::{normalize, BranchRequest, BranchSpec};
pub use catalog::{Catalog, CommandCatalog, StaticCatalog};
pub use config::TreeflowConfig;
pub use engine::{
    Engine, EngineConfig, ExecutionMode, FailureKind, FileFailure, FileOutcome, FileTask, TaskError,
};
pub use error::{FixSuggestion, Result, TreeflowError};
pub use extract::{Extractor, FileColumns};
pub use logger::{LogLevel, Logger};
pub use merge::{merge, AggregateResult, SchemaPolicy};
pub use processor::Processor;
pub use reader::{ColumnData, JsonTreeReader, ReaderConfig, TreeHandle, TreeReader};
pub use skeleton::{CountEntries, EchoTask, SkeletonRunner};
pub use source::{resolve, Location, Source, SourceRequest};
pub use worker::{run_if_worker, serve, WorkerRegistry};
