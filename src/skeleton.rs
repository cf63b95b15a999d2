//! Pipeline template for caller-defined per-file work
//!
//! Implement [`FileTask`] for your own type, then hand it to a
//! [`SkeletonRunner`]: sources are resolved from the runner's request and
//! fed through the engine. Outcomes come back per file, in source order,
//! without merging.
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct CountHits;
//!
//! impl FileTask for CountHits {
//!     type Output = usize;
//!     const NAME: &'static str = "count-hits";
//!     fn process_one(&self, source: &Source) -> Result<usize, TaskError> { ... }
//! }
//!
//! let outcomes = SkeletonRunner::new(CountHits, SourceRequest::file_list("files.txt"))
//!     .execute()
//!     .await?;
//! ```
//!
//! In process mode the pool relaunches the current executable as
//! `<exe> worker --verbosity N`, so that binary must register the task and
//! hand worker invocations to [`run_if_worker`](crate::worker::run_if_worker)
//! before anything else:
//!
//! ```ignore
//! fn main() {
//!     let registry = WorkerRegistry::with_builtin().register::<CountHits>();
//!     if let Some(code) = treeflow::run_if_worker(&registry) {
//!         std::process::exit(code);
//!     }
//!     // ... build the runtime, then SkeletonRunner::new(CountHits, ...)
//!     //     .with_engine(EngineConfig::processes(4)).execute()
//! }
//! ```
//!
//! Another worker binary can be chosen with
//! [`EngineConfig::with_worker_program`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::catalog::{Catalog, CommandCatalog};
use crate::engine::{Engine, EngineConfig, FileOutcome, FileTask, TaskError};
use crate::error::Result;
use crate::logger::Logger;
use crate::reader::{JsonTreeReader, ReaderConfig, TreeReader, DEFAULT_TREE_PATH};
use crate::source::{self, Source, SourceRequest};

/// Runs a caller-supplied task over resolved sources
pub struct SkeletonRunner<T: FileTask> {
    task: Arc<T>,
    request: SourceRequest,
    engine: EngineConfig,
    catalog: Arc<dyn Catalog>,
    logger: Logger,
}

impl<T: FileTask> SkeletonRunner<T> {
    pub fn new(task: T, request: SourceRequest) -> Self {
        Self {
            task: Arc::new(task),
            request,
            engine: EngineConfig::default(),
            catalog: Arc::new(CommandCatalog::default()),
            logger: Logger::new("[skeleton]", 1),
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.with_prefix("[skeleton]");
        self
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    /// Resolve sources, run the task on each, return outcomes in source order
    #[instrument(skip(self), fields(task = T::NAME))]
    pub async fn execute(&self) -> Result<Vec<FileOutcome<T::Output>>> {
        let sources = source::resolve(&self.request, self.catalog.as_ref()).await?;
        self.logger
            .info(format!("Resolved {} source(s) for '{}'", sources.len(), T::NAME));
        Engine::new(self.engine.clone())
            .with_logger(self.logger.clone())
            .run(&sources, Arc::clone(&self.task))
            .await
    }
}

/// Built-in task: returns each source's name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoTask;

impl FileTask for EchoTask {
    type Output = String;
    const NAME: &'static str = "echo";

    fn process_one(&self, source: &Source) -> std::result::Result<String, TaskError> {
        Ok(source.short_name().to_string())
    }
}

/// Built-in task: entries in the tree and its column count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountEntries {
    #[serde(default = "default_tree_path")]
    pub tree_path: String,
    #[serde(default)]
    pub reader_config: ReaderConfig,
}

fn default_tree_path() -> String {
    DEFAULT_TREE_PATH.to_string()
}

impl Default for CountEntries {
    fn default() -> Self {
        Self {
            tree_path: default_tree_path(),
            reader_config: ReaderConfig::default(),
        }
    }
}

impl FileTask for CountEntries {
    type Output = BTreeMap<String, usize>;
    const NAME: &'static str = "count-entries";

    fn process_one(&self, source: &Source) -> std::result::Result<Self::Output, TaskError> {
        let tree = JsonTreeReader::new(self.reader_config.clone()).open(source, &self.tree_path)?;
        Ok(BTreeMap::from([
            ("entries".to_string(), tree.entries()),
            ("branches".to_string(), tree.branch_names().len()),
        ]))
    }
}
