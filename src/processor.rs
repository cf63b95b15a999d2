//! High-level façade: resolve → extract → merge
//!
//! ```ignore
//! let processor = Processor::from_config(&TreeflowConfig::load()?.with_env()?)?;
//! let result = processor
//!     .process_data(&SourceRequest::file_list("files.txt"), vec!["event"].into())
//!     .await?;
//! println!("{:?}", result.lengths());
//! ```

use std::sync::Arc;

use tracing::{info, instrument};

use crate::branches::{normalize, BranchRequest};
use crate::catalog::{Catalog, CommandCatalog};
use crate::config::TreeflowConfig;
use crate::engine::{Engine, EngineConfig, ExecutionMode};
use crate::error::{Result, TreeflowError};
use crate::extract::Extractor;
use crate::logger::Logger;
use crate::merge::{merge, AggregateResult, SchemaPolicy};
use crate::reader::{ReaderConfig, TreeReader, DEFAULT_TREE_PATH};
use crate::source::{self, Source, SourceRequest};

/// Batch processor over many files
pub struct Processor {
    engine: EngineConfig,
    schema_policy: SchemaPolicy,
    tree_path: String,
    reader_config: ReaderConfig,
    reader: Option<Arc<dyn TreeReader>>,
    catalog: Arc<dyn Catalog>,
    logger: Logger,
}

impl Default for Processor {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            schema_policy: SchemaPolicy::default(),
            tree_path: DEFAULT_TREE_PATH.to_string(),
            reader_config: ReaderConfig::default(),
            reader: None,
            catalog: Arc::new(CommandCatalog::default()),
            logger: Logger::new("[processor]", 1),
        }
    }
}

impl Processor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TreeflowConfig) -> Result<Self> {
        Ok(Self {
            engine: config.engine_config(),
            schema_policy: config.engine.schema_policy,
            tree_path: config.reader.tree_path.clone(),
            reader_config: config.reader_config(),
            catalog: Arc::new(config.catalog()?),
            ..Self::default()
        })
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_schema_policy(mut self, policy: SchemaPolicy) -> Self {
        self.schema_policy = policy;
        self
    }

    pub fn with_tree_path(mut self, tree_path: impl Into<String>) -> Self {
        self.tree_path = tree_path.into();
        self
    }

    pub fn with_reader_config(mut self, config: ReaderConfig) -> Self {
        self.reader_config = config;
        self
    }

    /// Custom reader, threads mode only (`process_data` rejects it in process mode)
    pub fn with_reader(mut self, reader: Arc<dyn TreeReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.with_prefix("[processor]");
        self
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Resolve a request into its ordered source list
    pub async fn get_file_list(&self, request: &SourceRequest) -> Result<Vec<Source>> {
        let sources = source::resolve(request, self.catalog.as_ref()).await?;
        self.logger
            .info(format!("Resolved {} file(s)", sources.len()));
        Ok(sources)
    }

    /// Extractor configured the way this processor reads files
    pub fn extractor(&self, branches: BranchRequest) -> Result<Extractor> {
        let mut extractor = Extractor::new(normalize(branches)?)
            .with_tree_path(self.tree_path.clone())
            .with_reader_config(self.reader_config.clone());
        if let Some(reader) = &self.reader {
            extractor = extractor.with_reader(Arc::clone(reader));
        }
        Ok(extractor)
    }

    /// Extract `branches` from every requested file and merge the results
    ///
    /// Fatal: an invalid request or branch spec, a custom reader in process
    /// mode, or a batch where no file was usable. Files that fail individually
    /// are listed in [`AggregateResult::failures`].
    #[instrument(skip(self, branches))]
    pub async fn process_data(
        &self,
        request: &SourceRequest,
        branches: BranchRequest,
    ) -> Result<AggregateResult> {
        let extractor = self.extractor(branches)?;
        if extractor.has_custom_reader() && self.engine.mode == ExecutionMode::Processes {
            return Err(TreeflowError::config(
                "a custom reader cannot run in worker processes; use threads mode",
            ));
        }
        let sources = self.get_file_list(request).await?;

        let outcomes = Engine::new(self.engine.clone())
            .with_logger(self.logger.clone())
            .run(&sources, Arc::new(extractor))
            .await?;
        let result = merge(outcomes, self.schema_policy)?;

        info!(
            files = result.files.len(),
            failed = result.failures.len(),
            keys = result.keys().len(),
            "Data processed"
        );
        if result.is_partial() {
            self.logger.warning(format!(
                "{} of {} file(s) failed",
                result.failures.len(),
                sources.len()
            ));
        }
        Ok(result)
    }
}
