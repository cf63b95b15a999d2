//! Concurrent execution engine
//!
//! Runs a [`FileTask`] once per source on a bounded pool, either
//! worker threads (`Threads`) or freshly spawned worker processes
//! (`Processes`). Results always come back in source order.
//!
//! ```text
//!   sources ──► [ pool of N workers ] ──► (index, outcome) ──► slots[index]
//!                  threads | processes        any order         source order
//! ```
//!
//! A failing file becomes a [`FileOutcome::Failed`] entry; it never aborts
//! the batch. There is no retry and no per-file timeout at this layer.

mod process;
mod task;
mod threads;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{Result, TreeflowError};
use crate::logger::{LogLevel, Logger};
use crate::source::Source;

pub use process::PASSTHROUGH_ENV;
pub(crate) use task::panic_message;
pub use task::{FailureKind, FileFailure, FileOutcome, FileTask, TaskError};

/// Scheduling model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Shared-memory thread pool, for I/O-bound extraction
    #[default]
    Threads,
    /// Isolated worker processes, for CPU-bound or non-thread-safe work
    Processes,
}

impl FromStr for ExecutionMode {
    type Err = TreeflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threads" | "threaded" => Ok(ExecutionMode::Threads),
            "processes" | "multiprocess" => Ok(ExecutionMode::Processes),
            other => Err(TreeflowError::config(format!(
                "unknown execution mode '{other}' (expected threads or processes)"
            ))),
        }
    }
}

/// Default worker count: available hardware parallelism
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Engine settings for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    pub workers: usize,
    /// Program launched as a worker process (defaults to the current executable)
    pub worker_program: Option<PathBuf>,
    /// Verbosity passed to worker processes
    pub worker_verbosity: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            workers: default_workers(),
            worker_program: None,
            worker_verbosity: 0,
        }
    }
}

impl EngineConfig {
    pub fn threads(workers: usize) -> Self {
        Self {
            mode: ExecutionMode::Threads,
            workers,
            ..Default::default()
        }
    }

    pub fn processes(workers: usize) -> Self {
        Self {
            mode: ExecutionMode::Processes,
            workers,
            ..Default::default()
        }
    }

    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn with_worker_verbosity(mut self, verbosity: u8) -> Self {
        self.worker_verbosity = verbosity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(TreeflowError::config("worker count must be at least 1"));
        }
        Ok(())
    }

    fn resolve_worker_program(&self) -> Result<PathBuf> {
        match &self.worker_program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe().map_err(|e| TreeflowError::WorkerSpawn {
                program: PathBuf::from("<current executable>"),
                reason: e.to_string(),
            }),
        }
    }
}

/// Runs file tasks over a source list
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    logger: Logger,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            logger: Logger::new("[engine]", 1),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger.with_prefix("[engine]");
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `task` on every source; blocks until every task has finished
    ///
    /// The returned vector has one outcome per source, in source order.
    #[instrument(skip_all, fields(task = T::NAME, sources = sources.len(), mode = ?self.config.mode))]
    pub async fn run<T: FileTask>(
        &self,
        sources: &[Source],
        task: Arc<T>,
    ) -> Result<Vec<FileOutcome<T::Output>>> {
        self.config.validate()?;
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let workers = self.config.workers.min(sources.len());
        self.logger.info(format!(
            "Running '{}' on {} file(s) with {} {}",
            T::NAME,
            sources.len(),
            workers,
            match self.config.mode {
                ExecutionMode::Threads => "thread(s)",
                ExecutionMode::Processes => "worker process(es)",
            }
        ));

        let mut progress = Progress::new(sources.len(), &self.logger);
        let outcomes = match self.config.mode {
            ExecutionMode::Threads => threads::run(sources, task, workers, &mut progress).await,
            ExecutionMode::Processes => {
                let program = self.config.resolve_worker_program()?;
                let pool = process::PoolSettings {
                    program,
                    workers,
                    verbosity: self.config.worker_verbosity,
                };
                process::run(sources, task.as_ref(), &pool, &mut progress).await?
            }
        };

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch finished"
        );
        let summary = format!(
            "Processed {} file(s) in {:.1}s: {} ok, {} failed",
            outcomes.len(),
            start.elapsed().as_secs_f32(),
            outcomes.len() - failed,
            failed
        );
        if failed == 0 {
            self.logger.success(summary);
        } else {
            self.logger.warning(summary);
        }
        Ok(outcomes)
    }
}

/// Per-file progress lines: `[3/10] file.json ✓ (0.2s)`
struct Progress<'a> {
    total: usize,
    done: usize,
    logger: &'a Logger,
}

impl<'a> Progress<'a> {
    fn new(total: usize, logger: &'a Logger) -> Self {
        Self {
            total,
            done: 0,
            logger,
        }
    }

    fn record<T>(&mut self, outcome: &FileOutcome<T>, elapsed: Duration) {
        self.done += 1;
        let counter = format!("[{}/{}]", self.done, self.total);
        let duration = format!("({:.1}s)", elapsed.as_secs_f32()).dimmed();
        match outcome {
            FileOutcome::Ok { source, .. } => self.logger.log(
                format!(
                    "{} {} {} {}",
                    counter.green(),
                    source.short_name(),
                    "✓".green(),
                    duration
                ),
                LogLevel::Max,
            ),
            FileOutcome::Failed(failure) => {
                warn!(source = %failure.source, kind = %failure.kind, "{}", failure.message);
                self.logger.warning(format!(
                    "{} {} {} {}: {}",
                    counter.red(),
                    failure.source.short_name(),
                    "✗".red(),
                    failure.kind,
                    failure.message
                ));
            }
        }
    }
}
