//! Treeflow CLI

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use treeflow::selftest::{Areas, Tester};
use treeflow::worker::{run_if_worker, VERBOSITY_FLAG, WORKER_COMMAND};
use treeflow::{
    BranchRequest, CountEntries, EchoTask, EngineConfig, ExecutionMode, FileOutcome, FileTask,
    FixSuggestion, JsonTreeReader, Location, Logger, Processor, SchemaPolicy, SkeletonRunner,
    Source, SourceRequest, TreeReader, TreeflowConfig, TreeflowError, WorkerRegistry,
};

#[derive(Parser)]
#[command(name = "treeflow")]
#[command(about = "Treeflow - concurrent column extraction over many tree data files")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/treeflow/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More output (-v shows every file)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract branches from every file and merge them
    Process {
        #[command(flatten)]
        sources: SourceArgs,

        #[command(flatten)]
        branches: BranchArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Tree inside each file
        #[arg(long)]
        tree_path: Option<String>,

        /// What to do with files whose columns differ (isolate, abort)
        #[arg(long)]
        schema_policy: Option<SchemaPolicy>,

        /// Print the merged result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve and print the file list
    Files {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// List the branches of one file
    Branches {
        /// File to inspect
        file: String,

        /// Read from remote storage
        #[arg(long)]
        remote: bool,

        /// Storage tier for remote files
        #[arg(long)]
        location: Option<Location>,

        /// Tree inside the file
        #[arg(long)]
        tree_path: Option<String>,
    },

    /// Run a built-in per-file task without merging
    Run {
        /// Task to run
        #[arg(value_enum)]
        task: BuiltinTask,

        #[command(flatten)]
        sources: SourceArgs,

        #[command(flatten)]
        engine: EngineArgs,

        /// Print outcomes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the self tests against the [selftest] inputs
    Test {
        #[arg(long)]
        reader: bool,

        #[arg(long)]
        importer: bool,

        #[arg(long)]
        processor: bool,

        /// Every area
        #[arg(long)]
        all: bool,
    },

    /// Process-pool worker loop (stdin/stdout protocol)
    #[command(hide = true)]
    Worker {
        #[arg(long, default_value_t = 0)]
        verbosity: u8,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Single file
    #[arg(short, long)]
    file: Option<String>,

    /// File with one source per line
    #[arg(short = 'l', long)]
    file_list: Option<PathBuf>,

    /// Catalog definition name
    #[arg(short, long)]
    defname: Option<String>,

    /// Read from remote storage
    #[arg(long)]
    remote: bool,

    /// Storage tier: disk, tape, scratch, nersc
    #[arg(long)]
    location: Option<Location>,
}

#[derive(Args)]
struct BranchArgs {
    /// Branch to read ('*' for all); repeatable
    #[arg(short, long = "branch")]
    branch: Vec<String>,

    /// Branch group, e.g. crv=crvcoincs.PEs,crvcoincs.nHits; repeatable
    #[arg(short, long)]
    group: Vec<String>,

    /// YAML/JSON file with a name, a list, or a group mapping
    #[arg(long)]
    branches_file: Option<PathBuf>,
}

#[derive(Args)]
struct EngineArgs {
    /// Execution mode: threads or processes
    #[arg(short, long)]
    mode: Option<ExecutionMode>,

    /// Pool size
    #[arg(short, long)]
    workers: Option<usize>,

    /// Verbosity of worker processes
    #[arg(long)]
    worker_verbosity: Option<u8>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuiltinTask {
    Echo,
    CountEntries,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.command);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            1
        }
    };
    std::process::exit(code);
}

/// Tracing goes to stderr; stdout belongs to results (and to the protocol in workers)
fn init_tracing(command: &Commands) {
    let default = match command {
        Commands::Worker { verbosity: 0 } => "warn",
        Commands::Worker { verbosity: 1 } => "info",
        Commands::Worker { .. } => "debug",
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32, TreeflowError> {
    let verbosity = if cli.quiet { 0 } else { 1 + cli.verbose.min(1) };

    if let Commands::Worker { .. } = cli.command {
        return run_worker().await;
    }

    let config = match &cli.config {
        Some(path) => TreeflowConfig::load_from(path)?,
        None => TreeflowConfig::load()?,
    }
    .with_env()?;

    match cli.command {
        Commands::Process {
            sources,
            branches,
            engine,
            tree_path,
            schema_policy,
            json,
        } => {
            let logger = Logger::new("[treeflow]", if json { 0 } else { verbosity });
            let mut processor = Processor::from_config(&config)?
                .with_engine(engine.apply(config.engine_config()))
                .with_logger(logger);
            if let Some(tree_path) = tree_path {
                processor = processor.with_tree_path(tree_path);
            }
            if let Some(policy) = schema_policy {
                processor = processor.with_schema_policy(policy);
            }

            let request = sources.request(&config);
            let result = processor
                .process_data(&request, branches.request()?)
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(0);
            }

            println!("{}", "Columns:".cyan().bold());
            for (key, rows) in result.lengths() {
                println!("  {} {} rows", key.bold(), rows);
            }
            println!(
                "{} {} file(s) merged, {} failed",
                "→".cyan(),
                result.files.len(),
                result.failures.len()
            );
            if result.is_partial() {
                println!("{}", "Failures:".yellow().bold());
                for failure in &result.failures {
                    println!("  {} [{}] {}", failure.source, failure.kind, failure.message);
                }
            }
            Ok(0)
        }

        Commands::Files { sources } => {
            let processor = Processor::from_config(&config)?.with_logger(Logger::silent());
            for source in processor.get_file_list(&sources.request(&config)).await? {
                println!("{}", source);
            }
            Ok(0)
        }

        Commands::Branches {
            file,
            remote,
            location,
            tree_path,
        } => {
            let source = if remote {
                Source::remote(file, location.unwrap_or(config.sources.location))
            } else {
                Source::local(file)
            };
            let tree_path = tree_path.unwrap_or_else(|| config.reader.tree_path.clone());
            let tree = JsonTreeReader::new(config.reader_config())
                .open(&source, &tree_path)
                .map_err(|e| TreeflowError::config(e.to_string()))?;

            println!(
                "{} {} ({} entries)",
                "Tree:".cyan().bold(),
                tree_path,
                tree.entries()
            );
            for name in tree.branch_names() {
                println!("  {}", name);
            }
            Ok(0)
        }

        Commands::Run {
            task,
            sources,
            engine,
            json,
        } => {
            let logger = Logger::new("[treeflow]", if json { 0 } else { verbosity });
            let request = sources.request(&config);
            let engine = engine.apply(config.engine_config());
            match task {
                BuiltinTask::Echo => {
                    run_builtin(EchoTask, request, engine, &config, logger, json).await
                }
                BuiltinTask::CountEntries => {
                    let task = CountEntries {
                        tree_path: config.reader.tree_path.clone(),
                        reader_config: config.reader_config(),
                    };
                    run_builtin(task, request, engine, &config, logger, json).await
                }
            }
        }

        Commands::Test {
            reader,
            importer,
            processor,
            all,
        } => {
            let areas = if all {
                Areas::all()
            } else {
                Areas {
                    reader,
                    importer,
                    processor,
                }
            };
            let logger = Logger::new("[treeflow]", 1);
            if !areas.any() {
                logger.error("No test area selected (use --reader, --importer, --processor or --all)");
                return Ok(2);
            }

            let summary = Tester::new(config, if verbosity == 0 { 0 } else { 2 })
                .run(areas)
                .await;
            if summary.passed() {
                logger.success("All selected tests passed");
                Ok(0)
            } else {
                logger.error("Some tests failed");
                Ok(2)
            }
        }

        Commands::Worker { .. } => run_worker().await,
    }
}

/// Serve the pool protocol; the engine always launches `treeflow worker --verbosity N`
async fn run_worker() -> Result<i32, TreeflowError> {
    let code = tokio::task::spawn_blocking(|| run_if_worker(&WorkerRegistry::with_builtin()))
        .await
        .map_err(|e| TreeflowError::WorkerProtocol {
            reason: format!("worker loop failed: {e}"),
        })?;
    code.ok_or_else(|| TreeflowError::WorkerProtocol {
        reason: format!("expected '{WORKER_COMMAND} {VERBOSITY_FLAG} N' as the first arguments"),
    })
}

async fn run_builtin<T>(
    task: T,
    request: SourceRequest,
    engine: EngineConfig,
    config: &TreeflowConfig,
    logger: Logger,
    json: bool,
) -> Result<i32, TreeflowError>
where
    T: FileTask,
{
    let outcomes = SkeletonRunner::new(task, request)
        .with_engine(engine)
        .with_catalog(Arc::new(config.catalog()?))
        .with_logger(logger)
        .execute()
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            match outcome {
                FileOutcome::Ok { source, value } => {
                    println!("{} {} {}", "✓".green(), source, serde_json::to_string(value)?)
                }
                FileOutcome::Failed(failure) => println!(
                    "{} {} [{}] {}",
                    "✗".red(),
                    failure.source,
                    failure.kind,
                    failure.message
                ),
            }
        }
    }

    if outcomes.iter().all(|o| !o.is_ok()) {
        return Err(TreeflowError::NoUsableData {
            failed: outcomes.len(),
        });
    }
    Ok(0)
}

impl SourceArgs {
    fn request(&self, config: &TreeflowConfig) -> SourceRequest {
        SourceRequest {
            file: self.file.clone(),
            file_list: self.file_list.clone(),
            defname: self.defname.clone(),
            remote: self.remote,
            location: self.location.unwrap_or(config.sources.location),
        }
    }
}

impl BranchArgs {
    /// Exactly one of --branch, --group, --branches-file
    fn request(&self) -> Result<BranchRequest, TreeflowError> {
        let given = [
            !self.branch.is_empty(),
            !self.group.is_empty(),
            self.branches_file.is_some(),
        ]
        .iter()
        .filter(|g| **g)
        .count();
        if given != 1 {
            return Err(TreeflowError::branch_spec(
                "use exactly one of --branch, --group or --branches-file",
            ));
        }

        if let Some(path) = &self.branches_file {
            return BranchRequest::from_file(path);
        }
        if !self.group.is_empty() {
            return BranchRequest::from_group_args(&self.group);
        }
        Ok(match self.branch.as_slice() {
            [single] => BranchRequest::Single(single.clone()),
            names => BranchRequest::List(names.to_vec()),
        })
    }
}

impl EngineArgs {
    fn apply(&self, mut engine: EngineConfig) -> EngineConfig {
        if let Some(mode) = self.mode {
            engine.mode = mode;
        }
        if let Some(workers) = self.workers {
            engine.workers = workers;
        }
        if let Some(verbosity) = self.worker_verbosity {
            engine.worker_verbosity = verbosity;
        }
        engine
    }
}
