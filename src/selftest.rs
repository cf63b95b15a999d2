//! Self-test runner behind `treeflow test`
//!
//! Exercises the reader, the single-file importer and the processor against
//! the inputs named in the `[selftest]` config section. Each test runs inside
//! [`Ledger::safe_test`]: an error or an empty result counts as a failure and
//! never stops the run.

use std::future::Future;

use anyhow::{bail, Context};

use crate::branches::{normalize, BranchRequest};
use crate::config::TreeflowConfig;
use crate::engine::{ExecutionMode, FileOutcome};
use crate::extract::Extractor;
use crate::logger::{LogLevel, Logger};
use crate::processor::Processor;
use crate::reader::{JsonTreeReader, TreeReader};
use crate::skeleton::{EchoTask, SkeletonRunner};
use crate::source::{Location, Source, SourceRequest};

/// Functional areas selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Areas {
    pub reader: bool,
    pub importer: bool,
    pub processor: bool,
}

impl Areas {
    pub fn all() -> Self {
        Self {
            reader: true,
            importer: true,
            processor: true,
        }
    }

    pub fn any(&self) -> bool {
        self.reader || self.importer || self.processor
    }
}

/// Final tally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub total: usize,
    pub failed_tests: Vec<String>,
}

impl TestSummary {
    pub fn failed(&self) -> usize {
        self.failed_tests.len()
    }

    pub fn passed(&self) -> bool {
        self.failed_tests.is_empty()
    }
}

/// Test counters
#[derive(Debug, Default)]
pub struct Ledger {
    summary: TestSummary,
}

impl Ledger {
    /// Run one test body; `Ok(0)` means "returned no results" and fails
    pub async fn safe_test<F>(&mut self, logger: &Logger, name: &str, test: F) -> bool
    where
        F: Future<Output = anyhow::Result<usize>>,
    {
        self.summary.total += 1;
        logger.log(format!("Running test: {name}"), LogLevel::Test);
        let failure = match test.await {
            Ok(0) => Some("returned no results".to_string()),
            Ok(_) => None,
            Err(err) => Some(format!("{err:#}")),
        };
        match failure {
            None => {
                logger.success(format!("PASSED: {name}"));
                true
            }
            Some(reason) => {
                logger.error(format!("FAILED: {name}: {reason}"));
                self.summary.failed_tests.push(name.to_string());
                false
            }
        }
    }

    pub fn summary(&self) -> &TestSummary {
        &self.summary
    }
}

/// Self-test runner
pub struct Tester {
    config: TreeflowConfig,
    logger: Logger,
    ledger: Ledger,
}

const SPECIAL_BRANCHES: [&str; 2] = ["crvcoincs.PEsPerLayer[4]", "crvcoincs.sidePEsPerLayer[8]"];

impl Tester {
    pub fn new(config: TreeflowConfig, verbosity: u8) -> Self {
        let logger = Logger::new("[selftest]", verbosity);
        logger.success("Initialised");
        Self {
            config,
            logger,
            ledger: Ledger::default(),
        }
    }

    /// Run the selected areas and print the summary
    pub async fn run(&mut self, areas: Areas) -> TestSummary {
        if areas.reader {
            self.logger
                .log("************ Testing reader ************", LogLevel::Test);
            self.test_reader().await;
        }
        if areas.importer {
            self.logger
                .log("************ Testing importer ************", LogLevel::Test);
            self.test_importer().await;
        }
        if areas.processor {
            self.logger
                .log("************ Testing processor ************", LogLevel::Test);
            self.test_processor().await;
        }
        self.print_summary();
        self.ledger.summary().clone()
    }

    fn print_summary(&self) {
        let summary = self.ledger.summary();
        let rule = "=".repeat(50);
        let mut text = format!(
            "\n{rule}\nTEST SUMMARY\n{rule}\nTotal tests run: {}\nPassed: {}\nFailed: {}\n",
            summary.total,
            summary.total - summary.failed(),
            summary.failed()
        );
        if !summary.passed() {
            text.push_str("Failed tests:\n");
            for name in &summary.failed_tests {
                text.push_str(&format!("  - {name}\n"));
            }
        }
        text.push_str(&if summary.passed() {
            "🎉 All tests passed!".to_string()
        } else {
            format!("⚠️ {} test(s) failed", summary.failed())
        });
        self.logger.log(text, LogLevel::Test);
    }

    // ─── reader ───

    async fn test_reader(&mut self) {
        let cfg = &self.config;
        self.ledger
            .safe_test(&self.logger, "reader: open (local)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                read_branch_names(cfg, Source::local(file))
            })
            .await;
        self.ledger
            .safe_test(&self.logger, "reader: open (remote)", async {
                let file = required(&cfg.selftest.remote_file, "remote_file")?;
                read_branch_names(cfg, Source::remote(file, Location::Tape))
            })
            .await;
    }

    // ─── importer ───

    async fn test_importer(&mut self) {
        let cfg = &self.config;
        let grouped = || BranchRequest::from_group_args(&["evt=event", "crv=crvcoincs.PEs,crvcoincs.nHits"]);

        self.ledger
            .safe_test(&self.logger, "importer: single branch (local)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                import(cfg, Source::local(file), vec!["event"].into())
            })
            .await;
        self.ledger
            .safe_test(&self.logger, "importer: special branches (local)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                import(cfg, Source::local(file), SPECIAL_BRANCHES.to_vec().into())
            })
            .await;
        self.ledger
            .safe_test(&self.logger, "importer: single branch (remote)", async {
                let file = required(&cfg.selftest.remote_file, "remote_file")?;
                import(cfg, Source::remote(file, Location::Tape), vec!["event"].into())
            })
            .await;
        self.ledger
            .safe_test(&self.logger, "importer: grouped branches (local)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                import(cfg, Source::local(file), grouped()?)
            })
            .await;
        self.ledger
            .safe_test(&self.logger, "importer: all branches (local)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                import(cfg, Source::local(file), "*".into())
            })
            .await;
    }

    // ─── processor ───

    async fn test_processor(&mut self) {
        let cfg = &self.config;
        let log = &self.logger;
        let threads = || processor(cfg, log, ExecutionMode::Threads);

        self.ledger
            .safe_test(log, "processor: process_data (local, single file, single branch)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                let result = threads()?
                    .process_data(&SourceRequest::file(file), vec!["event"].into())
                    .await?;
                anyhow::Ok(result.files.len())
            })
            .await;
        self.ledger
            .safe_test(log, "processor: process_data (local, single file, special branches)", async {
                let file = required(&cfg.selftest.local_file, "local_file")?;
                let result = threads()?
                    .process_data(&SourceRequest::file(file), SPECIAL_BRANCHES.to_vec().into())
                    .await?;
                anyhow::Ok(result.files.len())
            })
            .await;
        self.ledger
            .safe_test(log, "processor: process_data (remote, single file, single branch)", async {
                let file = required(&cfg.selftest.remote_file, "remote_file")?;
                let request = SourceRequest::file(file)
                    .with_remote(true)
                    .with_location(Location::Tape);
                let result = threads()?.process_data(&request, vec!["event"].into()).await?;
                anyhow::Ok(result.files.len())
            })
            .await;

        self.ledger
            .safe_test(log, "processor: get_file_list (local file list)", async {
                let list = required(&cfg.selftest.file_list, "file_list")?;
                anyhow::Ok(threads()?.get_file_list(&SourceRequest::file_list(list)).await?.len())
            })
            .await;
        self.ledger
            .safe_test(log, "processor: get_file_list (remote file list)", async {
                let list = required(&cfg.selftest.remote_file_list, "remote_file_list")?;
                let request = SourceRequest::file_list(list).with_remote(true);
                anyhow::Ok(threads()?.get_file_list(&request).await?.len())
            })
            .await;
        self.ledger
            .safe_test(log, "processor: get_file_list (catalog definition)", async {
                let defname = required(&cfg.selftest.defname, "defname")?;
                let request = SourceRequest::defname(defname).with_remote(true);
                anyhow::Ok(threads()?.get_file_list(&request).await?.len())
            })
            .await;

        for (label, mode) in [
            ("multithread", ExecutionMode::Threads),
            ("multiprocess", ExecutionMode::Processes),
        ] {
            let batch = || processor(cfg, log, mode);
            self.ledger
                .safe_test(log, &format!("processor: process_data (basic {label})"), async {
                    let list = required(&cfg.selftest.file_list, "file_list")?;
                    let result = batch()?
                        .process_data(&SourceRequest::file_list(list), vec!["event"].into())
                        .await?;
                    anyhow::Ok(result.files.len())
                })
                .await;
            self.ledger
                .safe_test(log, &format!("processor: process_data (basic remote {label})"), async {
                    let list = required(&cfg.selftest.remote_file_list, "remote_file_list")?;
                    let request = SourceRequest::file_list(list)
                        .with_remote(true)
                        .with_location(Location::Disk);
                    let result = batch()?.process_data(&request, vec!["event"].into()).await?;
                    anyhow::Ok(result.files.len())
                })
                .await;
            self.ledger
                .safe_test(log, &format!("processor: skeleton ({label})"), async {
                    let list = required(&cfg.selftest.file_list, "file_list")?;
                    let outcomes = SkeletonRunner::new(EchoTask, SourceRequest::file_list(list))
                        .with_engine(batch()?.engine_config().clone())
                        .with_logger(log.clone())
                        .execute()
                        .await?;
                    anyhow::Ok(outcomes.iter().filter(|o| o.is_ok()).count())
                })
                .await;
        }

        // A bad list passes if usable files are merged or it is rejected as malformed / unusable
        if cfg.selftest.bad_file_list.is_some() {
            self.ledger
                .safe_test(log, "processor: process_data (bad file list)", async {
                    let list = required(&cfg.selftest.bad_file_list, "bad_file_list")?;
                    match threads()?
                        .process_data(&SourceRequest::file_list(list), vec!["event"].into())
                        .await
                    {
                        Ok(result) => anyhow::Ok(result.files.len()),
                        Err(err) => anyhow::Ok(usize::from(err.code() == "TF-010" || err.code() == "TF-030")),
                    }
                })
                .await;
        }
    }
}

fn required<T: Clone>(value: &Option<T>, key: &str) -> anyhow::Result<T> {
    match value {
        Some(value) => Ok(value.clone()),
        None => bail!("selftest.{key} is not configured"),
    }
}

fn read_branch_names(config: &TreeflowConfig, source: Source) -> anyhow::Result<usize> {
    let tree = JsonTreeReader::new(config.reader_config())
        .open(&source, &config.reader.tree_path)
        .with_context(|| format!("reading {source}"))?;
    Ok(tree.branch_names().len())
}

fn import(config: &TreeflowConfig, source: Source, branches: BranchRequest) -> anyhow::Result<usize> {
    let extractor = Extractor::new(normalize(branches)?)
        .with_tree_path(config.reader.tree_path.clone())
        .with_reader_config(config.reader_config());
    match extractor.extract(&source) {
        FileOutcome::Ok { value, .. } => Ok(value.keys().len()),
        FileOutcome::Failed(failure) => bail!("{failure}"),
    }
}

fn processor(config: &TreeflowConfig, logger: &Logger, mode: ExecutionMode) -> anyhow::Result<Processor> {
    let mut engine = config.engine_config();
    engine.mode = mode;
    Ok(Processor::from_config(config)?
        .with_engine(engine)
        .with_logger(logger.clone()))
}
