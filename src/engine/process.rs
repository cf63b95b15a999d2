//! Process pool: fresh worker processes speaking newline-delimited JSON
//!
//! Every worker is launched from scratch (`<program> worker`) with a cleared
//! environment, so nothing from the parent is inherited except the
//! variables listed in [`PASSTHROUGH_ENV`] and `TREEFLOW_*`. Tasks and
//! results cross the boundary by value:
//!
//! ```text
//!   parent ── {"id":3,"task":"extract","params":{..},"source":{..}} ──► stdin
//!   parent ◄── {"id":3,"result":{"Ok":{..}}} ──────────────────────── stdout
//! ```
//!
//! A worker that dies mid-task fails only that source (`WorkerCrashed`) and
//! is replaced before the next one. Failing to launch a worker at all is
//! fatal for the batch.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{FailureKind, FileFailure, FileOutcome, FileTask, Progress};
use crate::error::{Result, TreeflowError};
use crate::source::Source;
use crate::worker::{WorkerRequest, WorkerResponse, VERBOSITY_FLAG, WORKER_COMMAND};

/// Environment variables forwarded to worker processes
pub const PASSTHROUGH_ENV: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "RUST_LOG"];

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type Job = (usize, Source);
type Done = (usize, FileOutcome<Value>, Duration);

pub(super) struct PoolSettings {
    pub program: PathBuf,
    pub workers: usize,
    pub verbosity: u8,
}

pub(super) async fn run<T: FileTask>(
    sources: &[Source],
    task: &T,
    pool: &PoolSettings,
    progress: &mut Progress<'_>,
) -> Result<Vec<FileOutcome<T::Output>>> {
    let params = serde_json::to_value(task)?;
    let queue: Arc<Mutex<VecDeque<Job>>> =
        Arc::new(Mutex::new(sources.iter().cloned().enumerate().collect()));
    let launch = Arc::new(Launch {
        program: pool.program.clone(),
        verbosity: pool.verbosity,
    });

    let (tx, mut rx) = mpsc::channel::<Done>(pool.workers * 2);
    let mut drivers = JoinSet::new();
    for worker_id in 0..pool.workers {
        drivers.spawn(drive_worker(
            worker_id,
            Arc::clone(&launch),
            T::NAME,
            params.clone(),
            Arc::clone(&queue),
            tx.clone(),
        ));
    }
    drop(tx);

    let mut slots: Vec<Option<FileOutcome<Value>>> = sources.iter().map(|_| None).collect();
    while let Some((index, outcome, elapsed)) = rx.recv().await {
        progress.record(&outcome, elapsed);
        slots[index] = Some(outcome);
    }

    let mut fatal = None;
    while let Some(joined) = drivers.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(err) => TreeflowError::WorkerProtocol {
                reason: format!("worker driver failed: {err}"),
            },
        };
        fatal.get_or_insert(err);
    }
    if let Some(err) = fatal {
        return Err(err);
    }

    Ok(slots
        .into_iter()
        .zip(sources)
        .map(|(slot, source)| match slot {
            Some(outcome) => decode_output::<T>(outcome),
            None => FileOutcome::Failed(FileFailure::new(
                source.clone(),
                FailureKind::WorkerCrashed,
                "no result received",
            )),
        })
        .collect())
}

fn decode_output<T: FileTask>(outcome: FileOutcome<Value>) -> FileOutcome<T::Output> {
    match outcome {
        FileOutcome::Ok { source, value } => match serde_json::from_value(value) {
            Ok(value) => FileOutcome::Ok { source, value },
            Err(e) => FileOutcome::Failed(FileFailure::new(
                source,
                FailureKind::TaskFailed,
                format!("undecodable worker output: {e}"),
            )),
        },
        FileOutcome::Failed(failure) => FileOutcome::Failed(failure),
    }
}

/// Pulls jobs off the shared queue until it is empty, one worker process at a time
async fn drive_worker(
    worker_id: usize,
    launch: Arc<Launch>,
    task_name: &'static str,
    params: Value,
    queue: Arc<Mutex<VecDeque<Job>>>,
    results: mpsc::Sender<Done>,
) -> Result<()> {
    let mut worker: Option<WorkerProcess> = None;

    loop {
        let job = queue.lock().await.pop_front();
        let Some((index, source)) = job else {
            break;
        };

        if worker.is_none() {
            worker = Some(WorkerProcess::spawn(&launch, worker_id)?);
        }

        let start = Instant::now();
        let request = WorkerRequest {
            id: index as u64,
            task: task_name.to_string(),
            params: params.clone(),
            source: source.clone(),
        };

        let reply = match worker.as_mut() {
            Some(process) => process.call(&request).await,
            None => break,
        };
        let outcome = match reply {
            Ok(response) => FileOutcome::from_result(source, response.result),
            Err(err) => {
                warn!(worker = worker_id, source = %source, error = %err, "Worker lost, replacing it");
                if let Some(dead) = worker.take() {
                    dead.kill().await;
                }
                FileOutcome::Failed(FileFailure::new(
                    source,
                    FailureKind::WorkerCrashed,
                    err.to_string(),
                ))
            }
        };

        if results.send((index, outcome, start.elapsed())).await.is_err() {
            break;
        }
    }

    if let Some(process) = worker {
        process.shutdown().await;
    }
    Ok(())
}

struct Launch {
    program: PathBuf,
    verbosity: u8,
}

/// One live worker process
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    worker_id: usize,
}

impl WorkerProcess {
    fn spawn(launch: &Launch, worker_id: usize) -> Result<Self> {
        let spawn_error = |reason: String| TreeflowError::WorkerSpawn {
            program: launch.program.clone(),
            reason,
        };

        let mut child = Command::new(&launch.program)
            .arg(WORKER_COMMAND)
            .arg(VERBOSITY_FLAG)
            .arg(launch.verbosity.to_string())
            .env_clear()
            .envs(passthrough_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".to_string()))?;

        debug!(worker = worker_id, pid = ?child.id(), "Worker process started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            worker_id,
        })
    }

    async fn call(&mut self, request: &WorkerRequest) -> Result<WorkerResponse> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = self
            .stdout
            .next_line()
            .await?
            .ok_or_else(|| TreeflowError::WorkerProtocol {
                reason: "worker exited before replying".to_string(),
            })?;
        let response: WorkerResponse =
            serde_json::from_str(&reply).map_err(|e| TreeflowError::WorkerProtocol {
                reason: format!("unreadable reply: {e}"),
            })?;
        if response.id != request.id {
            return Err(TreeflowError::WorkerProtocol {
                reason: format!("reply for task {} while waiting for {}", response.id, request.id),
            });
        }
        Ok(response)
    }

    /// Close stdin and wait for a clean exit, killing the process if it lingers
    async fn shutdown(mut self) {
        drop(self.stdin);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(worker = self.worker_id, %status, "Worker process exited"),
            _ => {
                warn!(worker = self.worker_id, "Worker did not exit, killing it");
                let _ = self.child.kill().await;
            }
        }
    }

    async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}

fn passthrough_env() -> Vec<(OsString, OsString)> {
    std::env::vars_os()
        .filter(|(key, _)| {
            key.to_str().is_some_and(|key| {
                PASSTHROUGH_ENV.contains(&key) || key.starts_with("TREEFLOW_")
            })
        })
        .collect()
}
