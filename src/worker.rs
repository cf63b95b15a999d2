//! Worker process side of the process pool
//!
//! A worker reads one [`WorkerRequest`] per stdin line, rebuilds the task
//! from its registry entry, runs it on the request's source and writes one
//! [`WorkerResponse`] line to stdout. Logging goes to stderr only.
//!
//! Tasks must be registered by name before the worker can run them: the
//! parent sends task parameters, never code.
//!
//! The pool launches `<program> worker --verbosity N`. A binary that runs
//! its own tasks in process mode must answer that invocation first thing in
//! `main`:
//!
//! ```ignore
//! fn main() {
//!     let registry = WorkerRegistry::with_builtin().register::<CountHits>();
//!     if let Some(code) = treeflow::worker::run_if_worker(&registry) {
//!         std::process::exit(code);
//!     }
//!     // normal program
//! }
//! ```

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::engine::{panic_message, FailureKind, FileTask, TaskError};
use crate::error::{Result, TreeflowError};
use crate::extract::Extractor;
use crate::skeleton::{CountEntries, EchoTask};
use crate::source::Source;

/// First argument of a worker invocation
pub const WORKER_COMMAND: &str = "worker";

/// Flag carrying the worker's verbosity
pub const VERBOSITY_FLAG: &str = "--verbosity";

/// Parent → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: u64,
    pub task: String,
    pub params: Value,
    pub source: Source,
}

/// Worker → parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: u64,
    pub result: std::result::Result<Value, TaskError>,
}

type Handler = Box<dyn Fn(Value, &Source) -> std::result::Result<Value, TaskError> + Send + Sync>;

/// Task name → handler table
#[derive(Default)]
pub struct WorkerRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every task this crate ships
    pub fn with_builtin() -> Self {
        Self::new()
            .register::<Extractor>()
            .register::<EchoTask>()
            .register::<CountEntries>()
    }

    pub fn register<T: FileTask>(mut self) -> Self {
        self.handlers.insert(T::NAME, Box::new(run_task::<T>));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered task names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run one request; a panicking task becomes a `WorkerPanicked` failure
    pub fn handle(&self, request: WorkerRequest) -> WorkerResponse {
        let WorkerRequest {
            id,
            task,
            params,
            source,
        } = request;

        let result = match self.handlers.get(task.as_str()) {
            None => Err(TaskError::failed(
                TreeflowError::UnknownTask { name: task }.to_string(),
            )),
            Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(params, &source)))
                .unwrap_or_else(|payload| {
                    Err(TaskError::new(
                        FailureKind::WorkerPanicked,
                        panic_message(payload.as_ref()),
                    ))
                }),
        };
        WorkerResponse { id, result }
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

fn run_task<T: FileTask>(params: Value, source: &Source) -> std::result::Result<Value, TaskError> {
    let task: T = serde_json::from_value(params)
        .map_err(|e| TaskError::failed(format!("cannot decode '{}' parameters: {e}", T::NAME)))?;
    let output = task.process_one(source)?;
    serde_json::to_value(output)
        .map_err(|e| TaskError::failed(format!("cannot encode '{}' output: {e}", T::NAME)))
}

/// Serve requests until `input` is closed; returns the number handled
///
/// A line that is not a request is a protocol error and ends the loop.
#[instrument(skip_all)]
pub fn serve<R: BufRead, W: Write>(registry: &WorkerRegistry, input: R, mut output: W) -> Result<usize> {
    let mut handled = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest =
            serde_json::from_str(&line).map_err(|e| TreeflowError::WorkerProtocol {
                reason: format!("bad request: {e}"),
            })?;
        debug!(id = request.id, task = %request.task, source = %request.source, "Request received");

        let response = registry.handle(request);
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
        handled += 1;
    }
    debug!(handled, "Input closed, worker exiting");
    Ok(handled)
}

/// Worker verbosity if `args` (without the program name) is a worker invocation
///
/// Only `worker` in first position counts. A missing or unreadable verbosity
/// falls back to 0.
pub fn worker_invocation<I, S>(args: I) -> Option<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = args.into_iter();
    if args.next()?.as_ref() != WORKER_COMMAND {
        return None;
    }
    let mut verbosity = 0;
    while let Some(arg) = args.next() {
        let arg = arg.as_ref();
        let value = match arg.strip_prefix(VERBOSITY_FLAG) {
            Some("") => args.next().map(|v| v.as_ref().to_string()),
            Some(rest) => rest.strip_prefix('=').map(str::to_string),
            None => None,
        };
        if let Some(value) = value {
            verbosity = value.parse().unwrap_or(0);
        }
    }
    Some(verbosity)
}

/// Serve on this process's stdin/stdout
pub fn serve_stdio(registry: &WorkerRegistry) -> Result<usize> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(registry, stdin.lock(), stdout.lock())
}

/// Run the worker loop if this process was launched as a pool worker
///
/// Returns `None` for any other invocation, otherwise the exit code once the
/// parent closes stdin (0 on a clean end, 1 on a protocol or IO error).
pub fn run_if_worker(registry: &WorkerRegistry) -> Option<i32> {
    let verbosity = worker_invocation(std::env::args().skip(1))?;
    debug!(verbosity, tasks = ?registry.names(), "Worker started");
    Some(match serve_stdio(registry) {
        Ok(handled) => {
            debug!(handled, "Worker finished");
            0
        }
        Err(err) => {
            error!(error = %err, "Worker loop failed");
            1
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Suffix {
        suffix: String,
    }

    impl FileTask for Suffix {
        type Output = String;
        const NAME: &'static str = "suffix";

        fn process_one(&self, source: &Source) -> std::result::Result<String, TaskError> {
            if source.id == "explode" {
                panic!("exploded");
            }
            Ok(format!("{}{}", source.id, self.suffix))
        }
    }

    fn request(id: u64, task: &str, source: &str) -> WorkerRequest {
        WorkerRequest {
            id,
            task: task.to_string(),
            params: json!({"suffix": "!"}),
            source: Source::local(source),
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = WorkerRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["count-entries", "echo", "extract"]);
    }

    #[test]
    fn test_handle_runs_registered_task() {
        let registry = WorkerRegistry::new().register::<Suffix>();
        let response = registry.handle(request(7, "suffix", "a.json"));
        assert_eq!(response.id, 7);
        assert_eq!(response.result, Ok(json!("a.json!")));
    }

    #[test]
    fn test_unknown_task_is_a_file_failure() {
        let registry = WorkerRegistry::new();
        let response = registry.handle(request(1, "suffix", "a.json"));
        let err = response.result.unwrap_err();
        assert_eq!(err.kind, FailureKind::TaskFailed);
        assert!(err.message.contains("TF-042"));
    }

    #[test]
    fn test_panic_is_caught() {
        let registry = WorkerRegistry::new().register::<Suffix>();
        let err = registry
            .handle(request(2, "suffix", "explode"))
            .result
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::WorkerPanicked);
        assert_eq!(err.message, "exploded");
    }

    #[test]
    fn test_bad_params_fail_the_file() {
        let registry = WorkerRegistry::new().register::<Suffix>();
        let mut req = request(3, "suffix", "a.json");
        req.params = json!({"wrong": 1});
        let err = registry.handle(req).result.unwrap_err();
        assert!(err.message.contains("cannot decode 'suffix' parameters"));
    }

    #[test]
    fn test_serve_answers_each_line() {
        let registry = WorkerRegistry::new().register::<Suffix>();
        let input = format!(
            "{}\n\n{}\n",
            serde_json::to_string(&request(0, "suffix", "a")).unwrap(),
            serde_json::to_string(&request(1, "suffix", "b")).unwrap()
        );
        let mut output = Vec::new();
        let handled = serve(&registry, input.as_bytes(), &mut output).unwrap();
        assert_eq!(handled, 2);

        let replies: Vec<WorkerResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies[0].result, Ok(json!("a!")));
        assert_eq!(replies[1].id, 1);
    }

    #[test]
    fn test_worker_invocation() {
        assert_eq!(worker_invocation(["worker", "--verbosity", "2"]), Some(2));
        assert_eq!(worker_invocation(["worker", "--verbosity=1"]), Some(1));
        assert_eq!(worker_invocation(["worker"]), Some(0));
        assert_eq!(worker_invocation(["worker", "--verbosity", "loud"]), Some(0));
        assert_eq!(worker_invocation(["process", "worker"]), None);
        assert_eq!(worker_invocation(Vec::<String>::new()), None);
    }

    #[test]
    fn test_serve_rejects_garbage() {
        let registry = WorkerRegistry::new();
        let err = serve(&registry, "not json\n".as_bytes(), Vec::new()).unwrap_err();
        assert!(matches!(err, TreeflowError::WorkerProtocol { .. }));
    }
}
