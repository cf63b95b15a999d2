//! Threaded pool: one blocking task per source, bounded by a semaphore

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::{panic_message, FailureKind, FileFailure, FileOutcome, FileTask, Progress};
use crate::source::Source;

pub(super) async fn run<T: FileTask>(
    sources: &[Source],
    task: Arc<T>,
    workers: usize,
    progress: &mut Progress<'_>,
) -> Vec<FileOutcome<T::Output>> {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut set = JoinSet::new();

    for (index, source) in sources.iter().cloned().enumerate() {
        let task = Arc::clone(&task);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            // Permit is held for the whole file, released on drop
            let _permit = semaphore.acquire_owned().await.ok();
            let start = Instant::now();
            debug!(index, source = %source, "Task started");

            let input = source.clone();
            let joined = tokio::task::spawn_blocking(move || task.process_one(&input)).await;
            let outcome = match joined {
                Ok(result) => FileOutcome::from_result(source, result),
                Err(err) => {
                    let message = match err.try_into_panic() {
                        Ok(payload) => panic_message(payload.as_ref()),
                        Err(err) => err.to_string(),
                    };
                    FileOutcome::Failed(FileFailure::new(
                        source,
                        FailureKind::WorkerPanicked,
                        message,
                    ))
                }
            };
            (index, outcome, start.elapsed())
        });
    }

    let mut slots: Vec<Option<FileOutcome<T::Output>>> = sources.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome, elapsed)) => {
                progress.record(&outcome, elapsed);
                slots[index] = Some(outcome);
            }
            Err(err) => error!(error = %err, "Task scheduler failed"),
        }
    }

    slots
        .into_iter()
        .zip(sources)
        .map(|(slot, source)| {
            slot.unwrap_or_else(|| {
                FileOutcome::Failed(FileFailure::new(
                    source.clone(),
                    FailureKind::WorkerPanicked,
                    "task did not complete",
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use crate::engine::{Engine, EngineConfig, FailureKind, FileTask, TaskError};
    use crate::logger::Logger;
    use crate::source::Source;

    /// Sleeps longer for earlier files so completion order is reversed
    #[derive(Debug, Serialize, Deserialize)]
    struct SlowFirst {
        total: u64,
    }

    impl FileTask for SlowFirst {
        type Output = String;
        const NAME: &'static str = "slow-first";

        fn process_one(&self, source: &Source) -> Result<String, TaskError> {
            let index: u64 = source.id.trim_start_matches('f').parse().unwrap_or(0);
            std::thread::sleep(Duration::from_millis((self.total - index) * 15));
            Ok(source.id.to_uppercase())
        }
    }

    static RUNNING: AtomicUsize = AtomicUsize::new(0);
    static PEAK: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Serialize, Deserialize)]
    struct Gauge;

    impl FileTask for Gauge {
        type Output = ();
        const NAME: &'static str = "gauge";

        fn process_one(&self, _source: &Source) -> Result<(), TaskError> {
            let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
            PEAK.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            RUNNING.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct PanicsOn {
        id: String,
    }

    impl FileTask for PanicsOn {
        type Output = usize;
        const NAME: &'static str = "panics-on";

        fn process_one(&self, source: &Source) -> Result<usize, TaskError> {
            if source.id == self.id {
                panic!("cannot handle {}", source.id);
            }
            Ok(source.id.len())
        }
    }

    fn sources(n: usize) -> Vec<Source> {
        (0..n).map(|i| Source::local(format!("f{i}"))).collect()
    }

    fn engine(workers: usize) -> Engine {
        Engine::new(EngineConfig::threads(workers)).with_logger(Logger::silent())
    }

    #[tokio::test]
    async fn test_results_in_source_order() {
        let outcomes = engine(4)
            .run(&sources(6), std::sync::Arc::new(SlowFirst { total: 6 }))
            .await
            .unwrap();
        let values: Vec<&str> = outcomes
            .iter()
            .map(|o| o.value().unwrap().as_str())
            .collect();
        assert_eq!(values, vec!["F0", "F1", "F2", "F3", "F4", "F5"]);
    }

    #[tokio::test]
    async fn test_pool_is_bounded() {
        let outcomes = engine(2)
            .run(&sources(8), std::sync::Arc::new(Gauge))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 8);
        assert!(PEAK.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let outcomes = engine(3)
            .run(&sources(4), std::sync::Arc::new(PanicsOn { id: "f2".into() }))
            .await
            .unwrap();
        assert!(outcomes[0].is_ok() && outcomes[1].is_ok() && outcomes[3].is_ok());
        let failure = outcomes[2].failure().unwrap();
        assert_eq!(failure.kind, FailureKind::WorkerPanicked);
        assert!(failure.message.contains("cannot handle f2"));
    }

    #[tokio::test]
    async fn test_empty_and_zero_workers() {
        assert!(engine(2)
            .run(&[], std::sync::Arc::new(Gauge))
            .await
            .unwrap()
            .is_empty());
        assert!(engine(0)
            .run(&sources(1), std::sync::Arc::new(Gauge))
            .await
            .is_err());
    }
}
