//! Plumbing shared by every stage: handoff channels, bounded fan-out and fan-in

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::error::{ErrorSink, PipelineError, Stage};

/// Concurrency and buffering limits applied to each stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    /// Maximum number of workers running at once within one stage
    pub max_concurrency: usize,
    /// Capacity of each handoff channel; `0` makes every send a rendezvous
    pub channel_capacity: usize,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            channel_capacity: 0,
        }
    }
}

/// Item counts observed while the pipeline runs
#[derive(Debug, Default)]
pub struct StageCounters {
    listed: AtomicUsize,
    fetched: AtomicUsize,
    extracted: AtomicUsize,
}

impl StageCounters {
    pub(crate) fn add_listed(&self, count: usize) {
        self.listed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_extracted(&self) {
        self.extracted.fetch_add(1, Ordering::Relaxed);
    }

    /// Message identifiers produced by the lister
    #[must_use]
    pub fn listed(&self) -> usize {
        self.listed.load(Ordering::Relaxed)
    }

    /// Messages whose content was fetched
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::Relaxed)
    }

    /// Attachment records produced by the extractor
    #[must_use]
    pub fn extracted(&self) -> usize {
        self.extracted.load(Ordering::Relaxed)
    }
}

/// State shared by the stages of one pipeline run
#[derive(Debug, Clone)]
pub struct StageContext {
    errors: ErrorSink,
    shutdown: CancellationToken,
    limits: StageLimits,
    counters: Arc<StageCounters>,
}

impl StageContext {
    /// Creates a context publishing to `errors` and stopping on `shutdown`
    #[must_use]
    pub fn new(errors: ErrorSink, shutdown: CancellationToken, limits: StageLimits) -> Self {
        Self {
            errors,
            shutdown,
            limits,
            counters: Arc::new(StageCounters::default()),
        }
    }

    /// Shared error channel
    #[must_use]
    pub const fn errors(&self) -> &ErrorSink {
        &self.errors
    }

    /// Token cancelled once the run has failed
    #[must_use]
    pub const fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Counters for this run
    #[must_use]
    pub fn counters(&self) -> &StageCounters {
        &self.counters
    }

    /// Creates a handoff channel sized by the stage limits
    #[must_use]
    pub fn channel<T>(&self) -> (flume::Sender<T>, flume::Receiver<T>) {
        flume::bounded(self.limits.channel_capacity)
    }

    pub(crate) fn fan_out<T: Send + 'static>(&self, stage: Stage) -> FanOut<T> {
        FanOut {
            stage,
            permits: Arc::new(Semaphore::new(self.limits.max_concurrency.max(1))),
            workers: JoinSet::new(),
            outputs: Vec::new(),
            errors: self.errors.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Receives the next input item, or `None` once the input is closed or
    /// the run was cancelled.
    pub(crate) async fn next_input<T>(&self, input: &flume::Receiver<T>) -> Option<T> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            item = input.recv_async() => item.ok(),
        }
    }
}

/// Output side of a running stage
#[derive(Debug)]
pub struct StageHandle<T> {
    /// Items produced by the stage; closed once every worker has finished
    pub output: flume::Receiver<T>,
    /// The stage's dispatcher task
    pub task: JoinHandle<()>,
}

/// Semaphore-gated worker set for one stage.
///
/// Workers are spawned one per input item but at most `max_concurrency` run
/// at once. [`FanOut::join`] waits for all of them, so a stage that drops its
/// output sender after joining closes its channel exactly once.
pub(crate) struct FanOut<T> {
    stage: Stage,
    permits: Arc<Semaphore>,
    workers: JoinSet<T>,
    outputs: Vec<T>,
    errors: ErrorSink,
    shutdown: CancellationToken,
}

impl<T: Send + 'static> FanOut<T> {
    /// Waits for a free slot and spawns `work`.
    ///
    /// Returns `false` without spawning if the run is cancelled while waiting.
    pub async fn spawn<F>(&mut self, work: F) -> bool
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.reap_finished();

        let permit = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return false,
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        self.workers.spawn(async move {
            let output = work.await;
            drop(permit);
            output
        });
        true
    }

    /// Waits for every spawned worker and returns their outputs
    pub async fn join(mut self) -> Vec<T> {
        while let Some(result) = self.workers.join_next().await {
            self.collect(result);
        }
        self.outputs
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.workers.try_join_next() {
            self.collect(result);
        }
    }

    fn collect(&mut self, result: Result<T, JoinError>) {
        match result {
            Ok(output) => self.outputs.push(output),
            Err(source) => self.errors.publish(PipelineError::WorkerFailed {
                stage: self.stage,
                source,
            }),
        }
    }
}
