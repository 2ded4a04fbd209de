//! Batch supervision: fan independent document jobs out across a bounded
//! worker pool, stream per-job status, and support cooperative cancellation.
//!
//! ## Concurrency shape
//!
//! Jobs run as `spawn_blocking` tasks (extraction, OCR, and rendering are
//! CPU-bound) driven through `buffer_unordered`, so at most
//! `min(job count, max_parallelism)` documents are in flight. Updates are
//! streamed through an mpsc channel in completion order; every update
//! carries the job's stable submission index, and the eager [`BatchSupervisor::run`]
//! wrapper reassembles results in that order regardless of completion time.
//!
//! ## Cancellation
//!
//! The [`CancellationToken`] is a shared atomic flag. `buffer_unordered`
//! polls queued job futures lazily as slots free up, and each future checks
//! the token before dispatching its blocking work: once the token is set, no
//! further work starts and every not-yet-started job reports `Cancelled`.
//! Cancellation is non-preemptive; a job already inside a worker runs to its
//! own terminal state. Every job therefore ends in exactly one of
//! `Done`, `Error`, or `Cancelled`.
//!
//! ## Worker-local pipelines
//!
//! Each job gets a fresh [`DocumentPipeline`], so result caches are local to
//! a job and a batch containing the same document twice computes it twice.
//! That matches the cache's contract (intra-session reuse on a long-lived
//! pipeline, not batch-wide dedup) and keeps workers free of shared state.

use crate::config::{PipelineConfig, ProcessingRequest};
use crate::document::{derive_output_name, ProcessingResult};
use crate::pipeline::DocumentPipeline;
use futures::stream::StreamExt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{info, warn};

/// One document job in a batch.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Stable submission index used for output ordering.
    pub index: usize,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub request: ProcessingRequest,
}

/// A status update for one job, tagged with its submission index.
#[derive(Debug)]
pub enum JobUpdate {
    /// The job entered a worker.
    Processing { index: usize, filename: String },
    /// Terminal: processing succeeded.
    Done {
        index: usize,
        filename: String,
        output_name: String,
        result: ProcessingResult,
    },
    /// Terminal: processing failed; siblings are unaffected.
    Error {
        index: usize,
        filename: String,
        message: String,
    },
    /// Terminal: the job never started because the batch was cancelled.
    Cancelled { index: usize, filename: String },
}

impl JobUpdate {
    pub fn index(&self) -> usize {
        match self {
            Self::Processing { index, .. }
            | Self::Done { index, .. }
            | Self::Error { index, .. }
            | Self::Cancelled { index, .. } => *index,
        }
    }

    /// True for `Done`/`Error`/`Cancelled`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing { .. })
    }
}

/// Shared cooperative-cancellation flag.
///
/// Cloning shares the flag; any clone can cancel.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Aggregate outcome of an eager batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Terminal updates re-ordered by submission index.
    pub outcomes: Vec<JobUpdate>,
    pub done: usize,
    pub errors: usize,
    pub cancelled: usize,
}

/// A boxed stream of job updates.
pub type JobUpdateStream = Pin<Box<dyn Stream<Item = JobUpdate> + Send>>;

/// Fans document jobs out across a bounded worker pool.
#[derive(Debug, Clone)]
pub struct BatchSupervisor {
    config: PipelineConfig,
    max_parallelism: usize,
}

impl BatchSupervisor {
    /// Create a supervisor; `max_parallelism` defaults to the machine's
    /// available parallelism.
    pub fn new(config: PipelineConfig) -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            config,
            max_parallelism: available,
        }
    }

    pub fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n.max(1);
        self
    }

    /// Stream per-job updates as they happen.
    ///
    /// Each job emits one `Processing` update followed by exactly one
    /// terminal update. Updates arrive in completion order; sort terminal
    /// updates by [`JobUpdate::index`] to recover submission order.
    pub fn run_stream(&self, jobs: Vec<BatchJob>, token: CancellationToken) -> JobUpdateStream {
        let worker_count = self.max_parallelism.min(jobs.len()).max(1);
        info!(jobs = jobs.len(), workers = worker_count, "starting batch");

        let (tx, rx) = tokio::sync::mpsc::channel::<JobUpdate>(worker_count * 2 + 4);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut in_flight = futures::stream::iter(jobs.into_iter().map(|job| {
                let tx = tx.clone();
                let token = token.clone();
                let config = config.clone();
                async move { run_job(job, config, token, tx).await }
            }))
            .buffer_unordered(worker_count);

            while let Some(update) = in_flight.next().await {
                if tx.send(update).await.is_err() {
                    // Receiver dropped: nobody is listening any more.
                    break;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Run a batch to completion, collecting terminal updates in submission
    /// order plus aggregate counts.
    pub async fn run(&self, jobs: Vec<BatchJob>, token: CancellationToken) -> BatchReport {
        let mut stream = self.run_stream(jobs, token);
        let mut report = BatchReport::default();

        while let Some(update) = stream.next().await {
            match &update {
                JobUpdate::Processing { .. } => continue,
                JobUpdate::Done { .. } => report.done += 1,
                JobUpdate::Error { .. } => report.errors += 1,
                JobUpdate::Cancelled { .. } => report.cancelled += 1,
            }
            report.outcomes.push(update);
        }

        report.outcomes.sort_by_key(|u| u.index());
        report
    }
}

/// Drive one job to its terminal state.
///
/// Emits `Processing` through the channel itself; the terminal update is the
/// return value so the supervisor loop forwards exactly one per job.
async fn run_job(
    job: BatchJob,
    config: PipelineConfig,
    token: CancellationToken,
    tx: tokio::sync::mpsc::Sender<JobUpdate>,
) -> JobUpdate {
    let BatchJob {
        index,
        filename,
        bytes,
        request,
    } = job;

    // The token is checked when the future is first polled, which is the
    // moment this job would otherwise enter a worker.
    if token.is_cancelled() {
        return JobUpdate::Cancelled { index, filename };
    }

    let _ = tx
        .send(JobUpdate::Processing {
            index,
            filename: filename.clone(),
        })
        .await;

    let (anonymize, remove_pii, extract_json) =
        (request.anonymize, request.remove_pii, request.extract_json);
    let worker_filename = filename.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let pipeline = DocumentPipeline::new(config);
        pipeline.process(&bytes, &worker_filename, &request)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => {
            let output_name = derive_output_name(&filename, anonymize, remove_pii, extract_json);
            JobUpdate::Done {
                index,
                filename,
                output_name,
                result,
            }
        }
        Ok(Err(e)) => JobUpdate::Error {
            index,
            filename,
            message: e.to_string(),
        },
        Err(join_error) => {
            warn!(%filename, error = %join_error, "worker task failed");
            JobUpdate::Error {
                index,
                filename,
                message: format!("worker task failed: {join_error}"),
            }
        }
    }
}
