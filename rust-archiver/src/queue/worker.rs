//! The single job worker.
//!
//! Takes jobs from the store one at a time, runs the fetcher and records
//! the outcome. On success the ledger is written before the job is marked
//! completed, and the in-flight entry is cleared last, so a monitor cycle
//! never sees a media id that is neither in flight nor in the ledger.
//!
//! A job only owns the in-flight entry for the media id it was created
//! with. Manual jobs start without one and never touch the tracker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_store::{JobOutcome, JobStore};
use crate::domain::Job;
use crate::fetcher::{FetchError, FetchRequest, Fetcher};
use crate::inflight::InflightTracker;
use crate::ledger::Ledger;

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep between queue checks when nothing woke the worker.
    pub idle_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct Worker {
    store: Arc<JobStore>,
    ledger: Arc<Ledger>,
    inflight: Arc<InflightTracker>,
    fetcher: Arc<dyn Fetcher>,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        store: Arc<JobStore>,
        ledger: Arc<Ledger>,
        inflight: Arc<InflightTracker>,
        fetcher: Arc<dyn Fetcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            inflight,
            fetcher,
            config,
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the worker loop. Calling this twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Worker already started");
            return;
        }

        let worker = Arc::clone(self);
        let notifier = self.store.notifier();
        let cancellation_token = self.cancellation_token.clone();
        let poll_interval = self.config.idle_poll_interval;

        *task = Some(tokio::spawn(async move {
            info!("Worker started");
            loop {
                if cancellation_token.is_cancelled() {
                    break;
                }

                // Drain whatever is runnable before waiting again.
                if worker.run_once().await {
                    continue;
                }

                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = notifier.notified() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            info!("Worker stopped");
        }));
    }

    /// Stop the loop, cancelling the running job, and wait for it to exit.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        self.store.cancel_current();

        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Worker task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run the next job if the store lets us. Returns whether a job ran.
    pub async fn run_once(&self) -> bool {
        let Some(job) = self.store.start_next() else {
            return false;
        };
        self.process(job).await;
        true
    }

    async fn process(&self, job: Job) {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            url = %job.url,
            resolution = %job.params.resolution,
            queue_wait_secs = job.queue_wait_secs().unwrap_or_default(),
            "Processing job"
        );

        let result = self.run_fetch(&job).await;

        let outcome = match result {
            Ok(output) => {
                let resolved_id = Some(output.media_id)
                    .filter(|id| !id.trim().is_empty())
                    .or_else(|| job.media_id.clone());
                // The ledger must know about the id before the job (and the
                // in-flight entry) say it is done.
                match &resolved_id {
                    Some(media_id) => {
                        self.ledger.insert(media_id).await;
                    }
                    None => warn!(job_id = %job.id, "Completed job has no media id"),
                }
                JobOutcome::Completed {
                    media_id: resolved_id,
                    title: output.title,
                    output_path: output.output_path,
                }
            }
            Err(FetchError::Canceled) => JobOutcome::Canceled,
            Err(FetchError::Failed(message)) => JobOutcome::Failed(message),
        };

        match self.store.finish(&job.id, outcome) {
            Ok(finished) => match &finished.error {
                Some(err) => warn!(
                    job_id = %finished.id,
                    status = %finished.status,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job did not complete"
                ),
                None => info!(
                    job_id = %finished.id,
                    status = %finished.status,
                    media_id = ?finished.media_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job finished"
                ),
            },
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to record job outcome"),
        }

        if let Some(media_id) = &job.media_id {
            self.inflight.remove(media_id);
        }
    }

    /// Run the fetcher on its own task so a panic fails the job instead of
    /// taking the worker down.
    async fn run_fetch(
        &self,
        job: &Job,
    ) -> std::result::Result<crate::fetcher::FetchOutput, FetchError> {
        let request = FetchRequest {
            job_id: job.id.clone(),
            url: job.url.clone(),
            media_id: job.media_id.clone(),
            params: job.params,
        };
        let fetcher = self.fetcher.clone();
        let token = job.cancellation_token.clone();

        match tokio::spawn(async move { fetcher.fetch(&request, token).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(job_id = %job.id, "Fetcher panicked");
                Err(FetchError::failed("fetcher panicked"))
            }
            Err(e) => {
                debug!(job_id = %job.id, error = %e, "Fetch task did not complete");
                Err(FetchError::failed(format!("fetch task aborted: {e}")))
            }
        }
    }
}
