//! In-memory job store and FIFO queue.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::events::{JobEvent, JobEventBroadcaster};
use crate::domain::{Job, JobRequest, JobStatus};
use crate::{Error, Result};

/// How a job ended, as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        media_id: Option<String>,
        title: Option<String>,
        output_path: Option<PathBuf>,
    },
    Failed(String),
    Canceled,
}

impl JobOutcome {
    fn status(&self) -> JobStatus {
        match self {
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
            Self::Canceled => JobStatus::Canceled,
        }
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub downloading: usize,
    pub canceling: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Jobs waiting to be started.
    pub queue_depth: usize,
    pub paused: bool,
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<String, Job>,
    /// Job ids in creation order.
    order: Vec<String>,
    /// Pending job ids in dequeue order.
    pending: VecDeque<String>,
    /// Job currently owned by the worker.
    current: Option<String>,
    paused: bool,
}

impl StoreState {
    fn snapshot<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<Job> {
        ids.filter_map(|id| self.jobs.get(id).cloned()).collect()
    }
}

/// Ordered job records, the pending queue and the current-job pointer.
///
/// Every read and write goes through a single mutex, so snapshots never see
/// a half-updated job and at most one job is ever current.
pub struct JobStore {
    state: Mutex<StoreState>,
    /// Wakes the worker when a job is added or the queue is resumed.
    notify: Arc<Notify>,
    events: JobEventBroadcaster,
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_events(JobEventBroadcaster::new())
    }

    pub fn with_events(events: JobEventBroadcaster) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            notify: Arc::new(Notify::new()),
            events,
        }
    }

    /// Add a job to the tail of the queue and return its id.
    ///
    /// Duplicate prevention is up to the caller.
    pub fn add_job(&self, request: JobRequest) -> String {
        let job = Job::new(request);
        let job_id = job.id.clone();
        let event = JobEvent::Queued {
            job_id: job_id.clone(),
            url: job.url.clone(),
            media_id: job.media_id.clone(),
            origin: job.origin,
            timestamp: job.created_at,
        };

        {
            let mut state = self.state.lock();
            state.order.push(job_id.clone());
            state.pending.push_back(job_id.clone());
            state.jobs.insert(job_id.clone(), job);
            // Under the lock so `Queued` always precedes `Started`.
            self.events.publish(event);
        }

        info!(job_id = %job_id, "Enqueued job");
        self.notify.notify_one();
        job_id
    }

    /// All jobs, in creation order.
    pub fn list_jobs(&self) -> Vec<Job> {
        let state = self.state.lock();
        state.snapshot(state.order.iter())
    }

    /// Pending jobs, in dequeue order.
    pub fn get_queue(&self) -> Vec<Job> {
        let state = self.state.lock();
        state.snapshot(state.pending.iter())
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.state.lock().jobs.get(job_id).cloned()
    }

    /// The job the worker is executing, if any.
    pub fn current_job(&self) -> Option<Job> {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .and_then(|id| state.jobs.get(id).cloned())
    }

    /// Number of pending jobs.
    pub fn depth(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Stop the worker from starting new jobs. A running job is unaffected.
    pub fn pause(&self) {
        let changed = !std::mem::replace(&mut self.state.lock().paused, true);
        if changed {
            info!("Job queue paused");
            self.events.publish(JobEvent::PauseChanged {
                paused: true,
                timestamp: Utc::now(),
            });
        }
    }

    /// Let the worker start jobs again.
    pub fn resume(&self) {
        let changed = std::mem::replace(&mut self.state.lock().paused, false);
        if changed {
            info!("Job queue resumed");
            self.events.publish(JobEvent::PauseChanged {
                paused: false,
                timestamp: Utc::now(),
            });
        }
        self.notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Request cancellation of the running job.
    ///
    /// Signals the job's cancellation token and moves it to `canceling`.
    /// Returns `false`, changing nothing, when no job is running or the
    /// running job is already being canceled.
    pub fn cancel_current(&self) -> bool {
        let job_id = {
            let mut state = self.state.lock();
            let Some(job_id) = state.current.clone() else {
                return false;
            };
            let Some(job) = state.jobs.get_mut(&job_id) else {
                return false;
            };
            if job.status != JobStatus::Downloading {
                return false;
            }
            if let Err(e) = job.transition(JobStatus::Canceling) {
                warn!(job_id = %job_id, error = %e, "Cannot cancel current job");
                return false;
            }
            job.cancellation_token.cancel();
            job_id
        };

        info!(job_id = %job_id, "Cancellation requested");
        self.events.publish(JobEvent::CancelRequested {
            job_id,
            timestamp: Utc::now(),
        });
        true
    }

    /// Pop the head of the queue, make it current and mark it `downloading`.
    ///
    /// Returns `None` when paused, when the queue is empty, or when another
    /// job is still current.
    pub fn start_next(&self) -> Option<Job> {
        let job = {
            let mut state = self.state.lock();
            if state.paused || state.current.is_some() {
                return None;
            }

            loop {
                let job_id = state.pending.pop_front()?;
                let Some(job) = state.jobs.get_mut(&job_id) else {
                    warn!(job_id = %job_id, "Queued job missing from store, skipping");
                    continue;
                };
                if let Err(e) = job.transition(JobStatus::Downloading) {
                    warn!(job_id = %job_id, error = %e, "Skipping job that cannot start");
                    continue;
                }
                let job = job.clone();
                state.current = Some(job_id);
                break job;
            }
        };

        debug!(job_id = %job.id, "Dequeued job");
        self.events.publish(JobEvent::Started {
            job_id: job.id.clone(),
            url: job.url.clone(),
            timestamp: Utc::now(),
        });
        Some(job)
    }

    /// Record the outcome of the current job and clear the current pointer.
    pub fn finish(&self, job_id: &str, outcome: JobOutcome) -> Result<Job> {
        let job = {
            let mut state = self.state.lock();
            if state.current.as_deref() != Some(job_id) {
                return Err(Error::InvalidStateTransition {
                    from: format!("job {job_id} is not current"),
                    to: outcome.status().as_str().to_string(),
                });
            }
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| Error::not_found("Job", job_id))?;

            job.transition(outcome.status())?;
            match outcome {
                JobOutcome::Completed {
                    media_id,
                    title,
                    output_path,
                } => {
                    if media_id.is_some() {
                        job.media_id = media_id;
                    }
                    job.title = title;
                    job.output_path = output_path;
                    job.error = None;
                }
                JobOutcome::Failed(error) => job.error = Some(error),
                JobOutcome::Canceled => {}
            }
            let job = job.clone();
            state.current = None;
            job
        };

        self.events.publish(JobEvent::Finished {
            job_id: job.id.clone(),
            status: job.status,
            media_id: job.media_id.clone(),
            error: job.error.clone(),
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    /// Counts by status.
    pub fn stats(&self) -> JobStats {
        let state = self.state.lock();
        let mut stats = JobStats {
            total: state.jobs.len(),
            queue_depth: state.pending.len(),
            paused: state.paused,
            ..Default::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Downloading => stats.downloading += 1,
                JobStatus::Canceling => stats.canceling += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Canceled => stats.canceled += 1,
            }
        }
        stats
    }

    /// Notifier the worker waits on.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FetchParams, JobOrigin};
    use std::collections::HashSet;

    fn request(url: &str) -> JobRequest {
        JobRequest::manual(url, FetchParams::parse("720p", None, None).unwrap())
    }

    fn completed() -> JobOutcome {
        JobOutcome::Completed {
            media_id: Some("A".to_string()),
            title: Some("Title".to_string()),
            output_path: None,
        }
    }

    #[test]
    fn test_ids_are_distinct_and_queue_is_fifo() {
        let store = JobStore::new();
        let ids: Vec<String> = (0..20)
            .map(|i| store.add_job(request(&format!("https://example.com/{i}"))))
            .collect();

        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let queue: Vec<String> = store.get_queue().into_iter().map(|j| j.id).collect();
        assert_eq!(queue, ids);
        assert_eq!(store.depth(), 20);
    }

    #[test]
    fn test_enqueue_scenario_720p() {
        let store = JobStore::new();
        store.add_job(JobRequest::discovered(
            "https://example.com/watch?v=A",
            "A",
            FetchParams::parse("720p", None, None).unwrap(),
            JobOrigin::Playlist,
        ));

        let queue = store.get_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].status, JobStatus::Queued);
        assert_eq!(queue[0].params.resolution.to_string(), "720p");
        assert_eq!(queue[0].media_id.as_deref(), Some("A"));
    }

    #[test]
    fn test_start_next_single_current() {
        let store = JobStore::new();
        let first = store.add_job(request("https://example.com/1"));
        let second = store.add_job(request("https://example.com/2"));

        let job = store.start_next().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.status, JobStatus::Downloading);
        assert!(store.start_next().is_none());

        let queue: Vec<String> = store.get_queue().into_iter().map(|j| j.id).collect();
        assert_eq!(queue, vec![second.clone()]);

        store.finish(&first, completed()).unwrap();
        assert!(store.current_job().is_none());
        assert_eq!(store.start_next().unwrap().id, second);
    }

    #[test]
    fn test_list_jobs_keeps_creation_order_and_history() {
        let store = JobStore::new();
        let a = store.add_job(request("https://example.com/a"));
        let b = store.add_job(request("https://example.com/b"));
        store.start_next().unwrap();
        store.finish(&a, JobOutcome::Failed("boom".into())).unwrap();

        let jobs = store.list_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, a);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error.as_deref(), Some("boom"));
        assert_eq!(jobs[1].id, b);
        assert_eq!(jobs[1].status, JobStatus::Queued);
    }

    #[test]
    fn test_pause_blocks_dequeue() {
        let store = JobStore::new();
        let id = store.add_job(request("https://example.com/1"));
        store.pause();
        assert!(store.is_paused());
        assert!(store.start_next().is_none());
        assert_eq!(store.get_job(&id).unwrap().status, JobStatus::Queued);

        store.resume();
        assert!(!store.is_paused());
        assert_eq!(store.start_next().unwrap().id, id);
    }

    #[test]
    fn test_pause_does_not_touch_running_job() {
        let store = JobStore::new();
        let id = store.add_job(request("https://example.com/1"));
        store.start_next().unwrap();
        store.pause();
        let job = store.current_job().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Downloading);
        assert!(!job.cancellation_token.is_cancelled());
    }

    #[test]
    fn test_cancel_current_without_running_job() {
        let store = JobStore::new();
        let id = store.add_job(request("https://example.com/1"));
        let before = store.get_job(&id).unwrap();

        assert!(!store.cancel_current());

        let after = store.get_job(&id).unwrap();
        assert_eq!(after.status, JobStatus::Queued);
        assert_eq!(after.updated_at, before.updated_at);
        assert!(!after.cancellation_token.is_cancelled());
    }

    #[test]
    fn test_cancel_current_signals_token() {
        let store = JobStore::new();
        let id = store.add_job(request("https://example.com/1"));
        let running = store.start_next().unwrap();

        assert!(store.cancel_current());
        assert!(running.cancellation_token.is_cancelled());
        assert_eq!(store.get_job(&id).unwrap().status, JobStatus::Canceling);

        // A second request is a no-op.
        assert!(!store.cancel_current());

        let job = store.finish(&id, JobOutcome::Canceled).unwrap();
        assert_eq!(job.status, JobStatus::Canceled);
        assert!(store.current_job().is_none());
    }

    #[test]
    fn test_finish_requires_current_job() {
        let store = JobStore::new();
        let id = store.add_job(request("https://example.com/1"));
        let err = store.finish(&id, completed()).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(store.get_job(&id).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn test_finish_completed_fills_result_fields() {
        let store = JobStore::new();
        let id = store.add_job(request("https://example.com/1"));
        store.start_next().unwrap();
        let job = store
            .finish(
                &id,
                JobOutcome::Completed {
                    media_id: Some("MID".to_string()),
                    title: Some("A title".to_string()),
                    output_path: Some(PathBuf::from("/archive/A title [MID].mkv")),
                },
            )
            .unwrap();
        assert_eq!(job.media_id.as_deref(), Some("MID"));
        assert_eq!(job.title.as_deref(), Some("A title"));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_stats() {
        let store = JobStore::new();
        let a = store.add_job(request("https://example.com/a"));
        store.add_job(request("https://example.com/b"));
        store.start_next().unwrap();
        store.finish(&a, completed()).unwrap();
        store.pause();

        let stats = store.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.queue_depth, 1);
        assert!(stats.paused);
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let store = JobStore::new();
        let mut rx = store.events().subscribe();
        let id = store.add_job(request("https://example.com/a"));
        store.start_next().unwrap();
        store.finish(&id, JobOutcome::Failed("x".into())).unwrap();

        assert!(matches!(rx.recv().await.unwrap(), JobEvent::Queued { .. }));
        assert!(matches!(rx.recv().await.unwrap(), JobEvent::Started { .. }));
        match rx.recv().await.unwrap() {
            JobEvent::Finished { status, error, .. } => {
                assert_eq!(status, JobStatus::Failed);
                assert_eq!(error.as_deref(), Some("x"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
