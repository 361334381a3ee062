//! Service container.
//!
//! Wires the ledger, in-flight tracker, job store, worker and source
//! monitor together and exposes the control surface an outer transport
//! (HTTP, CLI, ...) calls into.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ArchiverConfig;
use crate::domain::{FetchParams, Job, JobRequest};
use crate::fetcher::{Fetcher, FormatSummary, SourceLister, YtDlpFetcher, YtDlpSourceLister};
use crate::inflight::InflightTracker;
use crate::ledger::{JsonLedgerStore, Ledger, LedgerStore};
use crate::monitor::{CycleReport, SourceKind, SourceMonitor};
use crate::queue::{JobEvent, JobStats, JobStore, Worker};
use crate::utils::fs;
use crate::{Error, Result};

/// Liveness snapshot for a health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ffmpeg_available: bool,
    pub worker_running: bool,
    pub monitor_running: bool,
    pub paused: bool,
}

pub struct ArchiveService {
    config: ArchiverConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<JobStore>,
    ledger: Arc<Ledger>,
    inflight: Arc<InflightTracker>,
    worker: Arc<Worker>,
    monitor: Arc<SourceMonitor>,
    cancellation_token: CancellationToken,
}

impl ArchiveService {
    /// Build the service with the JSON ledger and the yt-dlp backends.
    pub async fn new(config: ArchiverConfig) -> Result<Self> {
        let ledger_store = Arc::new(JsonLedgerStore::new(config.ledger_path()));
        let fetcher = Arc::new(YtDlpFetcher::new(config.ytdlp_config()));
        let lister = Arc::new(YtDlpSourceLister::new(config.ytdlp_path.clone()));
        Self::with_components(config, ledger_store, fetcher, lister).await
    }

    /// Build the service around the given backends.
    ///
    /// Creates the download directory, loads the ledger and reconciles it
    /// with the artifacts already on disk. Nothing is started yet.
    pub async fn with_components(
        config: ArchiverConfig,
        ledger_store: Arc<dyn LedgerStore>,
        fetcher: Arc<dyn Fetcher>,
        lister: Arc<dyn SourceLister>,
    ) -> Result<Self> {
        info!(download_dir = %config.download_dir.display(), "Initializing archive service");

        fs::ensure_dir_all_with_op("creating download directory", &config.download_dir).await?;

        let ledger = Arc::new(Ledger::load(ledger_store).await);
        if let Err(e) = ledger.bootstrap(&config.download_dir).await {
            warn!(error = %e, "Failed to reconcile ledger with download directory");
        }

        let store = Arc::new(JobStore::new());
        let inflight = Arc::new(InflightTracker::new());
        let worker = Arc::new(Worker::new(
            store.clone(),
            ledger.clone(),
            inflight.clone(),
            fetcher.clone(),
            config.worker_config(),
        ));
        let monitor = Arc::new(SourceMonitor::new(
            config.monitor_config(),
            lister,
            store.clone(),
            ledger.clone(),
            inflight.clone(),
        ));

        info!(completed = ledger.len(), "Archive service initialized");

        Ok(Self {
            config,
            fetcher,
            store,
            ledger,
            inflight,
            worker,
            monitor,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the worker and, when enabled, the source monitor.
    pub fn start(&self) {
        self.worker.start();
        if self.config.monitor_enabled {
            self.monitor.start();
        } else {
            info!("Source monitor disabled");
        }
    }

    /// Stop the monitor and the worker. A running job is canceled.
    pub async fn shutdown(&self) {
        info!("Shutting down archive service");
        self.cancellation_token.cancel();
        self.monitor.stop().await;
        self.worker.stop().await;
        info!("Archive service shut down");
    }

    /// Queue a manual job after validating its parameters.
    pub fn enqueue(
        &self,
        url: &str,
        resolution: &str,
        fps: Option<u32>,
        codec: Option<&str>,
    ) -> Result<String> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::validation("URL is required"));
        }
        let params = FetchParams::parse(resolution, fps, codec)?;
        Ok(self.store.add_job(JobRequest::manual(url, params)))
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.store.list_jobs()
    }

    pub fn list_queue(&self) -> Vec<Job> {
        self.store.get_queue()
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get_job(job_id)
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    pub fn current_job(&self) -> Option<Job> {
        self.store.current_job()
    }

    pub fn pause(&self) {
        self.store.pause();
    }

    pub fn resume(&self) {
        self.store.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.store.is_paused()
    }

    /// Cancel the running job. Returns whether one was affected.
    pub fn cancel_current(&self) -> bool {
        self.store.cancel_current()
    }

    /// Run a monitor cycle now, for one kind of source or all of them.
    pub async fn trigger_source_check(&self, kind: Option<SourceKind>) -> CycleReport {
        self.monitor.check_sources(kind).await
    }

    /// List the resolutions and frame rates `url` offers.
    pub async fn probe_formats(&self, url: &str) -> Result<FormatSummary> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::validation("URL is required"));
        }
        self.fetcher
            .probe_formats(url)
            .await
            .map_err(|e| Error::Process(e.to_string()))
    }

    pub async fn ffmpeg_available(&self) -> bool {
        self.fetcher.ffmpeg_available().await
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            ffmpeg_available: self.ffmpeg_available().await,
            worker_running: self.worker.is_running(),
            monitor_running: self.monitor.is_running(),
            paused: self.store.is_paused(),
        }
    }

    pub fn stats(&self) -> JobStats {
        self.store.stats()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.store.events().subscribe()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn inflight(&self) -> &Arc<InflightTracker> {
        &self.inflight
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
