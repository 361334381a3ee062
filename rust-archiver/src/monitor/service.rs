//! Periodic source polling.
//!
//! Each cycle lists every configured playlist and channel and enqueues a
//! job for each entry that passes the dedup gate:
//!
//! 1. the ledger does not contain the media id,
//! 2. no artifact for it sits in the download directory,
//! 3. it is not already in flight.
//!
//! Marking an id in flight is an atomic check-and-set, and the ledger is
//! consulted again afterwards, so an id the worker finishes mid-cycle is
//! not picked up a second time.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sources::{SourceKind, read_source_file};
use crate::domain::{FetchParams, JobRequest};
use crate::fetcher::{SourceEntry, SourceLister};
use crate::inflight::InflightTracker;
use crate::ledger::{Ledger, scan_artifact_ids};
use crate::queue::JobStore;
use crate::utils::filename::artifact_media_id;

/// Default polling interval (15 minutes).
const DEFAULT_INTERVAL_SECS: u64 = 900;

/// Default number of recent channel entries considered per cycle.
const DEFAULT_CHANNEL_RECENT_LIMIT: usize = 10;

/// Default upper bound for listing one source.
const DEFAULT_LISTING_TIMEOUT_SECS: u64 = 300;

/// Source monitor configuration.
#[derive(Debug, Clone)]
pub struct SourceMonitorConfig {
    pub interval: Duration,
    /// Delay before the first cycle after `start`.
    pub startup_delay: Duration,
    pub channel_recent_limit: usize,
    /// A listing that takes longer counts as a failed source.
    pub listing_timeout: Duration,
    pub playlists_file: PathBuf,
    pub channels_file: PathBuf,
    /// Directory scanned for already-archived artifacts.
    pub download_dir: PathBuf,
    /// Parameters for discovered jobs.
    pub default_params: FetchParams,
}

impl Default for SourceMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            startup_delay: Duration::from_secs(5),
            channel_recent_limit: DEFAULT_CHANNEL_RECENT_LIMIT,
            listing_timeout: Duration::from_secs(DEFAULT_LISTING_TIMEOUT_SECS),
            playlists_file: PathBuf::from("playlists.txt"),
            channels_file: PathBuf::from("channels.txt"),
            download_dir: PathBuf::from("downloads"),
            default_params: FetchParams::default(),
        }
    }
}

impl SourceMonitorConfig {
    fn source_file(&self, kind: SourceKind) -> &PathBuf {
        match kind {
            SourceKind::Playlist => &self.playlists_file,
            SourceKind::Channel => &self.channels_file,
        }
    }
}

/// Counters for one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub sources_checked: usize,
    pub sources_failed: usize,
    pub entries_seen: usize,
    pub jobs_created: usize,
    pub skipped_completed: usize,
    pub skipped_on_disk: usize,
    pub skipped_inflight: usize,
    pub skipped_unresolved: usize,
}

pub struct SourceMonitor {
    config: SourceMonitorConfig,
    lister: Arc<dyn SourceLister>,
    store: Arc<JobStore>,
    ledger: Arc<Ledger>,
    inflight: Arc<InflightTracker>,
    /// Keeps a manual check and a scheduled cycle from interleaving.
    cycle_lock: tokio::sync::Mutex<()>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SourceMonitor {
    pub fn new(
        config: SourceMonitorConfig,
        lister: Arc<dyn SourceLister>,
        store: Arc<JobStore>,
        ledger: Arc<Ledger>,
        inflight: Arc<InflightTracker>,
    ) -> Self {
        Self {
            config,
            lister,
            store,
            ledger,
            inflight,
            cycle_lock: tokio::sync::Mutex::new(()),
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SourceMonitorConfig {
        &self.config
    }

    /// Spawn the polling loop. Calling this twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Source monitor already started");
            return;
        }

        let monitor = Arc::clone(self);
        let token = self.cancellation_token.clone();
        let interval = self.config.interval;
        let startup_delay = self.config.startup_delay;

        *task = Some(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Source monitor started");

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(startup_delay) => {}
            }

            loop {
                monitor.check_sources(None).await;

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Source monitor stopped");
        }));
    }

    /// Stop the loop. A listing in progress is abandoned.
    pub async fn stop(&self) {
        self.cancellation_token.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Source monitor task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one cycle over `kind`, or over every kind when `None`.
    pub async fn check_sources(&self, kind: Option<SourceKind>) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();
        let kinds: Vec<SourceKind> = match kind {
            Some(kind) => vec![kind],
            None => SourceKind::ALL.to_vec(),
        };

        let mut report = CycleReport::default();
        let mut on_disk: Option<HashSet<String>> = None;

        for kind in kinds {
            let path = self.config.source_file(kind);
            let urls = match read_source_file(path).await {
                Ok(urls) => urls,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to read source list");
                    continue;
                }
            };
            debug!(kind = %kind, count = urls.len(), "Checking sources");

            for url in urls {
                if self.cancellation_token.is_cancelled() {
                    break;
                }
                self.check_source(kind, &url, &mut report, &mut on_disk)
                    .await;
            }
        }

        info!(
            sources = report.sources_checked,
            failed = report.sources_failed,
            new_jobs = report.jobs_created,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Source check finished"
        );
        report
    }

    async fn check_source(
        &self,
        kind: SourceKind,
        source_url: &str,
        report: &mut CycleReport,
        on_disk: &mut Option<HashSet<String>>,
    ) {
        report.sources_checked += 1;

        let listing = tokio::time::timeout(
            self.config.listing_timeout,
            self.lister.list_entries(source_url),
        );
        let result = tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                debug!(kind = %kind, source = %source_url, "Listing abandoned on shutdown");
                return;
            }
            result = listing => result,
        };

        let entries = match result {
            Ok(Ok(entries)) if entries.is_empty() => {
                warn!(kind = %kind, source = %source_url, "Source returned no entries");
                report.sources_failed += 1;
                return;
            }
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!(kind = %kind, source = %source_url, error = %e, "Failed to list source");
                report.sources_failed += 1;
                return;
            }
            Err(_) => {
                warn!(
                    kind = %kind,
                    source = %source_url,
                    timeout_secs = self.config.listing_timeout.as_secs(),
                    "Listing source timed out"
                );
                report.sources_failed += 1;
                return;
            }
        };

        let limit = match kind {
            SourceKind::Channel => self.config.channel_recent_limit,
            SourceKind::Playlist => usize::MAX,
        };

        let mut created = 0;
        for entry in entries.into_iter().take(limit) {
            report.entries_seen += 1;
            if self.consider_entry(kind, entry, report, on_disk).await {
                created += 1;
            }
        }

        if created > 0 {
            info!(kind = %kind, source = %source_url, created, "Queued new entries");
        }
    }

    /// Apply the dedup gate to one entry. Returns whether a job was created.
    async fn consider_entry(
        &self,
        kind: SourceKind,
        entry: SourceEntry,
        report: &mut CycleReport,
        on_disk: &mut Option<HashSet<String>>,
    ) -> bool {
        let Some(media_id) = entry.resolve_media_id() else {
            debug!(url = %entry.url, "Skipping entry without a media id");
            report.skipped_unresolved += 1;
            return false;
        };

        if self.ledger.contains(&media_id) {
            report.skipped_completed += 1;
            return false;
        }

        if self
            .artifact_index(on_disk)
            .await
            .contains(&artifact_media_id(&media_id))
        {
            debug!(media_id = %media_id, "Artifact already on disk, backfilling ledger");
            self.ledger.insert(&media_id).await;
            report.skipped_on_disk += 1;
            return false;
        }

        if !self.inflight.try_add(&media_id) {
            report.skipped_inflight += 1;
            return false;
        }

        // The worker may have completed this id between the ledger check
        // and the in-flight mark.
        if self.ledger.contains(&media_id) {
            self.inflight.remove(&media_id);
            report.skipped_completed += 1;
            return false;
        }

        self.store.add_job(JobRequest::discovered(
            entry.url,
            media_id,
            self.config.default_params,
            kind.origin(),
        ));
        report.jobs_created += 1;
        true
    }

    /// Media ids of artifacts in the download directory, scanned at most
    /// once per cycle.
    async fn artifact_index<'a>(
        &self,
        on_disk: &'a mut Option<HashSet<String>>,
    ) -> &'a HashSet<String> {
        if on_disk.is_none() {
            let ids = match scan_artifact_ids(&self.config.download_dir).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "Failed to scan download directory");
                    HashSet::new()
                }
            };
            *on_disk = Some(ids);
        }
        on_disk.get_or_insert_with(HashSet::new)
    }
}
