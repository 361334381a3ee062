//! End-to-end tests of the archive service with scripted backends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_archiver::domain::{JobOrigin, JobStatus};
use rust_archiver::fetcher::{
    FetchError, FetchOutput, FetchRequest, Fetcher, FormatSummary, SourceEntry, SourceLister,
};
use rust_archiver::ledger::{JsonLedgerStore, LedgerStore, MemoryLedgerStore};
use rust_archiver::monitor::SourceKind;
use rust_archiver::queue::JobEvent;
use rust_archiver::{ArchiveService, ArchiverConfig, Error};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Fetcher driven by the request url:
/// urls containing `fail` time out, `block` waits for cancellation,
/// anything else succeeds. Probing reports two fixed resolutions.
struct ScriptedFetcher;

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        token: CancellationToken,
    ) -> Result<FetchOutput, FetchError> {
        if request.url.contains("fail") {
            return Err(FetchError::failed("network timeout"));
        }
        if request.url.contains("block") {
            token.cancelled().await;
            return Err(FetchError::Canceled);
        }
        let media_id = request
            .media_id
            .clone()
            .unwrap_or_else(|| format!("manual-{}", request.job_id));
        Ok(FetchOutput {
            title: Some(format!("Video {media_id}")),
            media_id,
            output_path: None,
        })
    }

    async fn probe_formats(&self, url: &str) -> Result<FormatSummary, FetchError> {
        if url.contains("fail") {
            return Err(FetchError::failed("Unsupported URL"));
        }
        Ok(FormatSummary {
            title: Some("Probed".to_string()),
            resolutions: vec!["1080p".to_string(), "720p".to_string()],
            available_fps: vec![60, 30],
            original_fps: Some(30.0),
        })
    }
}

#[derive(Default)]
struct ScriptedLister {
    sources: Mutex<HashMap<String, Vec<SourceEntry>>>,
}

impl ScriptedLister {
    fn set(&self, source: &str, ids: &[&str]) {
        let entries = ids
            .iter()
            .map(|id| {
                SourceEntry::new(
                    Some(id.to_string()),
                    format!("https://www.youtube.com/watch?v={id}"),
                )
            })
            .collect();
        self.sources.lock().insert(source.to_string(), entries);
    }
}

#[async_trait]
impl SourceLister for ScriptedLister {
    async fn list_entries(&self, source_url: &str) -> rust_archiver::Result<Vec<SourceEntry>> {
        self.sources
            .lock()
            .get(source_url)
            .cloned()
            .ok_or_else(|| Error::source_listing(source_url, "unknown source"))
    }
}

fn test_config(dir: &TempDir) -> ArchiverConfig {
    ArchiverConfig {
        download_dir: dir.path().join("downloads"),
        playlists_file: dir.path().join("playlists.txt"),
        channels_file: dir.path().join("channels.txt"),
        monitor_enabled: false,
        worker_poll_interval: Duration::from_millis(20),
        log_dir: dir.path().join("logs").to_string_lossy().into_owned(),
        ..Default::default()
    }
}

async fn service_with(
    dir: &TempDir,
    ledger_store: Arc<dyn LedgerStore>,
    lister: Arc<ScriptedLister>,
) -> ArchiveService {
    ArchiveService::with_components(
        test_config(dir),
        ledger_store,
        Arc::new(ScriptedFetcher),
        lister,
    )
    .await
    .unwrap()
}

async fn wait_for_status(service: &ArchiveService, job_id: &str, status: JobStatus) {
    for _ in 0..300 {
        if service.get_job(job_id).map(|j| j.status).ok() == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "job {job_id} never reached {status}, last seen {:?}",
        service.get_job(job_id).map(|j| j.status).ok()
    );
}

async fn wait_for_idle(service: &ArchiveService) {
    for _ in 0..300 {
        let stats = service.stats();
        if stats.queue_depth == 0
            && stats.downloading == 0
            && stats.canceling == 0
            && service.inflight().is_empty()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("service never went idle: {:?}", service.stats());
}

#[tokio::test]
async fn enqueue_720p_is_listed_as_queued() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;

    let job_id = service
        .enqueue("https://www.youtube.com/watch?v=A", "720p", None, None)
        .unwrap();

    let queue = service.list_queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, job_id);
    assert_eq!(queue[0].status, JobStatus::Queued);
    assert_eq!(queue[0].params.resolution.to_string(), "720p");
    assert_eq!(queue[0].origin, JobOrigin::Manual);
}

#[tokio::test]
async fn enqueue_rejects_invalid_requests() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;

    for (url, res, fps, codec) in [
        ("", "720p", None, None),
        ("https://example.com/v", "720", None, None),
        ("https://example.com/v", "720p", Some(0), None),
        ("https://example.com/v", "720p", None, Some("vp9")),
    ] {
        let err = service.enqueue(url, res, fps, codec).unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "unexpected error: {err}");
    }
    assert!(service.list_jobs().is_empty());
}

#[tokio::test]
async fn failed_fetch_records_error_and_leaves_ledger() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;
    service.start();

    let job_id = service
        .enqueue("https://example.com/fail", "720p", None, None)
        .unwrap();
    wait_for_status(&service, &job_id, JobStatus::Failed).await;

    let job = service.get_job(&job_id).unwrap();
    assert_eq!(job.error.as_deref(), Some("network timeout"));
    assert!(service.ledger().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn cancel_while_downloading() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;
    assert!(!service.cancel_current());
    service.start();

    let job_id = service
        .enqueue("https://example.com/block", "1080p", None, None)
        .unwrap();
    wait_for_status(&service, &job_id, JobStatus::Downloading).await;

    assert!(service.cancel_current());
    wait_for_status(&service, &job_id, JobStatus::Canceled).await;
    assert!(!service.cancel_current());
    assert!(service.ledger().is_empty());
    assert!(service.current_job().is_none());
    service.shutdown().await;
}

#[tokio::test]
async fn paused_queue_keeps_jobs_queued() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;
    service.pause();
    service.start();

    let job_id = service
        .enqueue("https://example.com/v", "720p", None, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(service.get_job(&job_id).unwrap().status, JobStatus::Queued);
    assert!(service.stats().paused);

    service.resume();
    wait_for_status(&service, &job_id, JobStatus::Completed).await;
    service.shutdown().await;
}

#[tokio::test]
async fn ledger_ids_are_never_reenqueued() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("playlists.txt"), "PL1\n")
        .await
        .unwrap();
    let lister = Arc::new(ScriptedLister::default());
    lister.set("PL1", &["A", "B"]);
    let service = service_with(&dir, Arc::new(MemoryLedgerStore::with_ids(["A"])), lister).await;

    let report = service.trigger_source_check(None).await;

    assert_eq!(report.jobs_created, 1);
    assert_eq!(report.skipped_completed, 1);
    let jobs = service.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].media_id.as_deref(), Some("B"));
}

#[tokio::test]
async fn overlapping_cycles_create_one_job_per_id() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("playlists.txt"), "PL1\n")
        .await
        .unwrap();
    tokio::fs::write(dir.path().join("channels.txt"), "CH1\n")
        .await
        .unwrap();
    let lister = Arc::new(ScriptedLister::default());
    lister.set("PL1", &["A", "B", "C"]);
    lister.set("CH1", &["C", "D"]);
    let service = service_with(&dir, Arc::new(MemoryLedgerStore::new()), lister).await;

    let (first, second) = tokio::join!(
        service.trigger_source_check(None),
        service.trigger_source_check(Some(SourceKind::Playlist)),
    );

    assert_eq!(first.jobs_created + second.jobs_created, 4);
    let mut ids: Vec<String> = service
        .list_jobs()
        .into_iter()
        .filter_map(|j| j.media_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "B", "C", "D"]);
}

#[tokio::test]
async fn discovered_jobs_complete_and_are_remembered_across_restart() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join("playlists.txt"), "PL1\n")
        .await
        .unwrap();
    let ledger_path = dir.path().join("ledger.json");
    let lister = Arc::new(ScriptedLister::default());
    lister.set("PL1", &["A", "B"]);

    {
        let service = service_with(
            &dir,
            Arc::new(JsonLedgerStore::new(&ledger_path)),
            lister.clone(),
        )
        .await;
        service.start();

        let report = service.trigger_source_check(Some(SourceKind::Playlist)).await;
        assert_eq!(report.jobs_created, 2);
        wait_for_idle(&service).await;

        assert_eq!(service.stats().completed, 2);
        assert!(service.ledger().contains("A") && service.ledger().contains("B"));
        assert!(service.inflight().is_empty());

        let report = service.trigger_source_check(None).await;
        assert_eq!(report.jobs_created, 0);
        service.shutdown().await;
    }

    let restarted = service_with(&dir, Arc::new(JsonLedgerStore::new(&ledger_path)), lister).await;
    assert!(restarted.ledger().contains("A"));
    let report = restarted.trigger_source_check(None).await;
    assert_eq!(report.jobs_created, 0);
    assert_eq!(report.skipped_completed, 2);
}

#[tokio::test]
async fn existing_artifacts_backfill_the_ledger() {
    let dir = TempDir::new().unwrap();
    let downloads = dir.path().join("downloads");
    tokio::fs::create_dir_all(&downloads).await.unwrap();
    tokio::fs::write(downloads.join("Old upload [Z].mkv"), b"x")
        .await
        .unwrap();

    let store = Arc::new(MemoryLedgerStore::new());
    let service = service_with(&dir, store.clone(), Arc::new(ScriptedLister::default())).await;

    assert!(service.ledger().contains("Z"));
    assert!(store.saved().unwrap().contains("Z"));
}

#[tokio::test]
async fn events_follow_the_job() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;
    let mut events = service.subscribe_events();
    service.start();

    let job_id = service
        .enqueue("https://example.com/v", "480p", Some(30), Some("hevc"))
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("event in time")
            .unwrap();
        if event.job_id() == Some(job_id.as_str()) {
            seen.push(event);
        }
    }

    assert!(matches!(seen[0], JobEvent::Queued { .. }));
    assert!(matches!(seen[1], JobEvent::Started { .. }));
    assert!(matches!(
        seen[2],
        JobEvent::Finished {
            status: JobStatus::Completed,
            ..
        }
    ));
    service.shutdown().await;
}

#[tokio::test]
async fn probe_formats_and_health() {
    let dir = TempDir::new().unwrap();
    let service = service_with(
        &dir,
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(ScriptedLister::default()),
    )
    .await;

    let summary = service
        .probe_formats("https://www.youtube.com/watch?v=A")
        .await
        .unwrap();
    assert_eq!(summary.resolutions, vec!["1080p", "720p"]);
    assert_eq!(summary.available_fps, vec![60, 30]);

    assert!(matches!(
        service.probe_formats("  ").await,
        Err(Error::Validation(_))
    ));
    let err = service
        .probe_formats("https://example.com/fail")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unsupported URL"));

    let health = service.health().await;
    assert!(health.ffmpeg_available);
    assert!(!health.worker_running);

    service.start();
    assert!(service.health().await.worker_running);
    service.shutdown().await;
    assert!(!service.health().await.worker_running);
}
