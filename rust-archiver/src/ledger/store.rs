//! Durable storage for the completion ledger.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::utils::fs;
use crate::{Error, Result};

/// Backend the ledger writes through to.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the persisted ids; `Ok(None)` when nothing was ever saved.
    async fn load(&self) -> Result<Option<HashSet<String>>>;

    /// Replace the persisted ids with `ids`.
    async fn save(&self, ids: &HashSet<String>) -> Result<()>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

/// On-disk record.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerRecord {
    completed_ids: Vec<String>,
}

/// Ledger stored as a JSON object `{"completed_ids": [...]}`.
///
/// Ids are written sorted so the file diffs cleanly; saves go through a
/// temp file and a rename so a crash never leaves a truncated ledger.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LedgerStore for JsonLedgerStore {
    async fn load(&self) -> Result<Option<HashSet<String>>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(fs::io_error("reading ledger", &self.path, e)),
        };

        let record: LedgerRecord = serde_json::from_str(&raw)?;
        Ok(Some(record.completed_ids.into_iter().collect()))
    }

    async fn save(&self, ids: &HashSet<String>) -> Result<()> {
        let mut completed_ids: Vec<String> = ids.iter().cloned().collect();
        completed_ids.sort_unstable();
        let bytes = serde_json::to_vec_pretty(&LedgerRecord { completed_ids })?;
        fs::write_atomic(&self.path, &bytes).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory ledger store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    saved: Mutex<Option<HashSet<String>>>,
    fail_saves: AtomicBool,
    save_count: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted set.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        *store.saved.lock() = Some(ids.into_iter().map(Into::into).collect());
        store
    }

    /// Make subsequent saves fail, simulating a broken disk.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Last successfully saved set.
    pub fn saved(&self) -> Option<HashSet<String>> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<Option<HashSet<String>>> {
        Ok(self.saved.lock().clone())
    }

    async fn save(&self, ids: &HashSet<String>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Other("simulated ledger save failure".to_string()));
        }
        *self.saved.lock() = Some(ids.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
