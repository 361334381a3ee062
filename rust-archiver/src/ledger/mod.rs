//! Completion ledger.
//!
//! The ledger is the durable record of every media id that has been
//! archived. It is:
//! - loaded once at startup, falling back to an empty set when the durable
//!   copy is missing or unreadable
//! - reconciled against the artifacts already in the download directory
//! - append-only, with every new id written through to the store before
//!   `insert` returns
//!
//! A failed save is logged and the in-memory set stays authoritative for
//! the rest of the process lifetime.

mod store;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::utils::filename::extract_media_id;
use crate::utils::fs;

pub use store::{JsonLedgerStore, LedgerStore, MemoryLedgerStore};

/// Set of completed media ids with write-through persistence.
pub struct Ledger {
    ids: RwLock<HashSet<String>>,
    store: Arc<dyn LedgerStore>,
    /// Serializes saves so an older snapshot never lands after a newer one.
    save_lock: tokio::sync::Mutex<()>,
}

impl Ledger {
    /// Load the ledger from its store.
    ///
    /// Never fails: a missing or corrupt durable copy yields an empty ledger.
    pub async fn load(store: Arc<dyn LedgerStore>) -> Self {
        let ids = match store.load().await {
            Ok(Some(ids)) => {
                info!(count = ids.len(), location = %store.describe(), "Loaded completion ledger");
                ids
            }
            Ok(None) => {
                info!(location = %store.describe(), "No completion ledger found, starting empty");
                HashSet::new()
            }
            Err(e) => {
                warn!(
                    location = %store.describe(),
                    error = %e,
                    "Completion ledger unreadable, starting empty"
                );
                HashSet::new()
            }
        };

        Self {
            ids: RwLock::new(ids),
            store,
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether `media_id` has been archived.
    pub fn contains(&self, media_id: &str) -> bool {
        self.ids.read().contains(media_id)
    }

    /// Record `media_id` as archived.
    ///
    /// Returns `true` when the id was new; the store is written before this
    /// returns. Re-inserting a known id is a no-op.
    pub async fn insert(&self, media_id: &str) -> bool {
        let inserted = self.ids.write().insert(media_id.to_string());
        if inserted {
            debug!(media_id = %media_id, "Recorded completion");
            self.persist().await;
        }
        inserted
    }

    /// Record several ids with a single save. Returns how many were new.
    pub async fn insert_many<I>(&self, media_ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let added = {
            let mut ids = self.ids.write();
            media_ids
                .into_iter()
                .filter(|id| ids.insert(id.clone()))
                .count()
        };
        if added > 0 {
            self.persist().await;
        }
        added
    }

    /// Reconcile with artifacts already present in `dir`.
    ///
    /// Returns how many ids were added to the ledger.
    pub async fn bootstrap(&self, dir: &Path) -> Result<usize> {
        let found = scan_artifact_ids(dir).await?;
        let added = self.insert_many(found).await;
        if added > 0 {
            info!(added, dir = %dir.display(), "Backfilled ledger from existing artifacts");
        }
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// Copy of the current membership.
    pub fn snapshot(&self) -> HashSet<String> {
        self.ids.read().clone()
    }

    async fn persist(&self) {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot).await {
            error!(
                location = %self.store.describe(),
                count = snapshot.len(),
                error = %e,
                "Failed to persist completion ledger; keeping in-memory state"
            );
        }
    }
}

/// Collect the media ids embedded in artifact file names in `dir`.
///
/// A missing directory yields an empty set.
pub async fn scan_artifact_ids(dir: &Path) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(fs::io_error("reading download directory", dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| fs::io_error("reading download directory", dir, e))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(extract_media_id) {
            ids.insert(id.to_string());
        }
    }

    Ok(ids)
}
