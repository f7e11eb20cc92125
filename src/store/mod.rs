//! Durable, schema-versioned local store.
//!
//! One JSON file per logical collection under a single directory, plus a
//! `meta.json` carrying the schema version. Four collections exist: cached
//! exams, the cached subject list, the pending-write queue and the sync
//! log. Every write lands in a temp file and is renamed into place, so a
//! concurrent reader never observes a half-rewritten collection.

mod responses;

pub use responses::{CachedResponse, ResponseCache};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{Exam, PendingExam, SyncLogEntry};

/// Current schema version. Opening a store written by an older version
/// creates any missing collection files without touching existing ones.
pub const SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "meta.json";
const CACHED_EXAMS: &str = "cached_exams";
const CACHED_SUBJECTS: &str = "cached_subjects";
const PENDING_EXAMS: &str = "pending_exams";
const SYNC_LOG: &str = "sync_log";

/// Envelope recording when a cached value was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    version: u32,
}

/// On-disk layout of the pending-write queue. `next_id` is monotonically
/// increasing and never reused, so sequence ids stay unique across removes.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingQueue {
    next_id: u64,
    entries: Vec<PendingExam>,
}

struct Inner {
    dir: PathBuf,
    // Serializes logical operations within this process; cross-process
    // atomicity comes from the rename-into-place write path.
    lock: Mutex<()>,
}

/// Handle to the local database. Clone is cheap; all clones resolve to the
/// same logical store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open (or create) the store at `dir`. Idempotent: concurrent opens
    /// of the same directory all resolve to the same logical database.
    ///
    /// Failure here is fatal for the session; callers are expected to
    /// degrade to network-only operation rather than crash.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;

        let store = Self {
            inner: Arc::new(Inner {
                dir,
                lock: Mutex::new(()),
            }),
        };
        store.upgrade_schema().await?;
        Ok(store)
    }

    /// Create any collection files a newer schema expects. Existing files
    /// are never truncated or rewritten here.
    async fn upgrade_schema(&self) -> Result<()> {
        let _guard = self.inner.lock.lock().await;

        let meta_path = self.inner.dir.join(META_FILE);
        let stored: Option<Meta> = read_json(&meta_path)?;
        let stored_version = stored.map(|m| m.version).unwrap_or(0);

        for name in [CACHED_EXAMS, CACHED_SUBJECTS] {
            let path = self.collection_path(name);
            if !path.exists() {
                // A null slot is a cache miss, not an empty snapshot.
                write_json(&path, &Option::<CachedData<()>>::None)?;
            }
        }
        let pending = self.collection_path(PENDING_EXAMS);
        if !pending.exists() {
            write_json(&pending, &PendingQueue::default())?;
        }
        let log = self.collection_path(SYNC_LOG);
        if !log.exists() {
            write_json(&log, &Vec::<SyncLogEntry>::new())?;
        }

        if stored_version < SCHEMA_VERSION {
            write_json(
                &meta_path,
                &Meta {
                    version: SCHEMA_VERSION,
                },
            )?;
            debug!(from = stored_version, to = SCHEMA_VERSION, "Store schema upgraded");
        }
        Ok(())
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.inner.dir.join(format!("{}.json", name))
    }

    // ===== Cached exams =====

    /// Replace the whole cached exam snapshot. Never merges: the cache must
    /// not mix records from two different server snapshots.
    pub async fn replace_exams(&self, exams: &[Exam]) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        write_json(
            &self.collection_path(CACHED_EXAMS),
            &Some(CachedData::new(exams.to_vec())),
        )
    }

    pub async fn exams(&self) -> Result<Option<CachedData<Vec<Exam>>>> {
        let _guard = self.inner.lock.lock().await;
        Ok(read_slot(&self.collection_path(CACHED_EXAMS)))
    }

    // ===== Cached subject list =====

    pub async fn put_subjects(&self, subjects: &[String]) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        write_json(
            &self.collection_path(CACHED_SUBJECTS),
            &Some(CachedData::new(subjects.to_vec())),
        )
    }

    pub async fn subjects(&self) -> Result<Option<CachedData<Vec<String>>>> {
        let _guard = self.inner.lock.lock().await;
        Ok(read_slot(&self.collection_path(CACHED_SUBJECTS)))
    }

    // ===== Pending-write queue =====

    /// Append a mutation accepted while offline. Returns the assigned
    /// local sequence id.
    pub async fn append_pending(&self, subject: &str, date: NaiveDate) -> Result<u64> {
        let _guard = self.inner.lock.lock().await;
        let path = self.collection_path(PENDING_EXAMS);
        let mut queue = read_queue(&path);
        let id = queue.next_id;
        queue.next_id += 1;
        queue.entries.push(PendingExam {
            id,
            subject: subject.to_string(),
            date,
            enqueued_at: Utc::now(),
        });
        write_json(&path, &queue)?;
        Ok(id)
    }

    /// Queue contents in enqueue (FIFO) order.
    pub async fn pending(&self) -> Result<Vec<PendingExam>> {
        let _guard = self.inner.lock.lock().await;
        Ok(read_queue(&self.collection_path(PENDING_EXAMS)).entries)
    }

    /// Remove one entry after the server has durably accepted it.
    pub async fn remove_pending(&self, id: u64) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        let path = self.collection_path(PENDING_EXAMS);
        let mut queue = read_queue(&path);
        queue.entries.retain(|entry| entry.id != id);
        write_json(&path, &queue)
    }

    pub async fn clear_pending(&self) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        let path = self.collection_path(PENDING_EXAMS);
        let mut queue = read_queue(&path);
        queue.entries.clear();
        write_json(&path, &queue)
    }

    // ===== Sync log =====

    pub async fn append_sync_log(&self, entry: SyncLogEntry) -> Result<()> {
        let _guard = self.inner.lock.lock().await;
        let path = self.collection_path(SYNC_LOG);
        let mut log: Vec<SyncLogEntry> = read_json(&path)?.unwrap_or_default();
        log.push(entry);
        write_json(&path, &log)
    }

    pub async fn sync_log(&self) -> Result<Vec<SyncLogEntry>> {
        let _guard = self.inner.lock.lock().await;
        Ok(read_json(&self.collection_path(SYNC_LOG))?.unwrap_or_default())
    }
}

/// Read a cached slot; a missing file or malformed payload is a cache
/// miss, never an error surfaced to the caller.
fn read_slot<T: DeserializeOwned>(path: &Path) -> Option<CachedData<T>> {
    match read_json::<Option<CachedData<T>>>(path) {
        Ok(slot) => slot.flatten(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable cache slot, treating as miss");
            None
        }
    }
}

/// Read the pending queue; a corrupt queue file degrades to empty rather
/// than blocking all future writes.
fn read_queue(path: &Path) -> PendingQueue {
    match read_json::<PendingQueue>(path) {
        Ok(Some(queue)) => queue,
        Ok(None) => PendingQueue::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable pending queue, starting empty");
            PendingQueue::default()
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write via temp file + rename so readers see either the old or the new
/// contents, never a partial file.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn exam(id: i64, subject: &str) -> Exam {
        Exam {
            id,
            subject: subject.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            start_time: None,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn test_replace_exams_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        let exams = vec![exam(1, "Math"), exam(2, "English")];
        store.replace_exams(&exams).await.unwrap();

        let cached = store.exams().await.unwrap().unwrap();
        assert_eq!(cached.data, exams);
    }

    #[tokio::test]
    async fn test_replace_leaves_no_residual_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        store
            .replace_exams(&[exam(1, "Math"), exam(2, "English"), exam(3, "Bio")])
            .await
            .unwrap();
        store.replace_exams(&[exam(9, "Physics")]).await.unwrap();

        let cached = store.exams().await.unwrap().unwrap();
        assert_eq!(cached.data, vec![exam(9, "Physics")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reader_never_observes_partial_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();

        let first: Vec<Exam> = (1i64..=5).map(|i| exam(i, "Math")).collect();
        let second: Vec<Exam> = (10i64..=12).map(|i| exam(i, "English")).collect();
        store.replace_exams(&first).await.unwrap();

        let writer = {
            let store = store.clone();
            let (first, second) = (first.clone(), second.clone());
            tokio::spawn(async move {
                for i in 0..20 {
                    let snapshot = if i % 2 == 0 { &second } else { &first };
                    store.replace_exams(snapshot).await.unwrap();
                }
            })
        };

        // Every concurrent read sees one of the two complete snapshots,
        // never an empty or mixed collection.
        for _ in 0..40 {
            let seen = store.exams().await.unwrap().unwrap().data;
            assert!(
                seen == first || seen == second,
                "observed a partial snapshot: {:?}",
                seen
            );
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_store_reports_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        assert!(store.exams().await.unwrap().is_none());
        assert!(store.subjects().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_queue_preserves_order_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let a = store.append_pending("Math", date).await.unwrap();
        let b = store.append_pending("English", date).await.unwrap();
        let c = store.append_pending("Bio", date).await.unwrap();
        assert!(a < b && b < c);

        let subjects: Vec<String> = store
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.subject)
            .collect();
        assert_eq!(subjects, vec!["Math", "English", "Bio"]);
    }

    #[tokio::test]
    async fn test_remove_pending_keeps_remaining_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let a = store.append_pending("Math", date).await.unwrap();
        let _b = store.append_pending("English", date).await.unwrap();
        store.remove_pending(a).await.unwrap();

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, "English");

        // Ids are never reused after a removal.
        let d = store.append_pending("Bio", date).await.unwrap();
        assert!(d > a);
    }

    #[tokio::test]
    async fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).await.unwrap();
            store.replace_exams(&[exam(1, "Math")]).await.unwrap();
            store
                .append_pending("English", NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
                .await
                .unwrap();
        }
        let store = Store::open(dir.path()).await.unwrap();
        assert_eq!(store.exams().await.unwrap().unwrap().data.len(), 1);
        assert_eq!(store.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_creates_missing_collections_non_destructively() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).await.unwrap();
            store.replace_exams(&[exam(1, "Math")]).await.unwrap();
        }
        // Simulate a database written before the pending queue existed.
        std::fs::remove_file(dir.path().join("pending_exams.json")).unwrap();
        std::fs::write(dir.path().join("meta.json"), r#"{"version":0}"#).unwrap();

        let store = Store::open(dir.path()).await.unwrap();
        assert!(store.pending().await.unwrap().is_empty());
        assert_eq!(store.exams().await.unwrap().unwrap().data.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_slot_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("cached_exams.json"), "{not json").unwrap();
        assert!(store.exams().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store
            .append_sync_log(SyncLogEntry::success(2))
            .await
            .unwrap();
        store
            .append_sync_log(SyncLogEntry::partial(3, 1, "boom".to_string()))
            .await
            .unwrap();
        let log = store.sync_log().await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].synced, 1);
    }
}
