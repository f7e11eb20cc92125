//! Page-context operations.
//!
//! [`App`] is what the calendar page drives: refreshing its read-side
//! projections and accepting mutations. The store handle is injected
//! explicitly; a missing store means the session runs network-only
//! (storage disabled or quota exceeded) and the engine degrades instead
//! of crashing.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::api::ExamApi;
use crate::models::Exam;
use crate::store::Store;

/// How a mutation was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The server accepted the write directly.
    Created,
    /// The server was unreachable; the write is queued and will be
    /// replayed by the sync coordinator.
    Queued { id: u64 },
}

pub struct App {
    store: Option<Store>,
    api: Arc<dyn ExamApi>,
}

impl App {
    pub fn new(store: Option<Store>, api: Arc<dyn ExamApi>) -> Self {
        if store.is_none() {
            warn!("No persistent store, running network-only");
        }
        Self { store, api }
    }

    /// Fetch the exam list, refreshing the cached snapshot on success.
    /// When the server is unreachable the cached snapshot is served
    /// instead; with a cold cache the view is simply empty.
    pub async fn refresh_exams(&self) -> Result<Vec<Exam>> {
        match self.api.fetch_events().await {
            Ok(exams) => {
                if let Some(ref store) = self.store {
                    if let Err(e) = store.replace_exams(&exams).await {
                        warn!(error = %e, "Failed to refresh cached exams");
                    }
                }
                Ok(exams)
            }
            Err(e) if e.is_unreachable() => {
                info!("Server unreachable, serving cached exams");
                let cached = match self.store {
                    Some(ref store) => store.exams().await?.map(|c| c.data),
                    None => None,
                };
                Ok(cached.unwrap_or_default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Same shape as [`Self::refresh_exams`] for the subject list.
    pub async fn refresh_subjects(&self) -> Result<Vec<String>> {
        match self.api.fetch_subjects().await {
            Ok(subjects) => {
                if let Some(ref store) = self.store {
                    if let Err(e) = store.put_subjects(&subjects).await {
                        warn!(error = %e, "Failed to refresh cached subjects");
                    }
                }
                Ok(subjects)
            }
            Err(e) if e.is_unreachable() => {
                let cached = match self.store {
                    Some(ref store) => store.subjects().await?.map(|c| c.data),
                    None => None,
                };
                Ok(cached.unwrap_or_default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create an exam. If the server is unreachable the write goes into
    /// the durable queue and the user gets an "accepted, will sync"
    /// outcome instead of a hard error. Server rejections propagate.
    pub async fn add_exam(&self, subject: &str, date: NaiveDate) -> Result<AddOutcome> {
        let subject = subject.trim();
        if subject.is_empty() {
            anyhow::bail!("Subject must not be empty");
        }

        match self.api.submit_exam(subject, date).await {
            Ok(()) => Ok(AddOutcome::Created),
            Err(e) if e.is_unreachable() => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Offline and no store to queue into: {}", e))?;
                let id = store.append_pending(subject, date).await?;
                info!(id, subject, "Write queued for background sync");
                Ok(AddOutcome::Queued { id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reaction to the sync-complete broadcast: re-derive the view (and
    /// the cached snapshot) from the server.
    pub async fn on_sync_complete(&self) -> Result<Vec<Exam>> {
        info!("Sync complete, reloading exams");
        self.refresh_exams().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::api::ApiError;

    /// Server stub whose reachability can be flipped per test.
    struct FlakyApi {
        online: AtomicBool,
        reject: AtomicBool,
        exams: Vec<Exam>,
    }

    impl FlakyApi {
        fn new(online: bool) -> Self {
            Self {
                online: AtomicBool::new(online),
                reject: AtomicBool::new(false),
                exams: vec![Exam {
                    id: 1,
                    subject: "Math".to_string(),
                    date: date(),
                    start_time: None,
                    end_time: None,
                }],
            }
        }
    }

    #[async_trait]
    impl ExamApi for FlakyApi {
        async fn fetch_events(&self) -> Result<Vec<Exam>, ApiError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(ApiError::Unreachable("no route".to_string()));
            }
            Ok(self.exams.clone())
        }

        async fn fetch_subjects(&self) -> Result<Vec<String>, ApiError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(ApiError::Unreachable("no route".to_string()));
            }
            Ok(vec!["Math".to_string(), "English".to_string()])
        }

        async fn submit_exam(&self, _subject: &str, _date: NaiveDate) -> Result<(), ApiError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(ApiError::Unreachable("no route".to_string()));
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(ApiError::ServerError("rejected".to_string()));
            }
            Ok(())
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    async fn open_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        std::mem::forget(dir);
        store
    }

    #[tokio::test]
    async fn test_online_add_does_not_queue() {
        let store = open_store().await;
        let app = App::new(Some(store.clone()), Arc::new(FlakyApi::new(true)));

        let outcome = app.add_exam("Math", date()).await.unwrap();
        assert_eq!(outcome, AddOutcome::Created);
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_add_is_queued_not_failed() {
        let store = open_store().await;
        let app = App::new(Some(store.clone()), Arc::new(FlakyApi::new(false)));

        let outcome = app.add_exam("Math", date()).await.unwrap();
        assert!(matches!(outcome, AddOutcome::Queued { .. }));

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].subject, "Math");
        assert_eq!(pending[0].date, date());
    }

    #[tokio::test]
    async fn test_server_rejection_propagates_and_is_not_queued() {
        let store = open_store().await;
        let api = Arc::new(FlakyApi::new(true));
        api.reject.store(true, Ordering::SeqCst);
        let app = App::new(Some(store.clone()), api);

        assert!(app.add_exam("Math", date()).await.is_err());
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_subject_is_rejected_locally() {
        let store = open_store().await;
        let app = App::new(Some(store.clone()), Arc::new(FlakyApi::new(false)));
        assert!(app.add_exam("   ", date()).await.is_err());
        assert!(store.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_updates_cached_snapshot() {
        let store = open_store().await;
        let app = App::new(Some(store.clone()), Arc::new(FlakyApi::new(true)));

        let exams = app.refresh_exams().await.unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(store.exams().await.unwrap().unwrap().data, exams);
    }

    #[tokio::test]
    async fn test_offline_refresh_serves_cached_snapshot() {
        let store = open_store().await;
        {
            let warm = App::new(Some(store.clone()), Arc::new(FlakyApi::new(true)));
            warm.refresh_exams().await.unwrap();
        }
        let app = App::new(Some(store), Arc::new(FlakyApi::new(false)));
        let exams = app.refresh_exams().await.unwrap();
        assert_eq!(exams[0].subject, "Math");
    }

    #[tokio::test]
    async fn test_offline_refresh_with_cold_cache_is_empty_not_an_error() {
        let store = open_store().await;
        let app = App::new(Some(store), Arc::new(FlakyApi::new(false)));
        assert!(app.refresh_exams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_only_mode_cannot_queue() {
        let app = App::new(None, Arc::new(FlakyApi::new(false)));
        assert!(app.add_exam("Math", date()).await.is_err());
    }

    #[tokio::test]
    async fn test_network_only_mode_still_reads() {
        let app = App::new(None, Arc::new(FlakyApi::new(true)));
        assert_eq!(app.refresh_exams().await.unwrap().len(), 1);
        assert_eq!(app.refresh_subjects().await.unwrap().len(), 2);
    }
}
