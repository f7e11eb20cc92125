//! Background synchronization of the pending-write queue.
//!
//! The coordinator runs in the worker context and is woken by the
//! background-sync trigger. It replays queued mutations strictly in
//! enqueue order and removes each entry from the durable queue immediately
//! after the server confirms it, so a failure partway through can never
//! cause an already-accepted write to be submitted twice on the next run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::api::ExamApi;
use crate::models::SyncLogEntry;
use crate::store::Store;

/// Capacity of the worker-to-page broadcast channel. Completion messages
/// are tiny and slow consumers only lose superseded notifications.
const BROADCAST_CAPACITY: usize = 16;

/// Capacity of the trigger wake channel. Registration is idempotent, so a
/// single slot of headroom is already more than needed.
const WAKE_CAPACITY: usize = 4;

/// Message broadcast from the worker context to every page context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// The whole queue was drained; pages should reload their view.
    Complete { synced: usize },
}

/// Outcome of one sync run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub remaining: usize,
}

pub struct SyncCoordinator {
    store: Store,
    api: Arc<dyn ExamApi>,
    events: broadcast::Sender<SyncMessage>,
}

impl SyncCoordinator {
    pub fn new(store: Store, api: Arc<dyn ExamApi>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { store, api, events }
    }

    /// Subscribe a page context to completion messages.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.events.subscribe()
    }

    /// Drain the pending-write queue against the server.
    ///
    /// Entries are replayed sequentially in enqueue order; the server must
    /// observe writes in the order the user issued them. An empty queue is
    /// a no-op with zero network calls. On failure the remaining entries
    /// stay queued for the next trigger.
    pub async fn sync(&self) -> Result<SyncReport> {
        let pending = self.store.pending().await?;
        if pending.is_empty() {
            debug!("Sync triggered with empty queue, nothing to do");
            return Ok(SyncReport::default());
        }

        let attempted = pending.len();
        let mut synced = 0;
        for entry in pending {
            match self.api.submit_exam(&entry.subject, entry.date).await {
                Ok(()) => {
                    // Confirmed by the server: remove now, not after the
                    // loop, so a later failure cannot resubmit this entry.
                    self.store.remove_pending(entry.id).await?;
                    synced += 1;
                }
                Err(e) => {
                    warn!(
                        id = entry.id,
                        subject = %entry.subject,
                        synced,
                        remaining = attempted - synced,
                        error = %e,
                        "Sync stopped partway, remaining entries stay queued"
                    );
                    self.store
                        .append_sync_log(SyncLogEntry::partial(attempted, synced, e.to_string()))
                        .await?;
                    return Ok(SyncReport {
                        attempted,
                        synced,
                        remaining: attempted - synced,
                    });
                }
            }
        }

        self.store.append_sync_log(SyncLogEntry::success(attempted)).await?;
        info!(synced, "Offline writes synchronized");
        let _ = self.events.send(SyncMessage::Complete { synced });
        Ok(SyncReport {
            attempted,
            synced,
            remaining: 0,
        })
    }
}

/// Handle for registering the background-sync trigger.
///
/// Registration is idempotent: registering while a wake-up is already
/// pending is a no-op, mirroring how a platform sync registration behaves.
#[derive(Clone)]
pub struct SyncScheduler {
    requested: Arc<AtomicBool>,
    wake: mpsc::Sender<()>,
}

impl SyncScheduler {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (wake, rx) = mpsc::channel(WAKE_CAPACITY);
        (
            Self {
                requested: Arc::new(AtomicBool::new(false)),
                wake,
            },
            rx,
        )
    }

    /// Request a sync run. No-op if one is already pending.
    pub fn register(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            if self.wake.try_send(()).is_err() {
                // Undelivered trigger: clear the flag so the next
                // register() can try again instead of silently no-opping.
                self.requested.store(false, Ordering::SeqCst);
                warn!("Sync trigger could not be delivered");
            }
        }
    }

    pub fn is_registered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn acknowledge(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Worker-context loop: one sync run per trigger wake-up.
///
/// Without a coordinator (network-only mode, no store to replay from)
/// triggers are still acknowledged so registration keeps behaving
/// normally and connectivity notices are unaffected.
pub async fn run_worker(
    coordinator: Option<Arc<SyncCoordinator>>,
    scheduler: SyncScheduler,
    mut wake: mpsc::Receiver<()>,
) {
    while wake.recv().await.is_some() {
        scheduler.acknowledge();
        let Some(ref coordinator) = coordinator else {
            debug!("Sync trigger ignored, nothing queued in network-only mode");
            continue;
        };
        match coordinator.sync().await {
            Ok(report) if report.remaining > 0 => {
                debug!(remaining = report.remaining, "Sync incomplete, awaiting next trigger");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Sync run failed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
