//! Connectivity notifier.
//!
//! Watches online/offline transitions, surfaces a transient notice for
//! each one, and registers the background-sync trigger when connectivity
//! returns. Holds no persisted state.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::sync::SyncScheduler;

/// How long a transient notice stays visible before auto-dismissing.
const NOTICE_SECS: i64 = 3;

const ONLINE_NOTICE: &str = "Connection restored";
const OFFLINE_NOTICE: &str = "Offline mode";

/// A transient, auto-dismissing notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            raised_at: Utc::now(),
        }
    }

    /// Whether the notice should no longer be shown.
    pub fn is_expired(&self) -> bool {
        Utc::now() - self.raised_at > Duration::seconds(NOTICE_SECS)
    }
}

pub struct ConnectivityNotifier {
    notices: mpsc::UnboundedSender<Notice>,
    scheduler: SyncScheduler,
}

impl ConnectivityNotifier {
    /// Returns the notifier and the sink of notices for whatever layer
    /// renders them.
    pub fn new(scheduler: SyncScheduler) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        (Self { notices, scheduler }, rx)
    }

    /// Single dispatch point for a connectivity transition.
    pub fn on_change(&self, online: bool) {
        if online {
            info!("Connectivity restored, registering sync trigger");
            let _ = self.notices.send(Notice::new(ONLINE_NOTICE));
            self.scheduler.register();
        } else {
            info!("Connectivity lost");
            let _ = self.notices.send(Notice::new(OFFLINE_NOTICE));
        }
    }

    /// Drive the notifier from the platform connectivity signal. Only
    /// actual transitions produce notices.
    pub async fn run(self, mut online: watch::Receiver<bool>) {
        let mut last = *online.borrow();
        while online.changed().await.is_ok() {
            let now = *online.borrow();
            if now != last {
                self.on_change(now);
                last = now;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
