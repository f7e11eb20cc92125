//! examcal - offline-first companion engine for an exam calendar server.
//!
//! Runs the page-side engine and the background worker as independent
//! tasks: a connectivity probe drives the notifier, the notifier registers
//! the sync trigger, and the worker drains the pending-write queue against
//! the server.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use examcal::api::{ApiClient, HttpFetcher};
use examcal::app::App;
use examcal::config::Config;
use examcal::notify::ConnectivityNotifier;
use examcal::router::{Request, Router};
use examcal::store::{ResponseCache, Store};
use examcal::sync::{run_worker, SyncCoordinator, SyncMessage, SyncScheduler};

// ============================================================================
// Constants
// ============================================================================

/// How often the health endpoint is probed for connectivity (in seconds)
const PROBE_INTERVAL_SECS: u64 = 10;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    info!("examcal starting");

    let config = Config::load()?;
    let base_url = config.server_url();
    info!(server = %base_url, "Using calendar server");

    // Store open failure is fatal for caching, not for the session: the
    // engine degrades to network-only mode.
    let store = match Store::open(config.data_dir()?).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "Persistent store unavailable, degrading to network-only mode");
            None
        }
    };

    let api = Arc::new(ApiClient::new(&base_url)?);
    let app = Arc::new(App::new(store.clone(), api.clone()));

    // Response cache + router for the app shell; a cold or broken cache
    // just means every read goes to the network.
    match ResponseCache::open(config.response_cache_dir()?) {
        Ok(cache) => {
            let fetcher = Arc::new(HttpFetcher::new(&base_url)?);
            let router = Router::new(cache, fetcher);
            router.install().await;
            // Route the shell once so its availability shows up at startup.
            let shell = router
                .handle(Request::get("/").with_accept("text/html"))
                .await?;
            info!(status = shell.status, "App shell ready");
        }
        Err(e) => warn!(error = %e, "Response cache unavailable"),
    }

    // Initial view of the data, from network or cache.
    match app.refresh_exams().await {
        Ok(exams) => info!(count = exams.len(), "Exam list loaded"),
        Err(e) => warn!(error = %e, "Could not load exam list"),
    }

    let (online_tx, online_rx) = watch::channel(true);

    // The sync worker replays nothing without a store, but the trigger,
    // notifier and notices run either way so degraded mode keeps its
    // offline/online affordances.
    let coordinator = store.map(|store| Arc::new(SyncCoordinator::new(store, api.clone())));
    let (scheduler, wake) = SyncScheduler::new();
    tokio::spawn(run_worker(coordinator.clone(), scheduler.clone(), wake));

    if let Some(ref coordinator) = coordinator {
        // Page context: reload the view whenever the worker reports a
        // fully drained queue.
        let mut sync_messages = coordinator.subscribe();
        let page = app.clone();
        tokio::spawn(async move {
            while let Ok(message) = sync_messages.recv().await {
                let SyncMessage::Complete { synced } = message;
                info!(synced, "Sync complete");
                if let Err(e) = page.on_sync_complete().await {
                    warn!(error = %e, "Reload after sync failed");
                }
            }
        });
    }

    let (notifier, mut notices) = ConnectivityNotifier::new(scheduler);
    tokio::spawn(notifier.run(online_rx));
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            info!(notice = %notice.text, "Connectivity");
        }
    });

    // Platform connectivity signal: the server's health endpoint.
    let probe = api.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PROBE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let online = probe.probe_health().await;
            if online_tx.send(online).is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("examcal shutting down");
    Ok(())
}
