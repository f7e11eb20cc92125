//! Offline-first caching and synchronization engine for an exam calendar.
//!
//! The engine keeps the calendar usable without network connectivity: reads
//! are answered from a durable local store, failed writes are queued and
//! replayed once connectivity returns, and every intercepted request is
//! routed through an explicit cache policy.
//!
//! Two independent execution contexts cooperate without shared mutable
//! state: the page context ([`app::App`]) and the background worker
//! ([`sync::SyncCoordinator`]). They communicate only through channels and
//! the on-disk [`store::Store`].

pub mod api;
pub mod app;
pub mod config;
pub mod models;
pub mod notify;
pub mod router;
pub mod store;
pub mod sync;
