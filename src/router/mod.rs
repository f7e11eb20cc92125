//! Cache strategy router.
//!
//! Classifies every intercepted read request and applies one of three
//! policies: cache-first for the data endpoints, network-first for HTML
//! pages, cache-first with a synthetic offline response for static assets.
//! Mutating requests pass through untouched; detecting their failure and
//! queueing is the page's job, not the router's.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::store::ResponseCache;

/// Path of the offline notice page, precached with the app shell and
/// served whenever neither network nor cache can answer.
pub const OFFLINE_PAGE: &str = "/offline.html";

/// Maximum concurrent precache fetches during install.
/// Keeps a cold install fast without hammering the server or the CDN.
const MAX_PRECACHE_CONCURRENCY: usize = 4;

/// App shell and third-party assets cached ahead of time so the calendar
/// renders offline on first revisit.
pub const APP_SHELL: &[&str] = &[
    "/",
    "/index.html",
    "/add.html",
    "/delete.html",
    "/offline.html",
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.2/dist/css/bootstrap.min.css",
    "https://cdn.jsdelivr.net/npm/fullcalendar@6.1.10/index.global.min.css",
    "https://cdn.jsdelivr.net/npm/bootstrap-icons@1.11.1/font/bootstrap-icons.css",
    "https://cdn.jsdelivr.net/npm/bootstrap@5.3.2/dist/js/bootstrap.bundle.min.js",
    "https://cdn.jsdelivr.net/npm/fullcalendar@6.1.10/index.global.min.js",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An intercepted request, reduced to what routing needs.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub accept: Option<String>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            accept: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            accept: None,
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }
}

/// A response as served to the page and as stored in the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl Response {
    pub fn ok(content_type: &str, body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }

    /// Synthetic response when nothing at all is available.
    pub fn unavailable() -> Self {
        Self {
            status: 503,
            content_type: "text/plain".to_string(),
            body: "Offline".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Which policy a request falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Exam list and subject list endpoints: cache-first.
    ApiData,
    /// Navigable HTML pages: network-first.
    Page,
    /// Scripts, styles, fonts: cache-first with synthetic fallback.
    Asset,
}

impl RequestClass {
    pub fn of(request: &Request) -> Self {
        if request.path == "/events" || request.path == "/api/subjects" {
            return RequestClass::ApiData;
        }
        let wants_html = request
            .accept
            .as_deref()
            .is_some_and(|a| a.contains("text/html"));
        if wants_html || request.path == "/" || request.path.ends_with(".html") {
            return RequestClass::Page;
        }
        RequestClass::Asset
    }
}

/// Network transport seam. Production uses [`crate::api::HttpFetcher`];
/// tests substitute call-counting mocks.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, ApiError>;
}

/// Decides, per request, whether to answer from cache, network or the
/// offline fallback.
#[derive(Clone)]
pub struct Router {
    cache: ResponseCache,
    network: Arc<dyn Fetch>,
}

impl Router {
    pub fn new(cache: ResponseCache, network: Arc<dyn Fetch>) -> Self {
        Self { cache, network }
    }

    /// Precache the app shell. Individual failures are tolerated; a fresh
    /// install with no connectivity simply starts with a cold cache.
    pub async fn install(&self) {
        stream::iter(APP_SHELL)
            .map(|path| async move {
                let request = Request::get(*path);
                match self.network.fetch(&request).await {
                    Ok(response) if response.is_success() => {
                        self.cache.put(path, &response).await;
                    }
                    Ok(response) => {
                        debug!(path, status = response.status, "Skipping precache");
                    }
                    Err(e) => {
                        debug!(path, error = %e, "Precache fetch failed");
                    }
                }
            })
            .buffer_unordered(MAX_PRECACHE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
    }

    /// Route one request. GET requests always resolve to a response; a
    /// non-GET passes through and its error propagates to the caller.
    pub async fn handle(&self, request: Request) -> Result<Response, ApiError> {
        if request.method != Method::Get {
            return self.network.fetch(&request).await;
        }
        let response = match RequestClass::of(&request) {
            RequestClass::ApiData => self.cache_first(&request).await,
            RequestClass::Page => self.network_first(&request).await,
            RequestClass::Asset => self.asset(&request).await,
        };
        Ok(response)
    }

    /// Cache-first: a warm cache answers without any network traffic.
    async fn cache_first(&self, request: &Request) -> Response {
        if let Some(hit) = self.cache.get(&request.path).await {
            return hit;
        }
        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_copy(&request.path, &response);
                response
            }
            Err(e) => {
                debug!(path = %request.path, error = %e, "Network miss, serving fallback");
                self.fallback().await
            }
        }
    }

    /// Network-first: the freshest page wins, the cache keeps the most
    /// recent successful copy for offline navigation.
    async fn network_first(&self, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_copy(&request.path, &response);
                response
            }
            Err(e) => {
                debug!(path = %request.path, error = %e, "Page fetch failed, trying cache");
                match self.cache.get(&request.path).await {
                    Some(hit) => hit,
                    None => self.fallback().await,
                }
            }
        }
    }

    /// Static assets: cached copy if present, otherwise fetch and store;
    /// total failure yields a synthetic response, never an error.
    async fn asset(&self, request: &Request) -> Response {
        if let Some(hit) = self.cache.get(&request.path).await {
            return hit;
        }
        match self.network.fetch(request).await {
            Ok(response) => {
                self.store_copy(&request.path, &response);
                response
            }
            Err(e) => {
                debug!(path = %request.path, error = %e, "Asset unavailable");
                Response::unavailable()
            }
        }
    }

    /// Best-effort cache write; never blocks returning the response. The
    /// cache itself refuses non-200 responses.
    fn store_copy(&self, key: &str, response: &Response) {
        let cache = self.cache.clone();
        let key = key.to_string();
        let copy = response.clone();
        tokio::spawn(async move {
            cache.put(&key, &copy).await;
        });
    }

    async fn fallback(&self) -> Response {
        match self.cache.get(OFFLINE_PAGE).await {
            Some(page) => page,
            None => {
                warn!("Offline page not cached, serving synthetic response");
                Response::unavailable()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
