//! HTTP client for the exam calendar server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;

use crate::models::Exam;
use crate::router::{Fetch, Method, Request, Response};

use super::{ApiError, ExamApi};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Timeout for the connectivity probe. The probe runs frequently, so it
/// fails much faster than a data request.
const PROBE_TIMEOUT_SECS: u64 = 5;

/// One entry of the calendar event feed. Exam entries carry an id and a
/// title; holiday background blocks carry neither and are skipped.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

impl RawEvent {
    fn into_exam(self) -> Option<Exam> {
        let id = self.id?;
        let subject = self.title?;
        let (date, start_time) = parse_event_time(self.start.as_deref()?)?;
        let end_time = self.end.as_deref().and_then(parse_event_time).and_then(|(_, t)| t);
        Some(Exam {
            id,
            subject,
            date,
            start_time,
            end_time,
        })
    }
}

/// Parse a calendar timestamp (`2024-05-01T08:00`, with or without
/// seconds, or a bare date).
fn parse_event_time(s: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some((dt.date(), Some(dt.time())));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|date| (date, None))
}

/// API client for the calendar server.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Probe the server's health endpoint. Used as the online/offline
    /// signal source; any failure counts as offline.
    pub async fn probe_health(&self) -> bool {
        let result = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl ExamApi for ApiClient {
    async fn fetch_events(&self) -> Result<Vec<Exam>, ApiError> {
        let response = self.client.get(self.url("/events")).send().await?;
        let response = Self::check_response(response).await?;
        let raw: Vec<RawEvent> = response.json().await?;
        Ok(raw.into_iter().filter_map(RawEvent::into_exam).collect())
    }

    async fn fetch_subjects(&self) -> Result<Vec<String>, ApiError> {
        let response = self.client.get(self.url("/api/subjects")).send().await?;
        let response = Self::check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn submit_exam(&self, subject: &str, date: NaiveDate) -> Result<(), ApiError> {
        let date = date.format("%Y-%m-%d").to_string();
        let response = self
            .client
            .post(self.url("/add"))
            .form(&[("subjects", subject), ("date", date.as_str())])
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }
}

/// Raw request transport for the cache strategy router, over the same
/// server base URL. Absolute keys (CDN assets) are fetched as-is.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, ApiError> {
        let url = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            request.path.clone()
        } else {
            format!("{}{}", self.base_url, request.path)
        };

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(ref accept) = request.accept {
            builder = builder.header(header::ACCEPT, accept.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response.text().await?;

        Ok(Response {
            status,
            content_type,
            body,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exam_entries_parse_from_event_feed() {
        let json = r##"[
            {"id": 3, "title": "Math", "start": "2024-05-01T08:00", "end": "2024-05-01T16:00",
             "backgroundColor": "#007bff", "borderColor": "#007bff"},
            {"start": "2025-08-01", "end": "2025-09-16", "display": "background",
             "backgroundColor": "black"}
        ]"##;
        let raw: Vec<RawEvent> = serde_json::from_str(json).unwrap();
        let exams: Vec<Exam> = raw.into_iter().filter_map(RawEvent::into_exam).collect();

        // The holiday background block has no id and is skipped.
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].subject, "Math");
        assert_eq!(exams[0].date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(exams[0].start_time, NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(exams[0].end_time, NaiveTime::from_hms_opt(16, 0, 0));
    }

    #[test]
    fn test_parse_event_time_accepts_all_feed_formats() {
        assert!(parse_event_time("2024-05-01T08:00").is_some());
        assert!(parse_event_time("2024-05-01T08:00:30").is_some());
        let (date, time) = parse_event_time("2024-05-01").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert!(time.is_none());
        assert!(parse_event_time("yesterday").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_is_normalized() {
        let client = ApiClient::new("http://localhost:5000/").unwrap();
        assert_eq!(client.url("/events"), "http://localhost:5000/events");
    }
}
