//! Domain types shared between the page context, the background worker and
//! the persistent store.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A single exam as cached locally.
///
/// Cached exams are a read-side projection of the server's exam table; the
/// collection is replaced wholesale on every successful refresh and never
/// merged record-by-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub subject: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
}

/// A mutation accepted while the server was unreachable.
///
/// The `id` is a local sequence number assigned by the store in insertion
/// order; it is bookkeeping only and is never sent to the server. Queue
/// order equals the order the user issued the writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExam {
    pub id: u64,
    pub subject: String,
    pub date: NaiveDate,
    pub enqueued_at: DateTime<Utc>,
}

/// Diagnostic record of one synchronization attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub at: DateTime<Utc>,
    /// Queue length when the attempt started.
    pub attempted: usize,
    /// Entries confirmed by the server during this attempt.
    pub synced: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncLogEntry {
    pub fn success(attempted: usize) -> Self {
        Self {
            at: Utc::now(),
            attempted,
            synced: attempted,
            error: None,
        }
    }

    pub fn partial(attempted: usize, synced: usize, error: String) -> Self {
        Self {
            at: Utc::now(),
            attempted,
            synced,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exam_serde_round_trip() {
        let exam = Exam {
            id: 7,
            subject: "Math".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 0, 0),
            end_time: None,
        };
        let json = serde_json::to_string(&exam).unwrap();
        let back: Exam = serde_json::from_str(&json).unwrap();
        assert_eq!(back, exam);
    }

    #[test]
    fn test_sync_log_entry_partial_records_error() {
        let entry = SyncLogEntry::partial(3, 1, "connection refused".to_string());
        assert_eq!(entry.attempted, 3);
        assert_eq!(entry.synced, 1);
        assert!(entry.error.is_some());
    }
}
