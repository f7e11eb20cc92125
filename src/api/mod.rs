//! Network client for the exam calendar server.
//!
//! The server is an external collaborator consumed over plain HTTP:
//! `GET /events` and `GET /api/subjects` for reads, `POST /add` (form
//! encoded) for the create-exam mutation, `GET /health` as the
//! connectivity probe. The [`ExamApi`] and [`Fetch`] traits are the seams
//! the router and sync coordinator are tested through.

pub mod client;
pub mod error;

pub use client::{ApiClient, HttpFetcher};
pub use error::ApiError;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::Exam;

/// Typed operations against the calendar API.
#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn fetch_events(&self) -> Result<Vec<Exam>, ApiError>;
    async fn fetch_subjects(&self) -> Result<Vec<String>, ApiError>;
    async fn submit_exam(&self, subject: &str, date: NaiveDate) -> Result<(), ApiError>;
}
