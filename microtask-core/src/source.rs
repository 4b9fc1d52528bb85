//! Task source port: the remote service that hands out tasks and records
//! completions.
//!
//! Real adapters live outside the core (see `microtask-api`); tests use
//! in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::task::{Task, TaskId};

/// Parameters for a random task request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    /// Tasks the source must not hand out again.
    pub exclude_ids: Vec<TaskId>,
    pub night: bool,
}

/// What the source reports back after accepting a completion.
///
/// `experience_gained` is authoritative; the other fields mirror the
/// server-side view of the user and are optional in older responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReceipt {
    pub experience_gained: u64,
    pub new_level: Option<u32>,
    pub new_experience: Option<u64>,
    pub next_level_exp: Option<u64>,
    /// Server-reported streak; wins over any locally computed value.
    pub streak: Option<u32>,
}

/// One month of the completion calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Days of the month (1-31) with at least one completion.
    #[serde(default)]
    pub completed_dates: Vec<u32>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub task_id: TaskId,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub completed_at: DateTime<Utc>,
    pub time_spent_seconds: u64,
    pub experience_gained: u64,
}

/// Aggregate counters as the server sees them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_experience: u64,
    pub average_time_seconds: f64,
    pub total_tasks: u64,
    pub current_streak: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl Pagination {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPage {
    pub completions: Vec<CompletionRecord>,
    /// `None` when the service sent no totals with this page.
    pub stats: Option<HistoryStats>,
    pub pagination: Pagination,
}

/// Remote authority for tasks, completions and the calendar.
///
/// The engine runs on a single cooperative thread, so futures are not
/// required to be `Send`.
#[async_trait(?Send)]
pub trait TaskSource {
    async fn fetch_random_task(&self, query: &TaskQuery) -> Result<Task, TaskError>;

    async fn report_completion(
        &self,
        task_id: TaskId,
        time_spent_seconds: u64,
    ) -> Result<CompletionReceipt, TaskError>;

    async fn fetch_calendar(&self, year: i32, month: u32) -> Result<CalendarMonth, TaskError>;

    async fn fetch_completion_history(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<CompletionPage, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_month_tolerates_missing_fields() {
        let cal: CalendarMonth = serde_json::from_str(r#"{"year":2026,"month":3}"#).unwrap();
        assert!(cal.completed_dates.is_empty());
        assert_eq!(cal.current_streak, 0);
    }

    #[test]
    fn pagination_has_next() {
        let p = Pagination { total: 25, page: 2, limit: 10, total_pages: 3 };
        assert!(p.has_next());
        assert!(!Pagination { page: 3, ..p }.has_next());
    }
}
