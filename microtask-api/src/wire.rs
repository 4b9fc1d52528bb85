//! JSON shapes spoken by the Microtask service.
//!
//! Every response is wrapped in `{ code, message, data }`; `code == 200`
//! means success regardless of the HTTP status line.

use chrono::{DateTime, Utc};
use microtask_core::{CompletionReceipt, CompletionRecord, HistoryStats, Pagination, Task, TaskId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const SUCCESS_CODE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn into_data(self, what: &'static str) -> Result<T, ApiError> {
        if self.code != SUCCESS_CODE {
            return Err(ApiError::Rejected {
                code: self.code,
                message: self.message,
            });
        }
        self.data.ok_or(ApiError::MissingData(what))
    }
}

/// Just the message of an error envelope, when the body has one.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RandomTaskData {
    pub task: WireTask,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    pub task_id: TaskId,
    #[serde(default)]
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub estimated_time: u32,
    #[serde(default)]
    pub difficulty: u8,
    #[serde(default)]
    pub points: u32,
    #[serde(default)]
    pub is_night_task: bool,
}

impl From<WireTask> for Task {
    fn from(w: WireTask) -> Self {
        let mut task = Task::new(w.task_id, w.description)
            .with_category(w.category)
            .with_tags(w.tags.unwrap_or_default())
            .with_duration(w.estimated_time)
            .with_difficulty(w.difficulty)
            .with_points(w.points);
        task.is_night_task = w.is_night_task;
        task
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub task_id: TaskId,
    pub time_spent: u64,
    pub completed_at: DateTime<Utc>,
}

/// Completion payload. Older servers answer flat, newer ones nest the
/// reward and the user's totals.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CompletionData {
    #[serde(rename_all = "camelCase")]
    Nested {
        rewards: WireRewards,
        user_stats: WireUserStats,
    },
    Flat(CompletionReceipt),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRewards {
    pub experience_gained: u64,
    #[serde(default)]
    pub points_gained: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUserStats {
    pub new_level: Option<u32>,
    pub new_experience: Option<u64>,
    pub next_level_exp: Option<u64>,
    pub streak: Option<u32>,
}

impl From<CompletionData> for CompletionReceipt {
    fn from(d: CompletionData) -> Self {
        match d {
            CompletionData::Flat(receipt) => receipt,
            CompletionData::Nested { rewards, user_stats } => CompletionReceipt {
                experience_gained: rewards.experience_gained,
                new_level: user_stats.new_level,
                new_experience: user_stats.new_experience,
                next_level_exp: user_stats.next_level_exp,
                streak: user_stats.streak,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsData {
    #[serde(default)]
    pub completions: Vec<WireCompletion>,
    pub stats: Option<WireHistoryStats>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCompletion {
    pub task_id: TaskId,
    pub task: Option<WireCompletionTask>,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub time_spent: u64,
    #[serde(default)]
    pub experience_gained: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireCompletionTask {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<WireCompletion> for CompletionRecord {
    fn from(w: WireCompletion) -> Self {
        let task = w.task.unwrap_or_default();
        CompletionRecord {
            task_id: w.task_id,
            description: task.description,
            category: task.category,
            tags: task.tags,
            completed_at: w.completed_at,
            time_spent_seconds: w.time_spent,
            experience_gained: w.experience_gained,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHistoryStats {
    #[serde(default)]
    pub total_experience: u64,
    #[serde(default)]
    pub average_time: f64,
    #[serde(default)]
    pub total_tasks: u64,
    pub current_streak: Option<u32>,
}

impl From<WireHistoryStats> for HistoryStats {
    fn from(w: WireHistoryStats) -> Self {
        HistoryStats {
            total_experience: w.total_experience,
            average_time_seconds: w.average_time,
            total_tasks: w.total_tasks,
            current_streak: w.current_streak,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub phone: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub token: String,
    pub refresh_token: Option<String>,
    pub user_info: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_task_maps_to_core_task() {
        let json = r#"{"code":200,"message":"ok","data":{"task":{
            "id":"65f0","taskId":42,"category":"record","description":"Photograph a shadow",
            "estimatedTime":90,"tags":null,"difficulty":2,"points":15,"isNightTask":true
        }}}"#;
        let env: Envelope<RandomTaskData> = serde_json::from_str(json).unwrap();
        let task: Task = env.into_data("task").unwrap().task.into();

        assert_eq!(task.id, 42);
        assert_eq!(task.category, "record");
        assert_eq!(task.estimated_time_seconds, 90);
        assert!(task.tags.is_empty());
        assert!(task.is_night_task);
    }

    #[test]
    fn non_200_code_is_rejected() {
        let env: Envelope<RandomTaskData> =
            serde_json::from_str(r#"{"code":404,"message":"no tasks left"}"#).unwrap();
        match env.into_data("task") {
            Err(ApiError::Rejected { code, message }) => {
                assert_eq!(code, 404);
                assert_eq!(message, "no tasks left");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn completion_accepts_nested_and_flat_shapes() {
        let nested = r#"{
            "completion":{"taskId":3,"timeSpent":12},
            "rewards":{"experienceGained":25,"pointsGained":25},
            "userStats":{"newLevel":2,"newExperience":125,"nextLevelExp":200,"streak":4}
        }"#;
        let receipt: CompletionReceipt =
            serde_json::from_str::<CompletionData>(nested).unwrap().into();
        assert_eq!(receipt.experience_gained, 25);
        assert_eq!(receipt.streak, Some(4));
        assert_eq!(receipt.new_level, Some(2));

        let flat = r#"{
            "experienceGained":10,"newLevel":1,"newExperience":10,"nextLevelExp":100,"streak":1
        }"#;
        let receipt: CompletionReceipt =
            serde_json::from_str::<CompletionData>(flat).unwrap().into();
        assert_eq!(receipt.experience_gained, 10);
        assert_eq!(receipt.next_level_exp, Some(100));
    }

    #[test]
    fn completions_page_flattens_task_details() {
        let json = r#"{
            "completions":[{
                "taskId":7,
                "task":{"description":"Listen for birds","category":"observe","tags":["sound"]},
                "completedAt":"2026-03-01T08:00:00Z","timeSpent":40,"experienceGained":10
            }],
            "stats":{"totalExperience":10,"averageTime":40,"totalTasks":1},
            "pagination":{"total":1,"page":1,"limit":10,"totalPages":1}
        }"#;
        let data: CompletionsData = serde_json::from_str(json).unwrap();
        let record: CompletionRecord = data.completions.into_iter().next().unwrap().into();
        assert_eq!(record.description, "Listen for birds");
        assert_eq!(record.time_spent_seconds, 40);

        let stats: HistoryStats = data.stats.unwrap().into();
        assert_eq!(stats.average_time_seconds, 40.0);
        assert_eq!(stats.current_streak, None);
        assert_eq!(data.pagination.total_pages, 1);
    }

    #[test]
    fn completions_page_without_stats_has_no_totals() {
        let json = r#"{
            "completions":[],
            "pagination":{"total":0,"page":1,"limit":10,"totalPages":0}
        }"#;
        let data: CompletionsData = serde_json::from_str(json).unwrap();
        assert!(data.stats.is_none());
        assert!(data.completions.is_empty());
    }
}
