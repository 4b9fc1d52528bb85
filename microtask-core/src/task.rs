//! Task model: one small real-world task served by the task source.

use serde::{Deserialize, Deserializer, Serialize};

pub type TaskId = u64;

/// Countdown length used when the source does not give an estimate.
pub const DEFAULT_ESTIMATED_SECONDS: u32 = 30;

const DIFFICULTY_RANGE: (u8, u8) = (1, 5);

fn clamp_difficulty(difficulty: u8) -> u8 {
    difficulty.clamp(DIFFICULTY_RANGE.0, DIFFICULTY_RANGE.1)
}

fn clamped_difficulty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    u8::deserialize(deserializer).map(clamp_difficulty)
}

/// A micro-task. Immutable once fetched; identified by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    /// e.g. "observe", "interact", "record".
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,

    /// Seconds allowed before the countdown expires.
    #[serde(rename = "estimatedTime")]
    pub estimated_time_seconds: u32,

    /// 1-5.
    #[serde(deserialize_with = "clamped_difficulty")]
    pub difficulty: u8,
    pub points: u32,
    #[serde(default)]
    pub is_night_task: bool,
}

impl Task {
    pub fn new(id: TaskId, description: impl Into<String>) -> Self {
        Self {
            id,
            category: String::new(),
            description: description.into(),
            tags: Vec::new(),
            estimated_time_seconds: DEFAULT_ESTIMATED_SECONDS,
            difficulty: 1,
            points: 0,
            is_night_task: false,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.estimated_time_seconds = seconds;
        self
    }

    pub fn with_difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = clamp_difficulty(difficulty);
        self
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    pub fn at_night(mut self) -> Self {
        self.is_night_task = true;
        self
    }

    /// Length of the countdown for an attempt at this task.
    pub fn countdown_seconds(&self) -> u32 {
        if self.estimated_time_seconds == 0 {
            DEFAULT_ESTIMATED_SECONDS
        } else {
            self.estimated_time_seconds
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_estimate_falls_back_to_default() {
        let t = Task::new(7, "Find something orange").with_duration(0);
        assert_eq!(t.countdown_seconds(), DEFAULT_ESTIMATED_SECONDS);

        let t = t.with_duration(45);
        assert_eq!(t.countdown_seconds(), 45);
    }

    #[test]
    fn test_difficulty_is_clamped() {
        assert_eq!(Task::new(1, "x").with_difficulty(9).difficulty, 5);
        assert_eq!(Task::new(1, "x").with_difficulty(0).difficulty, 1);
    }

    #[test]
    fn test_stored_difficulty_is_clamped_on_load() {
        let load = |d: u8| -> Task {
            serde_json::from_value(serde_json::json!({
                "id": 3,
                "category": "observe",
                "description": "x",
                "estimatedTime": 30,
                "difficulty": d,
                "points": 5
            }))
            .unwrap()
        };
        let (low, high, mid) = (load(0), load(9), load(3));

        assert_eq!(low.difficulty, 1);
        assert_eq!(high.difficulty, 5);
        assert_eq!(mid.difficulty, 3);
    }

    #[test]
    fn test_json_uses_source_field_names() {
        let t = Task::new(12, "Ask a stranger about the weather")
            .with_category("interact")
            .with_tags(["weather", "talk"])
            .with_duration(60)
            .with_points(20);

        let json = serde_json::to_string(&t).unwrap();
        assert!(json.contains("\"estimatedTime\":60"));
        assert!(json.contains("\"isNightTask\":false"));

        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
