//! Reward & leveling: turns a confirmed completion into updated totals.
//!
//! Experience is never invented locally. The amount comes from the task
//! source's completion receipt and is only aggregated here.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::source::CompletionReceipt;
use crate::task::{Task, TaskId};

/// Experience needed per level.
pub const EXPERIENCE_PER_LEVEL: u64 = 100;

/// Persisted aggregate counters, one record per user.
///
/// Field names match the records the app has always written. Missing or
/// `null` fields read as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskStats {
    #[serde(deserialize_with = "null_as_default")]
    pub total_experience: u64,
    #[serde(deserialize_with = "null_as_default")]
    pub total_tasks: u64,
    #[serde(
        rename = "averageTime",
        alias = "averageTimeSeconds",
        deserialize_with = "null_as_default"
    )]
    pub average_time_seconds: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub current_streak: u32,
    /// Local calendar day of the last completion, for the streak fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_on: Option<NaiveDate>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl TaskStats {
    /// A record that parsed but cannot be right.
    pub fn is_plausible(&self) -> bool {
        self.average_time_seconds.is_finite() && self.average_time_seconds >= 0.0
    }

    pub fn level(&self) -> u32 {
        level_for(self.total_experience)
    }

    pub fn level_progress(&self) -> LevelProgress {
        LevelProgress::from_experience(self.total_experience)
    }
}

/// `floor(xp / 100) + 1`. Derived, never stored.
pub fn level_for(total_experience: u64) -> u32 {
    u32::try_from(total_experience / EXPERIENCE_PER_LEVEL)
        .unwrap_or(u32::MAX - 1)
        .saturating_add(1)
}

/// Experience at which the next level begins.
pub fn next_level_threshold(total_experience: u64) -> u64 {
    u64::from(level_for(total_experience)) * EXPERIENCE_PER_LEVEL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    pub experience: u64,
    pub next_level_at: u64,
}

impl LevelProgress {
    pub fn from_experience(experience: u64) -> Self {
        Self {
            level: level_for(experience),
            experience,
            next_level_at: next_level_threshold(experience),
        }
    }

    /// Fraction of the current level already earned.
    pub fn ratio(&self) -> f64 {
        let into_level = self.experience % EXPERIENCE_PER_LEVEL;
        into_level as f64 / EXPERIENCE_PER_LEVEL as f64
    }
}

/// Streak by calendar days when the source did not report one.
///
/// Same day keeps the streak, the next day extends it, a longer gap
/// starts over at 1.
pub fn next_streak(current: u32, last_completed_on: Option<NaiveDate>, today: NaiveDate) -> u32 {
    let Some(last) = last_completed_on else {
        return current.saturating_add(1);
    };

    match (today - last).num_days() {
        1 => current.saturating_add(1),
        gap if gap > 1 => 1,
        // same day, or the clock moved backwards
        _ => current.max(1),
    }
}

/// Fold one confirmed completion into the stats.
pub fn apply_completion(
    stats: &TaskStats,
    time_spent_seconds: u64,
    receipt: &CompletionReceipt,
    completed_on: NaiveDate,
) -> TaskStats {
    let total_tasks = stats.total_tasks + 1;

    let average_time_seconds = if stats.total_tasks == 0 {
        time_spent_seconds as f64
    } else {
        (stats.average_time_seconds * stats.total_tasks as f64 + time_spent_seconds as f64)
            / total_tasks as f64
    };

    let current_streak = receipt.streak.unwrap_or_else(|| {
        next_streak(stats.current_streak, stats.last_completed_on, completed_on)
    });

    TaskStats {
        total_experience: stats.total_experience.saturating_add(receipt.experience_gained),
        total_tasks,
        average_time_seconds,
        current_streak,
        last_completed_on: Some(completed_on),
    }
}

/// What the user is shown after a successful completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardSummary {
    pub task_id: TaskId,
    pub points: u32,
    pub time_spent_seconds: u64,
    pub experience_gained: u64,
    /// Experience granted by medals unlocked by this completion.
    pub medal_experience: u64,
    pub total_experience: u64,
    pub level: u32,
    pub next_level_at: u64,
    pub streak: u32,
}

impl RewardSummary {
    pub fn new(
        task: &Task,
        time_spent_seconds: u64,
        receipt: &CompletionReceipt,
        medal_experience: u64,
        stats: &TaskStats,
    ) -> Self {
        Self {
            task_id: task.id,
            points: task.points,
            time_spent_seconds,
            experience_gained: receipt.experience_gained,
            medal_experience,
            total_experience: stats.total_experience,
            level: stats.level(),
            next_level_at: next_level_threshold(stats.total_experience),
            streak: stats.current_streak,
        }
    }
}
