//! Medal catalog and the unlock evaluator.
//!
//! Unlocking is a pure function of the stats snapshot and the set of medals
//! already granted. Membership in that set is the only record of a grant, so
//! evaluating twice never pays out twice.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::reward::TaskStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriteriaKind {
    TotalTasks,
    TaskStreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedalCriteria {
    #[serde(rename = "type")]
    pub kind: CriteriaKind,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardKind {
    Experience,
    /// Reward types this build does not know how to grant.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedalReward {
    #[serde(rename = "type")]
    pub kind: RewardKind,
    pub value: u64,
}

impl MedalReward {
    pub fn experience(value: u64) -> Self {
        Self {
            kind: RewardKind::Experience,
            value,
        }
    }
}

fn experience_of(rewards: &[MedalReward]) -> u64 {
    rewards
        .iter()
        .filter(|r| r.kind == RewardKind::Experience)
        .map(|r| r.value)
        .sum()
}

/// Static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medal {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub criteria: MedalCriteria,
    pub rewards: Vec<MedalReward>,
}

impl Medal {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        icon: impl Into<String>,
        criteria: MedalCriteria,
        rewards: Vec<MedalReward>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            icon: icon.into(),
            criteria,
            rewards,
        }
    }

    pub fn experience_reward(&self) -> u64 {
        experience_of(&self.rewards)
    }

    /// Value of the counter this medal watches.
    pub fn current_value(&self, stats: &TaskStats) -> u64 {
        match self.criteria.kind {
            CriteriaKind::TotalTasks => stats.total_tasks,
            CriteriaKind::TaskStreak => u64::from(stats.current_streak),
        }
    }

    pub fn is_met_by(&self, stats: &TaskStats) -> bool {
        self.current_value(stats) >= u64::from(self.criteria.value)
    }

    /// Presentation-only progress toward this medal.
    pub fn progress(&self, stats: &TaskStats) -> MedalProgress {
        MedalProgress {
            current: self.current_value(stats),
            target: u64::from(self.criteria.value),
        }
    }
}

fn medal(
    id: &str,
    name: &str,
    description: &str,
    icon: &str,
    kind: CriteriaKind,
    value: u32,
    xp: u64,
) -> Medal {
    Medal::new(
        id,
        name,
        description,
        icon,
        MedalCriteria { kind, value },
        vec![MedalReward::experience(xp)],
    )
}

/// The medals every user can earn.
pub fn builtin_catalog() -> Vec<Medal> {
    use CriteriaKind::{TaskStreak, TotalTasks};

    vec![
        medal("1", "First Try", "Complete your first task", "🎯", TotalTasks, 1, 100),
        medal("2", "Hat Trick", "Complete tasks 3 days in a row", "🔥", TaskStreak, 3, 300),
        medal("3", "Persistent", "Complete 20 tasks", "🌟", TotalTasks, 20, 500),
        medal("4", "Steady", "Complete tasks 7 days in a row", "🌈", TaskStreak, 7, 700),
        medal("5", "Task Master", "Complete 50 tasks", "👑", TotalTasks, 50, 1000),
        medal("6", "Rock Solid", "Complete tasks 14 days in a row", "💎", TaskStreak, 14, 1400),
        medal("7", "Centurion", "Complete 100 tasks", "🏆", TotalTasks, 100, 2000),
        medal("8", "Legend", "Complete tasks 30 days in a row", "⭐", TaskStreak, 30, 3000),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MedalProgress {
    pub current: u64,
    pub target: u64,
}

impl MedalProgress {
    pub fn ratio(&self) -> f64 {
        if self.target == 0 {
            return 1.0;
        }
        (self.current as f64 / self.target as f64).clamp(0.0, 1.0)
    }
}

/// A granted medal, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedMedal {
    pub id: String,
    pub unlocked_at: DateTime<Utc>,
    #[serde(default)]
    pub rewards: Vec<MedalReward>,
}

impl UnlockedMedal {
    pub fn experience_reward(&self) -> u64 {
        experience_of(&self.rewards)
    }
}

/// Set of granted medals keyed by id. Persists as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<UnlockedMedal>", into = "Vec<UnlockedMedal>")]
pub struct UnlockedMedals {
    by_id: BTreeMap<String, UnlockedMedal>,
}

impl From<Vec<UnlockedMedal>> for UnlockedMedals {
    fn from(list: Vec<UnlockedMedal>) -> Self {
        let mut set = UnlockedMedals::default();
        for m in list {
            // first grant wins; later duplicates are dropped
            set.insert(m);
        }
        set
    }
}

impl From<UnlockedMedals> for Vec<UnlockedMedal> {
    fn from(set: UnlockedMedals) -> Self {
        let mut list: Vec<UnlockedMedal> = set.by_id.into_values().collect();
        list.sort_by(|a, b| a.unlocked_at.cmp(&b.unlocked_at).then_with(|| a.id.cmp(&b.id)));
        list
    }
}

impl UnlockedMedals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&UnlockedMedal> {
        self.by_id.get(id)
    }

    /// Returns false, leaving the existing entry untouched, if the id is
    /// already present.
    pub fn insert(&mut self, medal: UnlockedMedal) -> bool {
        if self.by_id.contains_key(&medal.id) {
            debug!(medal_id = %medal.id, "medal already granted; ignoring duplicate");
            return false;
        }
        self.by_id.insert(medal.id.clone(), medal);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnlockedMedal> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Experience already paid out through medals.
    pub fn granted_experience(&self) -> u64 {
        self.by_id.values().map(UnlockedMedal::experience_reward).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MedalEvaluation {
    /// Medals unlocked by this evaluation, in catalog order.
    pub newly_unlocked: Vec<Medal>,
    pub stats: TaskStats,
    pub unlocked: UnlockedMedals,
}

impl MedalEvaluation {
    pub fn granted_experience(&self) -> u64 {
        self.newly_unlocked.iter().map(Medal::experience_reward).sum()
    }

    pub fn changed(&self) -> bool {
        !self.newly_unlocked.is_empty()
    }
}

/// Grant every medal whose criterion is met and that has not been granted.
pub fn evaluate_medals(
    stats: &TaskStats,
    catalog: &[Medal],
    unlocked: &UnlockedMedals,
    now: DateTime<Utc>,
) -> MedalEvaluation {
    let mut stats = stats.clone();
    let mut unlocked = unlocked.clone();
    let mut newly_unlocked = Vec::new();

    for medal in catalog {
        if unlocked.contains(&medal.id) || !medal.is_met_by(&stats) {
            continue;
        }

        let granted = unlocked.insert(UnlockedMedal {
            id: medal.id.clone(),
            unlocked_at: now,
            rewards: medal.rewards.clone(),
        });
        if granted {
            let xp = medal.experience_reward();
            stats.total_experience = stats.total_experience.saturating_add(xp);
            info!(medal_id = %medal.id, name = %medal.name, xp, "medal unlocked");
            newly_unlocked.push(medal.clone());
        }
    }

    MedalEvaluation {
        newly_unlocked,
        stats,
        unlocked,
    }
}
