//! Stat store: the two persisted records behind every reward.
//!
//! Storage is a plain string key-value port so the app can sit on a file,
//! browser storage or an in-memory map. Reads never fail: a missing or
//! unreadable record is the documented default.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::medals::{Medal, MedalEvaluation, UnlockedMedals, evaluate_medals};
use crate::reward::{TaskStats, apply_completion};
use crate::source::{CompletionReceipt, HistoryStats};

pub const TASK_STATS_KEY: &str = "taskStats";
pub const UNLOCKED_MEDALS_KEY: &str = "unlockedMedals";

/// Persistence port.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Read/merge/write over the `taskStats` and `unlockedMedals` records.
///
/// Every mutation is a read-modify-write through `&mut self`, so one owner
/// is the only writer.
#[derive(Debug)]
pub struct StatStore<K> {
    kv: K,
}

impl<K: KeyValueStore> StatStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn inner(&self) -> &K {
        &self.kv
    }

    pub fn into_inner(self) -> K {
        self.kv
    }

    pub fn load_stats(&self) -> TaskStats {
        let stats: TaskStats = self.load_or_default(TASK_STATS_KEY);
        if stats.is_plausible() {
            stats
        } else {
            warn!(key = TASK_STATS_KEY, "implausible stats record; using defaults");
            TaskStats::default()
        }
    }

    pub fn load_unlocked(&self) -> UnlockedMedals {
        self.load_or_default(UNLOCKED_MEDALS_KEY)
    }

    pub fn save_stats(&mut self, stats: &TaskStats) -> Result<(), StoreError> {
        self.save(TASK_STATS_KEY, stats)
    }

    pub fn save_unlocked(&mut self, unlocked: &UnlockedMedals) -> Result<(), StoreError> {
        self.save(UNLOCKED_MEDALS_KEY, unlocked)
    }

    /// Write default records for a fresh user. Existing records are kept.
    pub fn ensure_initialized(&mut self) -> Result<(), StoreError> {
        if self.kv.get(TASK_STATS_KEY).is_none() {
            self.save_stats(&TaskStats::default())?;
            self.save_unlocked(&UnlockedMedals::default())?;
        }
        Ok(())
    }

    /// Explicit reset: the only way counters go down.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.save_stats(&TaskStats::default())?;
        self.save_unlocked(&UnlockedMedals::default())
    }

    /// Apply a confirmed completion and persist the result.
    pub fn record_completion(
        &mut self,
        time_spent_seconds: u64,
        receipt: &CompletionReceipt,
        completed_on: NaiveDate,
    ) -> Result<TaskStats, StoreError> {
        let stats = apply_completion(&self.load_stats(), time_spent_seconds, receipt, completed_on);
        self.save_stats(&stats)?;
        debug!(
            total_tasks = stats.total_tasks,
            streak = stats.current_streak,
            "completion recorded"
        );
        Ok(stats)
    }

    /// Run the medal evaluator against the stored stats and persist any grant.
    ///
    /// The unlocked set is written before the stats, so an interrupted write
    /// can lose a reward but never pay it twice.
    pub fn evaluate_medals(
        &mut self,
        catalog: &[Medal],
        now: DateTime<Utc>,
    ) -> Result<MedalEvaluation, StoreError> {
        let evaluation = evaluate_medals(&self.load_stats(), catalog, &self.load_unlocked(), now);
        if evaluation.changed() {
            self.save_unlocked(&evaluation.unlocked)?;
            self.save_stats(&evaluation.stats)?;
        }
        Ok(evaluation)
    }

    /// Adopt the server's counters. Medal experience is local only, so it is
    /// added back on top of the server's total.
    ///
    /// Counters never go down here: a server view behind the local one is
    /// logged and the local totals are kept.
    pub fn reconcile_history(&mut self, server: &HistoryStats) -> Result<TaskStats, StoreError> {
        let mut stats = self.load_stats();
        let medal_experience = self.load_unlocked().granted_experience();
        let server_experience = server.total_experience.saturating_add(medal_experience);

        if server.total_tasks < stats.total_tasks || server_experience < stats.total_experience {
            warn!(
                local_tasks = stats.total_tasks,
                server_tasks = server.total_tasks,
                local_xp = stats.total_experience,
                server_xp = server_experience,
                "server history behind local stats; keeping local totals"
            );
        }
        if server.total_tasks >= stats.total_tasks {
            stats.average_time_seconds = server.average_time_seconds.max(0.0);
        }
        stats.total_tasks = stats.total_tasks.max(server.total_tasks);
        stats.total_experience = stats.total_experience.max(server_experience);
        if let Some(streak) = server.current_streak {
            stats.current_streak = streak;
        }

        self.save_stats(&stats)?;
        Ok(stats)
    }

    /// Adopt the streak reported by the calendar.
    pub fn reconcile_streak(&mut self, streak: u32) -> Result<TaskStats, StoreError> {
        let mut stats = self.load_stats();
        if stats.current_streak != streak {
            stats.current_streak = streak;
            self.save_stats(&stats)?;
        }
        Ok(stats)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(raw) = self.kv.get(key) else {
            return T::default();
        };
        match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "corrupt record; using defaults");
                T::default()
            }
        }
    }

    fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.kv.set(key, json)
    }
}
