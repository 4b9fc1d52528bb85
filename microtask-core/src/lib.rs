//! microtask-core: task lifecycle, rewards and medals for the Microtask app

pub mod error;
pub mod lifecycle;
pub mod medals;
pub mod reward;
pub mod session;
pub mod source;
pub mod store;
pub mod task;
pub mod time;

pub use error::{StoreError, TaskError};
pub use lifecycle::{
    ChangeQuota, CompletionRequest, DEFAULT_CHANGE_QUOTA, DEFAULT_TICK, FetchReason,
    LifecycleEvent, LifecycleState, TaskAttempt, TaskLifecycle, TimerHandle,
};
pub use medals::{
    CriteriaKind, Medal, MedalCriteria, MedalEvaluation, MedalProgress, MedalReward, RewardKind,
    UnlockedMedal, UnlockedMedals, builtin_catalog, evaluate_medals,
};
pub use reward::{
    LevelProgress, RewardSummary, TaskStats, apply_completion, level_for, next_level_threshold,
    next_streak,
};
pub use session::{DEFAULT_REPORT_TIMEOUT, SessionConfig, TaskSession, report_with_timeout};
pub use source::{
    CalendarMonth, CompletionPage, CompletionReceipt, CompletionRecord, HistoryStats, Pagination,
    TaskQuery, TaskSource,
};
pub use store::{KeyValueStore, MemoryStore, StatStore, TASK_STATS_KEY, UNLOCKED_MEDALS_KEY};
pub use task::{Task, TaskId};
pub use time::{NightMode, local_day, parse_timezone};
