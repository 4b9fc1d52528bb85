//! Session orchestrator: wires the lifecycle, the task source and the stat
//! store together.
//!
//! Rewards are applied only after the task source confirms a completion.
//! A failed or timed-out report leaves the attempt running and the store
//! untouched.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::lifecycle::{
    ChangeQuota, CompletionRequest, DEFAULT_CHANGE_QUOTA, FetchReason, LifecycleEvent,
    TaskLifecycle, TimerHandle,
};
use crate::medals::{Medal, MedalEvaluation, builtin_catalog};
use crate::reward::RewardSummary;
use crate::source::{CalendarMonth, CompletionPage, CompletionReceipt, TaskQuery, TaskSource};
use crate::store::{KeyValueStore, StatStore};
use crate::task::{Task, TaskId};
use crate::time::{NightMode, local_day};

pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub change_quota: u32,
    /// Upper bound on waiting for a completion to be confirmed.
    pub report_timeout: Duration,
    pub night: NightMode,
    /// Used for calendar-day streaks and night detection.
    pub timezone: Tz,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            change_quota: DEFAULT_CHANGE_QUOTA,
            report_timeout: DEFAULT_REPORT_TIMEOUT,
            night: NightMode::Auto,
            timezone: chrono_tz::Asia::Shanghai,
        }
    }
}

/// Send a completion report, bounded by `timeout`. Borrows only the source,
/// so the owner of the session can keep ticking while it is pending.
pub async fn report_with_timeout<S: TaskSource>(
    source: &S,
    request: &CompletionRequest,
    timeout: Duration,
) -> Result<CompletionReceipt, TaskError> {
    let report = source.report_completion(request.task_id, request.time_spent_seconds);
    match tokio::time::timeout(timeout, report).await {
        Ok(result) => result,
        Err(_) => {
            warn!(task_id = request.task_id, "completion report timed out");
            Err(TaskError::Timeout(timeout))
        }
    }
}

pub struct TaskSession<S, K> {
    source: S,
    store: StatStore<K>,
    lifecycle: TaskLifecycle,
    catalog: Vec<Medal>,
    completed_ids: Vec<TaskId>,
    config: SessionConfig,
}

impl<S: TaskSource, K: KeyValueStore> TaskSession<S, K> {
    pub fn new(source: S, store: StatStore<K>, config: SessionConfig) -> Self {
        Self {
            source,
            store,
            lifecycle: TaskLifecycle::new(ChangeQuota::new(config.change_quota)),
            catalog: builtin_catalog(),
            completed_ids: Vec::new(),
            config,
        }
    }

    pub fn with_catalog(mut self, catalog: Vec<Medal>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    pub fn store(&self) -> &StatStore<K> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StatStore<K> {
        &mut self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &[Medal] {
        &self.catalog
    }

    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        self.lifecycle.drain_events()
    }

    /// Fetch the first task of a round. Returns false if the session is not
    /// idle.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<bool, TaskError> {
        self.fetch(FetchReason::Initial, now).await
    }

    /// Swap the current task for another one, spending one change. Returns
    /// false, changing nothing, once the quota is used up.
    pub async fn change_task(&mut self, now: DateTime<Utc>) -> Result<bool, TaskError> {
        self.fetch(FetchReason::Change, now).await
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> Option<TimerHandle> {
        self.lifecycle.accept(now)
    }

    pub fn tick(&mut self, delta: Duration) -> Option<f64> {
        self.lifecycle.tick(delta)
    }

    pub fn tick_timer(&mut self, timer: TimerHandle, delta: Duration) -> Option<f64> {
        self.lifecycle.tick_timer(timer, delta)
    }

    pub fn retry(&mut self, now: DateTime<Utc>) -> Option<TimerHandle> {
        self.lifecycle.retry(now)
    }

    pub fn close(&mut self) -> bool {
        self.lifecycle.close()
    }

    pub fn acknowledge(&mut self) -> bool {
        self.lifecycle.acknowledge()
    }

    pub fn dispose(&mut self) {
        self.lifecycle.dispose();
    }

    /// Report the running attempt as done and, once confirmed, pay out.
    ///
    /// `Ok(None)` means there was nothing to complete (no attempt, deadline
    /// already passed, or the attempt ended while the report was in flight).
    /// The lifecycle is not ticked while this awaits; callers that drive a
    /// live countdown use [`TaskSession::begin_completion`],
    /// [`report_with_timeout`] and [`TaskSession::confirm_completion`].
    pub async fn complete(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<RewardSummary>, TaskError> {
        let Some(request) = self.begin_completion(now) else {
            return Ok(None);
        };
        let receipt =
            report_with_timeout(&self.source, &request, self.config.report_timeout).await?;
        self.confirm_completion(&request, &receipt, now)
    }

    /// Snapshot the running attempt for reporting. The countdown keeps
    /// running until the completion is confirmed.
    pub fn begin_completion(&self, now: DateTime<Utc>) -> Option<CompletionRequest> {
        self.lifecycle.completion_request(now)
    }

    /// Apply a receipt the task source confirmed. `Ok(None)` if the attempt
    /// failed, changed or was disposed while the report was in flight; the
    /// server's count is picked up by the next history sync.
    pub fn confirm_completion(
        &mut self,
        request: &CompletionRequest,
        receipt: &CompletionReceipt,
        now: DateTime<Utc>,
    ) -> Result<Option<RewardSummary>, TaskError> {
        let Some(task) = self.lifecycle.mark_succeeded(request) else {
            warn!(
                task_id = request.task_id,
                "completion confirmed after the attempt ended; no reward applied"
            );
            return Ok(None);
        };

        let completed_on = local_day(now, self.config.timezone);
        self.store
            .record_completion(request.time_spent_seconds, receipt, completed_on)?;
        let evaluation = self.store.evaluate_medals(&self.catalog, now)?;

        if let Some(server_level) = receipt.new_level {
            if server_level != evaluation.stats.level() {
                debug!(
                    server_level,
                    local_level = evaluation.stats.level(),
                    "level differs from server view"
                );
            }
        }

        let summary = RewardSummary::new(
            &task,
            request.time_spent_seconds,
            receipt,
            evaluation.granted_experience(),
            &evaluation.stats,
        );
        info!(
            task_id = task.id,
            xp = summary.experience_gained,
            total_xp = summary.total_experience,
            streak = summary.streak,
            "task completed"
        );

        self.completed_ids.push(task.id);
        self.lifecycle.emit(LifecycleEvent::Succeeded(summary.clone()));
        self.emit_unlocks(evaluation);
        Ok(Some(summary))
    }

    /// Fetch a calendar month and adopt its streak as the local one.
    pub async fn sync_calendar(
        &mut self,
        year: i32,
        month: u32,
        now: DateTime<Utc>,
    ) -> Result<CalendarMonth, TaskError> {
        let calendar = self.source.fetch_calendar(year, month).await?;
        self.store.reconcile_streak(calendar.current_streak)?;
        let evaluation = self.store.evaluate_medals(&self.catalog, now)?;
        self.emit_unlocks(evaluation);
        Ok(calendar)
    }

    /// Fetch a page of completion history and adopt the server's counters.
    pub async fn sync_history(
        &mut self,
        page: u32,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<CompletionPage, TaskError> {
        let history = self.source.fetch_completion_history(page, limit).await?;
        let Some(server) = &history.stats else {
            debug!(page, "history page carried no totals; local stats kept");
            return Ok(history);
        };
        self.store.reconcile_history(server)?;
        let evaluation = self.store.evaluate_medals(&self.catalog, now)?;
        self.emit_unlocks(evaluation);
        Ok(history)
    }

    async fn fetch(&mut self, reason: FetchReason, now: DateTime<Utc>) -> Result<bool, TaskError> {
        let replacing = self.lifecycle.current_task().map(|t| t.id);
        if !self.lifecycle.begin_fetch(reason) {
            return Ok(false);
        }

        let query = self.query(replacing, now);
        match self.source.fetch_random_task(&query).await {
            Ok(task) => Ok(self.present(task)),
            Err(e) => {
                warn!(error = %e, ?reason, "task fetch failed");
                self.lifecycle.abort_fetch();
                Err(e)
            }
        }
    }

    fn present(&mut self, task: Task) -> bool {
        self.lifecycle.finish_fetch(task)
    }

    fn query(&self, replacing: Option<TaskId>, now: DateTime<Utc>) -> TaskQuery {
        let mut exclude_ids = self.completed_ids.clone();
        if let Some(id) = replacing {
            if !exclude_ids.contains(&id) {
                exclude_ids.push(id);
            }
        }
        TaskQuery {
            exclude_ids,
            night: self.config.night.is_night(now, self.config.timezone),
        }
    }

    fn emit_unlocks(&mut self, evaluation: MedalEvaluation) {
        for medal in evaluation.newly_unlocked {
            self.lifecycle.emit(LifecycleEvent::MedalUnlocked(medal));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::TaskStats;
    use crate::source::{HistoryStats, Pagination};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedSource {
        tasks: RefCell<VecDeque<Task>>,
        queries: RefCell<Vec<TaskQuery>>,
        fail_reports: bool,
        slow_reports: Option<Duration>,
        history_without_stats: bool,
    }

    impl ScriptedSource {
        fn with_tasks(tasks: Vec<Task>) -> Self {
            Self {
                tasks: RefCell::new(tasks.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait(?Send)]
    impl TaskSource for ScriptedSource {
        async fn fetch_random_task(&self, query: &TaskQuery) -> Result<Task, TaskError> {
            self.queries.borrow_mut().push(query.clone());
            self.tasks
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| TaskError::transport("no task available"))
        }

        async fn report_completion(
            &self,
            _task_id: TaskId,
            _secs: u64,
        ) -> Result<CompletionReceipt, TaskError> {
            if let Some(delay) = self.slow_reports {
                tokio::time::sleep(delay).await;
            }
            if self.fail_reports {
                return Err(TaskError::transport("502 bad gateway"));
            }
            Ok(CompletionReceipt {
                experience_gained: 20,
                streak: Some(1),
                ..Default::default()
            })
        }

        async fn fetch_calendar(&self, year: i32, month: u32) -> Result<CalendarMonth, TaskError> {
            Ok(CalendarMonth {
                year,
                month,
                completed_dates: vec![1, 2, 3],
                current_streak: 3,
                longest_streak: 3,
            })
        }

        async fn fetch_completion_history(
            &self,
            page: u32,
            limit: u32,
        ) -> Result<CompletionPage, TaskError> {
            let stats = HistoryStats {
                total_experience: 60,
                average_time_seconds: 20.0,
                total_tasks: 3,
                current_streak: None,
            };
            Ok(CompletionPage {
                completions: vec![],
                stats: (!self.history_without_stats).then_some(stats),
                pagination: Pagination { total: 3, page, limit, total_pages: 1 },
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
    }

    fn session(source: ScriptedSource) -> TaskSession<ScriptedSource, MemoryStore> {
        TaskSession::new(source, StatStore::new(MemoryStore::new()), SessionConfig::default())
    }

    #[tokio::test]
    async fn failed_report_keeps_attempt_and_store() {
        let mut source = ScriptedSource::with_tasks(vec![Task::new(1, "x").with_duration(60)]);
        source.fail_reports = true;
        let mut s = session(source);

        s.start(now()).await.unwrap();
        s.accept(now()).unwrap();
        let err = s.complete(now() + chrono::Duration::seconds(5)).await.unwrap_err();
        assert!(err.is_retryable());

        assert_eq!(s.lifecycle().state().name(), "accepted");
        assert_eq!(s.store().load_stats().total_tasks, 0);
        assert!(s.store().inner().get(crate::store::TASK_STATS_KEY).is_none());
    }

    #[tokio::test]
    async fn slow_report_times_out_without_reward() {
        let mut source = ScriptedSource::with_tasks(vec![Task::new(1, "x").with_duration(60)]);
        source.slow_reports = Some(Duration::from_millis(200));
        let config = SessionConfig {
            report_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let mut s = TaskSession::new(source, StatStore::new(MemoryStore::new()), config);

        s.start(now()).await.unwrap();
        s.accept(now()).unwrap();
        let err = s.complete(now()).await.unwrap_err();
        assert!(matches!(err, TaskError::Timeout(_)));
        assert_eq!(s.lifecycle().state().name(), "accepted");
        assert_eq!(s.store().load_stats().total_tasks, 0);
    }

    #[tokio::test]
    async fn deadline_passing_during_report_forfeits_reward() {
        let mut s = session(ScriptedSource::with_tasks(vec![Task::new(1, "x").with_duration(1)]));
        s.start(now()).await.unwrap();
        s.accept(now()).unwrap();

        let request = s.begin_completion(now()).unwrap();
        // countdown keeps running while the report is out
        s.tick(Duration::from_millis(600));
        s.tick(Duration::from_millis(600));
        assert_eq!(s.lifecycle().state().name(), "failed");

        let receipt = report_with_timeout(s.source(), &request, DEFAULT_REPORT_TIMEOUT)
            .await
            .unwrap();
        let confirmed = s.confirm_completion(&request, &receipt, now()).unwrap();

        assert!(confirmed.is_none());
        assert_eq!(s.lifecycle().state().name(), "failed");
        assert_eq!(s.store().load_stats().total_tasks, 0);
        assert!(!s.drain_events().iter().any(|e| matches!(e, LifecycleEvent::Succeeded(_))));
    }

    #[tokio::test]
    async fn split_completion_matches_complete() {
        let mut s = session(ScriptedSource::with_tasks(vec![Task::new(1, "x").with_duration(60)]));
        s.start(now()).await.unwrap();
        s.accept(now()).unwrap();

        let request = s.begin_completion(now()).unwrap();
        s.tick(Duration::from_millis(300));
        let receipt = report_with_timeout(s.source(), &request, s.config().report_timeout)
            .await
            .unwrap();
        let summary = s.confirm_completion(&request, &receipt, now()).unwrap().unwrap();

        assert_eq!(summary.experience_gained, 20);
        assert_eq!(s.lifecycle().state().name(), "succeeded");
        assert_eq!(s.store().load_stats().total_tasks, 1);
    }

    #[tokio::test]
    async fn change_excludes_current_and_completed_tasks() {
        let source = ScriptedSource::with_tasks(vec![
            Task::new(1, "a").with_duration(60),
            Task::new(2, "b"),
            Task::new(3, "c"),
        ]);
        let mut s = session(source);

        s.start(now()).await.unwrap();
        s.accept(now()).unwrap();
        s.complete(now()).await.unwrap().unwrap();
        s.acknowledge();

        s.start(now()).await.unwrap();
        assert!(s.change_task(now()).await.unwrap());

        let queries = s.source().queries.borrow();
        assert_eq!(queries[0].exclude_ids, Vec::<TaskId>::new());
        assert_eq!(queries[1].exclude_ids, vec![1]);
        assert_eq!(queries[2].exclude_ids, vec![1, 2]);
        // 02:00 UTC is 10:00 in Shanghai
        assert!(!queries[0].night);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_task_and_quota() {
        let mut s = session(ScriptedSource::with_tasks(vec![Task::new(1, "only")]));
        s.start(now()).await.unwrap();

        assert!(s.change_task(now()).await.is_err());
        assert_eq!(s.lifecycle().current_task().unwrap().id, 1);
        assert_eq!(s.lifecycle().remaining_changes(), 3);
    }

    #[tokio::test]
    async fn sync_calendar_adopts_server_streak_and_unlocks() {
        let mut s = session(ScriptedSource::default());
        let cal = s.sync_calendar(2026, 3, now()).await.unwrap();
        assert_eq!(cal.completed_dates, vec![1, 2, 3]);

        let stats = s.store().load_stats();
        assert_eq!(stats.current_streak, 3);
        // streak 3 medal pays 300
        assert_eq!(stats.total_experience, 300);
        assert!(s
            .drain_events()
            .iter()
            .any(|e| matches!(e, LifecycleEvent::MedalUnlocked(m) if m.id == "2")));
    }

    #[tokio::test]
    async fn sync_history_adopts_server_totals() {
        let mut s = session(ScriptedSource::default());
        s.sync_history(1, 10, now()).await.unwrap();
        let stats = s.store().load_stats();
        assert_eq!(stats.total_tasks, 3);
        // 60 from the server plus the first-task medal
        assert_eq!(stats.total_experience, 160);
    }

    #[tokio::test]
    async fn history_without_totals_leaves_stats_alone() {
        let source = ScriptedSource {
            history_without_stats: true,
            ..Default::default()
        };
        let local = TaskStats {
            total_experience: 250,
            total_tasks: 5,
            current_streak: 4,
            ..Default::default()
        };
        let mut store = StatStore::new(MemoryStore::new());
        store.save_stats(&local).unwrap();
        let mut s = TaskSession::new(source, store, SessionConfig::default());

        let page = s.sync_history(1, 10, now()).await.unwrap();
        assert!(page.stats.is_none());
        assert_eq!(s.store().load_stats(), local);
        assert!(s.drain_events().is_empty());
    }
}
