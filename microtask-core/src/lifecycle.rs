//! Task lifecycle state machine.
//!
//! ```text
//! Idle ──fetch──▶ Fetching ──▶ Presented ──accept──▶ Accepted ──complete──▶ Succeeded ─ack─▶ Idle
//!                    ▲            │  ▲                  │  │
//!                    └──change────┘  └─────change───────┘  └─deadline──▶ Failed ─retry─▶ Accepted
//!                                                                          └──close──▶ Idle
//! ```
//!
//! The machine has no clock of its own. A scheduler calls [`TaskLifecycle::tick`]
//! at a fixed cadence; tests drive it with simulated ticks. At most one
//! countdown is live at a time, and every exit from `Accepted` cancels it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::medals::Medal;
use crate::reward::RewardSummary;
use crate::task::{Task, TaskId};
use crate::time::whole_seconds_between;

pub const DEFAULT_CHANGE_QUOTA: u32 = 3;
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Identifies one armed countdown. Ticks addressed to a cancelled handle
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// One timed try at a task. Dropped on completion, failure or change.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAttempt {
    pub task: Task,
    pub started_at: DateTime<Utc>,
    /// 0.0 at accept, 1.0 when the countdown has run out.
    pub elapsed_ratio: f64,
    elapsed: Duration,
    timer: TimerHandle,
}

impl TaskAttempt {
    pub fn timer(&self) -> TimerHandle {
        self.timer
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(u64::from(self.task.countdown_seconds()))
    }

    pub fn remaining(&self) -> Duration {
        self.countdown().saturating_sub(self.elapsed)
    }

    fn advance(&mut self, delta: Duration) -> bool {
        let countdown = self.countdown();
        self.elapsed = self.elapsed.saturating_add(delta).min(countdown);
        self.elapsed_ratio = self.elapsed.as_secs_f64() / countdown.as_secs_f64();
        self.elapsed >= countdown
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Idle,
    /// Waiting on the task source. Holds the task to fall back to if the
    /// fetch fails.
    Fetching { previous: Option<Task>, reason: FetchReason },
    Presented(Task),
    Accepted(TaskAttempt),
    Succeeded(Task),
    Failed(Task),
}

impl LifecycleState {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Fetching { .. } => "fetching",
            LifecycleState::Presented(_) => "presented",
            LifecycleState::Accepted(_) => "accepted",
            LifecycleState::Succeeded(_) => "succeeded",
            LifecycleState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// First task of a round. Free.
    Initial,
    /// User asked for a different task. Costs one change.
    Change,
}

/// Notifications for the presentation layer, drained by the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Presented(Task),
    Tick { timer: TimerHandle, progress: f64 },
    Failed(Task),
    Succeeded(RewardSummary),
    MedalUnlocked(Medal),
}

/// Changes left this session. Never replenished by the machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeQuota {
    remaining: u32,
}

impl ChangeQuota {
    pub fn new(remaining: u32) -> Self {
        Self { remaining }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

impl Default for ChangeQuota {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_QUOTA)
    }
}

/// A completion waiting on confirmation from the task source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRequest {
    pub task_id: TaskId,
    pub time_spent_seconds: u64,
    timer: TimerHandle,
}

#[derive(Debug)]
pub struct TaskLifecycle {
    state: LifecycleState,
    quota: ChangeQuota,
    live_timer: Option<TimerHandle>,
    timer_seq: u64,
    /// Pending events for the caller. Consecutive ticks of one timer
    /// collapse into the latest, so an undrained queue stays small.
    events: Vec<LifecycleEvent>,
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new(ChangeQuota::default())
    }
}

impl TaskLifecycle {
    pub fn new(quota: ChangeQuota) -> Self {
        Self {
            state: LifecycleState::Idle,
            quota,
            live_timer: None,
            timer_seq: 0,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn remaining_changes(&self) -> u32 {
        self.quota.remaining()
    }

    pub fn live_timer(&self) -> Option<TimerHandle> {
        self.live_timer
    }

    /// The task on screen, whatever the phase.
    pub fn current_task(&self) -> Option<&Task> {
        match &self.state {
            LifecycleState::Idle => None,
            LifecycleState::Fetching { previous, .. } => previous.as_ref(),
            LifecycleState::Presented(t)
            | LifecycleState::Succeeded(t)
            | LifecycleState::Failed(t) => Some(t),
            LifecycleState::Accepted(a) => Some(&a.task),
        }
    }

    pub fn attempt(&self) -> Option<&TaskAttempt> {
        match &self.state {
            LifecycleState::Accepted(a) => Some(a),
            _ => None,
        }
    }

    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: LifecycleEvent) {
        if let (
            LifecycleEvent::Tick { timer, .. },
            Some(LifecycleEvent::Tick { timer: last, .. }),
        ) = (&event, self.events.last())
        {
            if timer == last {
                self.events.pop();
            }
        }
        self.events.push(event);
    }

    /// Enter `Fetching`. Returns false when the request is a no-op: wrong
    /// state, or a change with no quota left.
    ///
    /// A change during `Accepted` cancels the countdown and discards the
    /// attempt without reward.
    pub fn begin_fetch(&mut self, reason: FetchReason) -> bool {
        let previous = match (&self.state, reason) {
            (LifecycleState::Idle, FetchReason::Initial) => None,
            (LifecycleState::Presented(t), FetchReason::Change) if !self.quota.is_exhausted() => {
                Some(t.clone())
            }
            (LifecycleState::Accepted(a), FetchReason::Change) if !self.quota.is_exhausted() => {
                debug!(task_id = a.task.id, "attempt discarded by task change");
                Some(a.task.clone())
            }
            (state, reason) => {
                debug!(
                    state = state.name(),
                    ?reason,
                    remaining = self.quota.remaining(),
                    "fetch ignored"
                );
                return false;
            }
        };

        self.cancel_timer();
        self.state = LifecycleState::Fetching { previous, reason };
        true
    }

    /// Present a freshly fetched task. A change is only charged here, once
    /// the new task has actually arrived.
    pub fn finish_fetch(&mut self, task: Task) -> bool {
        let LifecycleState::Fetching { reason, .. } = &self.state else {
            debug!(state = self.state.name(), "late fetch result dropped");
            return false;
        };
        if *reason == FetchReason::Change {
            self.quota.consume();
        }

        debug!(task_id = task.id, remaining = self.quota.remaining(), "task presented");
        self.state = LifecycleState::Presented(task.clone());
        self.emit(LifecycleEvent::Presented(task));
        true
    }

    /// Fetch failed: go back to what was on screen before.
    pub fn abort_fetch(&mut self) {
        let LifecycleState::Fetching { previous, .. } = &mut self.state else {
            return;
        };
        let previous = previous.take();
        self.state = match previous {
            Some(task) => LifecycleState::Presented(task),
            None => LifecycleState::Idle,
        };
    }

    /// Start the countdown for the presented task.
    pub fn accept(&mut self, now: DateTime<Utc>) -> Option<TimerHandle> {
        let LifecycleState::Presented(task) = &self.state else {
            return None;
        };
        let task = task.clone();
        Some(self.start_attempt(task, now))
    }

    /// Re-arm the failed task with a fresh start time. Does not touch the
    /// change quota.
    pub fn retry(&mut self, now: DateTime<Utc>) -> Option<TimerHandle> {
        let LifecycleState::Failed(task) = &self.state else {
            return None;
        };
        let task = task.clone();
        Some(self.start_attempt(task, now))
    }

    /// Advance the live countdown by `delta`. Returns the new progress, or
    /// `None` if no countdown is running.
    pub fn tick(&mut self, delta: Duration) -> Option<f64> {
        let timer = self.live_timer?;
        self.tick_timer(timer, delta)
    }

    /// Advance a specific countdown. Stale handles are ignored.
    pub fn tick_timer(&mut self, timer: TimerHandle, delta: Duration) -> Option<f64> {
        if self.live_timer != Some(timer) {
            warn!(?timer, live = ?self.live_timer, "tick for cancelled timer ignored");
            return None;
        }
        let LifecycleState::Accepted(attempt) = &mut self.state else {
            return None;
        };

        let expired = attempt.advance(delta);
        let progress = attempt.elapsed_ratio;
        self.emit(LifecycleEvent::Tick { timer, progress });

        if expired {
            self.expire();
        }
        Some(progress)
    }

    /// Snapshot a completion for reporting. The machine stays in
    /// `Accepted` until [`TaskLifecycle::mark_succeeded`] confirms it.
    pub fn completion_request(&self, now: DateTime<Utc>) -> Option<CompletionRequest> {
        let attempt = self.attempt()?;
        if attempt.elapsed_ratio >= 1.0 {
            return None;
        }
        Some(CompletionRequest {
            task_id: attempt.task.id,
            time_spent_seconds: whole_seconds_between(attempt.started_at, now),
            timer: attempt.timer,
        })
    }

    /// Confirm a reported completion. A no-op if the attempt it was taken
    /// from has since been changed, failed or disposed.
    pub fn mark_succeeded(&mut self, request: &CompletionRequest) -> Option<Task> {
        let attempt = match &self.state {
            LifecycleState::Accepted(a) if a.timer == request.timer => a,
            _ => {
                debug!(task_id = request.task_id, "completion for a stale attempt dropped");
                return None;
            }
        };
        let task = attempt.task.clone();

        self.cancel_timer();
        self.state = LifecycleState::Succeeded(task.clone());
        Some(task)
    }

    /// Dismiss the failure. No reward, nothing persisted.
    pub fn close(&mut self) -> bool {
        if !matches!(self.state, LifecycleState::Failed(_)) {
            return false;
        }
        self.state = LifecycleState::Idle;
        true
    }

    /// Leave `Succeeded` once the reward has been shown. Does not fetch.
    pub fn acknowledge(&mut self) -> bool {
        if !matches!(self.state, LifecycleState::Succeeded(_)) {
            return false;
        }
        self.state = LifecycleState::Idle;
        true
    }

    /// Tear down: cancel any countdown and forget the task.
    pub fn dispose(&mut self) {
        self.cancel_timer();
        self.state = LifecycleState::Idle;
    }

    fn start_attempt(&mut self, task: Task, now: DateTime<Utc>) -> TimerHandle {
        self.cancel_timer();
        self.timer_seq += 1;
        let timer = TimerHandle(self.timer_seq);
        self.live_timer = Some(timer);

        debug!(task_id = task.id, ?timer, seconds = task.countdown_seconds(), "countdown armed");
        self.state = LifecycleState::Accepted(TaskAttempt {
            task,
            started_at: now,
            elapsed_ratio: 0.0,
            elapsed: Duration::ZERO,
            timer,
        });
        timer
    }

    fn expire(&mut self) {
        let LifecycleState::Accepted(attempt) = &self.state else {
            return;
        };
        let task = attempt.task.clone();

        self.cancel_timer();
        debug!(task_id = task.id, "deadline reached");
        self.state = LifecycleState::Failed(task.clone());
        self.emit(LifecycleEvent::Failed(task));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.live_timer.take() {
            debug!(?timer, "countdown cancelled");
        }
    }
}
