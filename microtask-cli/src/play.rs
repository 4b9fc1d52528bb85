//! Interactive round loop: a countdown ticker and stdin commands on one task.

use anyhow::Result;
use chrono::{DateTime, Utc};
use microtask_core::{
    KeyValueStore, LifecycleEvent, LifecycleState, Medal, RewardSummary, Task, TaskError,
    TaskSession, TaskSource, report_with_timeout,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayCommand {
    Accept,
    Done,
    Change,
    Retry,
    Close,
    Next,
    Status,
    Help,
    Quit,
}

impl PlayCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let cmd = match line.trim().to_ascii_lowercase().as_str() {
            "accept" | "a" => Self::Accept,
            "done" | "d" => Self::Done,
            "change" | "c" => Self::Change,
            "retry" | "r" => Self::Retry,
            "close" | "x" => Self::Close,
            "next" | "n" => Self::Next,
            "status" | "s" => Self::Status,
            "help" | "h" | "?" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            _ => return None,
        };
        Some(cmd)
    }
}

const HELP: &str = "\
commands:
  a, accept   start the countdown
  d, done     report the running task as completed
  c, change   swap for another task (limited per session)
  r, retry    try a failed task again
  x, close    dismiss a failed task
  n, next     fetch the next task
  s, status   show the current state
  q, quit     leave";

/// Prints countdown progress once per tenth.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    last_decile: Option<u32>,
}

impl ProgressMeter {
    pub fn reset(&mut self) {
        self.last_decile = None;
    }

    /// Returns the decile to show, if `progress` crossed into a new one.
    pub fn step(&mut self, progress: f64) -> Option<u32> {
        let decile = (progress.clamp(0.0, 1.0) * 10.0).floor() as u32;
        if self.last_decile == Some(decile) {
            return None;
        }
        self.last_decile = Some(decile);
        Some(decile)
    }
}

/// Ticker that reports the wall time since its previous tick, so a late or
/// delayed tick still charges the countdown for the time that really passed.
#[derive(Debug)]
pub struct Countdown {
    interval: Interval,
    last: Instant,
}

impl Countdown {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, last: Instant::now() }
    }

    /// Waits for the next tick and returns the time elapsed since the last one.
    pub async fn tick(&mut self) -> Duration {
        self.interval.tick().await;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        elapsed
    }

    /// Start measuring from now. Called when a countdown (re)starts.
    pub fn restart(&mut self) {
        self.interval.reset();
        self.last = Instant::now();
    }
}

fn describe_task(task: &Task, remaining_changes: u32) -> String {
    let mut out = format!("\n[{}] {}\n", task.category, task.description);
    if !task.tags.is_empty() {
        out.push_str(&format!("  tags: {}\n", task.tags.join(", ")));
    }
    out.push_str(&format!(
        "  time: {}s | difficulty: {} | points: {} | changes left: {}",
        task.countdown_seconds(),
        task.difficulty,
        task.points,
        remaining_changes
    ));
    out
}

fn describe_summary(s: &RewardSummary) -> String {
    let mut out = format!(
        "Done in {}s. +{} XP (total {}, level {}, next level at {}). Streak: {}",
        s.time_spent_seconds,
        s.experience_gained,
        s.total_experience,
        s.level,
        s.next_level_at,
        s.streak
    );
    if s.medal_experience > 0 {
        out.push_str(&format!(" | medal bonus +{} XP", s.medal_experience));
    }
    out
}

fn describe_medal(m: &Medal) -> String {
    format!(
        "{} Medal unlocked: {} ({}) +{} XP",
        m.icon,
        m.name,
        m.description,
        m.experience_reward()
    )
}

/// Text for one lifecycle event, or `None` if nothing should be printed.
pub fn render_event(
    event: &LifecycleEvent,
    meter: &mut ProgressMeter,
    remaining_changes: u32,
) -> Option<String> {
    match event {
        LifecycleEvent::Presented(task) => {
            meter.reset();
            Some(describe_task(task, remaining_changes))
        }
        LifecycleEvent::Tick { progress, .. } => {
            let decile = meter.step(*progress)?;
            if decile == 0 || decile >= 10 {
                return None;
            }
            Some(format!("  {:>3}% [{:<10}]", decile * 10, "#".repeat(decile as usize)))
        }
        LifecycleEvent::Failed(task) => Some(format!(
            "Time's up for \"{}\". (r)etry or (x) close.",
            task.description
        )),
        LifecycleEvent::Succeeded(summary) => Some(describe_summary(summary)),
        LifecycleEvent::MedalUnlocked(medal) => Some(describe_medal(medal)),
    }
}

fn describe_state<S: TaskSource, K: KeyValueStore>(session: &TaskSession<S, K>) -> String {
    let lc = session.lifecycle();
    match lc.state() {
        LifecycleState::Accepted(attempt) => format!(
            "accepted: \"{}\" ({}s left, {:.0}%)",
            attempt.task.description,
            attempt.remaining().as_secs(),
            attempt.elapsed_ratio * 100.0
        ),
        state => match lc.current_task() {
            Some(t) => format!(
                "{}: \"{}\" (changes left: {})",
                state.name(),
                t.description,
                lc.remaining_changes()
            ),
            None => format!("{} (changes left: {})", state.name(), lc.remaining_changes()),
        },
    }
}

fn report_error(action: &str, e: &TaskError) {
    if e.is_retryable() {
        eprintln!("{action} failed: {e}. Nothing was lost; try again.");
    } else {
        eprintln!("{action} failed: {e}");
    }
}

fn flush_events<S: TaskSource, K: KeyValueStore>(
    session: &mut TaskSession<S, K>,
    meter: &mut ProgressMeter,
) {
    let remaining = session.lifecycle().remaining_changes();
    for event in session.drain_events() {
        if let Some(line) = render_event(&event, meter, remaining) {
            println!("{line}");
        }
    }
}

async fn fetch_next<S: TaskSource, K: KeyValueStore>(session: &mut TaskSession<S, K>) {
    session.acknowledge();
    session.close();
    match session.start(Utc::now()).await {
        Ok(true) => {}
        Ok(false) => println!("Finish or dismiss the current task first."),
        Err(e) => report_error("fetching a task", &e),
    }
}

/// Report the running attempt while the countdown keeps going. If the
/// deadline passes before the service answers, the attempt fails and the
/// late confirmation pays nothing.
async fn report_while_ticking<S: TaskSource + Clone, K: KeyValueStore>(
    session: &mut TaskSession<S, K>,
    countdown: &mut Countdown,
    meter: &mut ProgressMeter,
    now: DateTime<Utc>,
) -> Result<Option<RewardSummary>, TaskError> {
    let Some(request) = session.begin_completion(now) else {
        return Ok(None);
    };
    let source = session.source().clone();
    let report = report_with_timeout(&source, &request, session.config().report_timeout);
    tokio::pin!(report);

    let receipt = loop {
        tokio::select! {
            result = &mut report => break result?,
            elapsed = countdown.tick() => {
                session.tick(elapsed);
                flush_events(session, meter);
            }
        }
    };
    session.confirm_completion(&request, &receipt, now)
}

/// Returns false when the loop should stop.
async fn handle<S: TaskSource + Clone, K: KeyValueStore>(
    session: &mut TaskSession<S, K>,
    countdown: &mut Countdown,
    meter: &mut ProgressMeter,
    cmd: PlayCommand,
) -> bool {
    let now = Utc::now();
    match cmd {
        PlayCommand::Accept => match session.accept(now) {
            Some(_) => countdown.restart(),
            None => println!("No task to accept."),
        },
        PlayCommand::Done => {
            if session.begin_completion(now).is_none() {
                println!("No running task to complete.");
                return true;
            }
            match report_while_ticking(session, countdown, meter, now).await {
                Ok(Some(_)) => {}
                Ok(None) => println!("Time ran out before the completion was confirmed."),
                Err(e) => report_error("reporting completion", &e),
            }
        }
        // Fetching cancels the live timer first, so no countdown runs while these await.
        PlayCommand::Change => match session.change_task(now).await {
            Ok(true) => {}
            Ok(false) => {
                if session.lifecycle().remaining_changes() == 0 {
                    println!("No changes left this session.");
                } else {
                    println!("Nothing to change right now.");
                }
            }
            Err(e) => report_error("changing task", &e),
        },
        PlayCommand::Retry => match session.retry(now) {
            Some(_) => countdown.restart(),
            None => println!("Nothing to retry."),
        },
        PlayCommand::Close => {
            if !session.close() {
                println!("Nothing to close.");
            }
        }
        PlayCommand::Next => fetch_next(session).await,
        PlayCommand::Status => println!("{}", describe_state(session)),
        PlayCommand::Help => println!("{HELP}"),
        PlayCommand::Quit => return false,
    }
    true
}

pub async fn run<S: TaskSource + Clone, K: KeyValueStore>(
    session: &mut TaskSession<S, K>,
    tick: Duration,
) -> Result<()> {
    let mut meter = ProgressMeter::default();
    println!("{HELP}");

    fetch_next(session).await;
    flush_events(session, &mut meter);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut countdown = Countdown::new(tick);

    loop {
        tokio::select! {
            elapsed = countdown.tick() => {
                session.tick(elapsed);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match PlayCommand::parse(&line) {
                    Some(cmd) => {
                        if !handle(session, &mut countdown, &mut meter, cmd).await {
                            break;
                        }
                    }
                    None => println!("Unknown command: {} (h for help)", line.trim()),
                }
            }
        }
        flush_events(session, &mut meter);
    }

    session.dispose();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use microtask_core::{
        CalendarMonth, CompletionPage, CompletionReceipt, FetchReason, MemoryStore,
        SessionConfig, StatStore, TaskId, TaskLifecycle, TaskQuery,
    };

    /// Hands out one task and answers completion reports after `delay`.
    #[derive(Debug, Clone)]
    struct SlowService {
        task: Task,
        delay: Duration,
    }

    #[async_trait(?Send)]
    impl TaskSource for SlowService {
        async fn fetch_random_task(&self, _query: &TaskQuery) -> Result<Task, TaskError> {
            Ok(self.task.clone())
        }

        async fn report_completion(
            &self,
            _task_id: TaskId,
            _time_spent_seconds: u64,
        ) -> Result<CompletionReceipt, TaskError> {
            tokio::time::sleep(self.delay).await;
            Ok(CompletionReceipt {
                experience_gained: 10,
                ..Default::default()
            })
        }

        async fn fetch_calendar(
            &self,
            _year: i32,
            _month: u32,
        ) -> Result<CalendarMonth, TaskError> {
            Err(TaskError::transport("no calendar"))
        }

        async fn fetch_completion_history(
            &self,
            _page: u32,
            _limit: u32,
        ) -> Result<CompletionPage, TaskError> {
            Err(TaskError::transport("no history"))
        }
    }

    async fn accepted_session(
        duration_secs: u32,
        delay: Duration,
    ) -> TaskSession<SlowService, MemoryStore> {
        let source = SlowService {
            task: Task::new(4, "Drink some water").with_duration(duration_secs),
            delay,
        };
        let mut session =
            TaskSession::new(source, StatStore::new(MemoryStore::new()), SessionConfig::default());
        session.start(Utc::now()).await.unwrap();
        session.accept(Utc::now()).unwrap();
        session.drain_events();
        session
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(PlayCommand::parse(" A "), Some(PlayCommand::Accept));
        assert_eq!(PlayCommand::parse("done"), Some(PlayCommand::Done));
        assert_eq!(PlayCommand::parse("q"), Some(PlayCommand::Quit));
        assert_eq!(PlayCommand::parse("dance"), None);
    }

    #[test]
    fn test_meter_reports_each_decile_once() {
        let mut m = ProgressMeter::default();
        assert_eq!(m.step(0.0), Some(0));
        assert_eq!(m.step(0.05), None);
        assert_eq!(m.step(0.1), Some(1));
        assert_eq!(m.step(0.19), None);
        assert_eq!(m.step(1.0), Some(10));
        m.reset();
        assert_eq!(m.step(0.0), Some(0));
    }

    #[test]
    fn test_render_presented_and_failed() {
        let mut m = ProgressMeter::default();
        let task = Task::new(7, "Find something blue")
            .with_category("observe")
            .with_tags(["color"])
            .with_duration(45)
            .with_points(10);

        let text = render_event(&LifecycleEvent::Presented(task.clone()), &mut m, 2).unwrap();
        assert!(text.contains("[observe] Find something blue"));
        assert!(text.contains("45s"));
        assert!(text.contains("changes left: 2"));

        let text = render_event(&LifecycleEvent::Failed(task), &mut m, 2).unwrap();
        assert!(text.contains("Time's up"));
    }

    #[test]
    fn test_render_ticks_only_on_new_decile() {
        let mut lc = TaskLifecycle::default();
        lc.begin_fetch(FetchReason::Initial);
        lc.finish_fetch(Task::new(1, "Hum a tune"));
        let timer = lc.accept(Utc::now()).unwrap();

        let mut m = ProgressMeter::default();
        let tick = |p| LifecycleEvent::Tick { timer, progress: p };

        assert_eq!(render_event(&tick(0.01), &mut m, 3), None);
        let shown = render_event(&tick(0.3), &mut m, 3).unwrap();
        assert!(shown.contains("30%"));
        assert_eq!(render_event(&tick(0.31), &mut m, 3), None);
    }

    #[tokio::test]
    async fn test_countdown_measures_elapsed_time() {
        let mut countdown = Countdown::new(Duration::from_millis(20));
        countdown.restart();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let elapsed = countdown.tick().await;
        assert!(elapsed >= Duration::from_millis(60), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_deadline_runs_out_during_slow_report() {
        let mut session = accepted_session(1, Duration::from_millis(1500)).await;
        let mut countdown = Countdown::new(Duration::from_millis(50));
        countdown.restart();
        let mut meter = ProgressMeter::default();

        let confirmed = report_while_ticking(&mut session, &mut countdown, &mut meter, Utc::now())
            .await
            .unwrap();

        assert!(confirmed.is_none());
        assert_eq!(session.lifecycle().state().name(), "failed");
        assert_eq!(session.store().load_stats().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_fast_report_pays_out_while_ticking() {
        let mut session = accepted_session(30, Duration::from_millis(80)).await;
        let mut countdown = Countdown::new(Duration::from_millis(20));
        countdown.restart();
        let mut meter = ProgressMeter::default();

        let summary = report_while_ticking(&mut session, &mut countdown, &mut meter, Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.experience_gained, 10);
        assert_eq!(session.lifecycle().state().name(), "succeeded");
        assert_eq!(session.store().load_stats().total_tasks, 1);
    }
}
