//! Read-mostly commands: stats, medal wall, calendar, history and reset.

use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use microtask_core::{
    CalendarMonth, CompletionRecord, KeyValueStore, Medal, StatStore, TaskSession, TaskSource,
    TaskStats, UnlockedMedals,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

pub fn print_stats<K: KeyValueStore>(store: &StatStore<K>) {
    let stats = store.load_stats();
    let progress = stats.level_progress();

    println!("Level {}  ({} / {} XP)", progress.level, progress.experience, progress.next_level_at);
    println!("  {}", bar(progress.ratio(), 20));
    println!("Tasks completed: {}", stats.total_tasks);
    println!("Average time:    {:.1}s", stats.average_time_seconds);
    println!("Current streak:  {} day(s)", stats.current_streak);
    if let Some(day) = stats.last_completed_on {
        println!("Last completed:  {day}");
    }
}

fn bar(ratio: f64, width: usize) -> String {
    let filled = (ratio.clamp(0.0, 1.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// One row on the medal wall.
pub fn medal_line(medal: &Medal, stats: &TaskStats, unlocked: &UnlockedMedals) -> String {
    match unlocked.get(&medal.id) {
        Some(u) => format!(
            "{} {:<12} unlocked {}  (+{} XP)",
            medal.icon,
            medal.name,
            u.unlocked_at.format("%Y-%m-%d"),
            u.experience_reward()
        ),
        None => {
            let p = medal.progress(stats);
            format!(
                "{} {:<12} {} {}/{}  {}",
                medal.icon,
                medal.name,
                bar(p.ratio(), 10),
                p.current.min(p.target),
                p.target,
                medal.description
            )
        }
    }
}

/// Opening the wall also settles any medal that is due.
pub fn print_medals<K: KeyValueStore>(store: &mut StatStore<K>, catalog: &[Medal]) -> Result<()> {
    let evaluation = store.evaluate_medals(catalog, Utc::now())?;
    for m in &evaluation.newly_unlocked {
        println!("New: {} {} (+{} XP)", m.icon, m.name, m.experience_reward());
    }

    println!("Medals {}/{}", evaluation.unlocked.len(), catalog.len());
    for medal in catalog {
        println!("{}", medal_line(medal, &evaluation.stats, &evaluation.unlocked));
    }
    Ok(())
}

/// Month grid, Monday first. Completed days are marked with `*`.
pub fn calendar_grid(cal: &CalendarMonth) -> Result<String> {
    let Some(first) = NaiveDate::from_ymd_opt(cal.year, cal.month, 1) else {
        bail!("invalid month {}-{}", cal.year, cal.month);
    };
    let days = days_in_month(first);

    let mut out = format!("{}\nMo  Tu  We  Th  Fr  Sa  Su\n", first.format("%B %Y"));
    let lead = first.weekday().num_days_from_monday() as usize;
    out.push_str(&"    ".repeat(lead));

    for day in 1..=days {
        let mark = if cal.completed_dates.contains(&day) { '*' } else { ' ' };
        out.push_str(&format!("{day:>2}{mark} "));
        if (lead + day as usize) % 7 == 0 {
            out.truncate(out.trim_end().len());
            out.push('\n');
        }
    }
    out.truncate(out.trim_end().len());
    out.push('\n');
    out.push_str(&format!(
        "Current streak: {}  Longest: {}",
        cal.current_streak, cal.longest_streak
    ));
    Ok(out)
}

fn days_in_month(first: NaiveDate) -> u32 {
    let next = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    next.map(|n| (n - first).num_days() as u32).unwrap_or(31)
}

pub async fn print_calendar<S: TaskSource, K: KeyValueStore>(
    session: &mut TaskSession<S, K>,
    tz: Tz,
    year: Option<i32>,
    month: Option<u32>,
) -> Result<()> {
    let today = Utc::now().with_timezone(&tz).date_naive();
    let year = year.unwrap_or(today.year());
    let month = month.unwrap_or(today.month());
    if !(1..=12).contains(&month) {
        bail!("month must be 1-12, got {month}");
    }

    let cal = session
        .sync_calendar(year, month, Utc::now())
        .await
        .context("fetch calendar")?;
    println!("{}", calendar_grid(&cal)?);
    print_unlocks(session);
    Ok(())
}

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    task_id: u64,
    completed_at: String,
    description: &'a str,
    category: &'a str,
    tags: String,
    time_spent_seconds: u64,
    experience_gained: u64,
}

impl<'a> From<&'a CompletionRecord> for HistoryRow<'a> {
    fn from(r: &'a CompletionRecord) -> Self {
        Self {
            task_id: r.task_id,
            completed_at: r.completed_at.to_rfc3339(),
            description: &r.description,
            category: &r.category,
            tags: r.tags.join(";"),
            time_spent_seconds: r.time_spent_seconds,
            experience_gained: r.experience_gained,
        }
    }
}

pub fn write_history_csv<W: Write>(records: &[CompletionRecord], out: W) -> Result<()> {
    let mut w = csv::Writer::from_writer(out);
    for r in records {
        w.serialize(HistoryRow::from(r))?;
    }
    w.flush()?;
    Ok(())
}

pub async fn print_history<S: TaskSource, K: KeyValueStore>(
    session: &mut TaskSession<S, K>,
    tz: Tz,
    page: u32,
    limit: u32,
    csv_path: Option<&Path>,
) -> Result<()> {
    let history = session
        .sync_history(page.max(1), limit.max(1), Utc::now())
        .await
        .context("fetch completion history")?;

    for r in &history.completions {
        println!(
            "{}  #{:<5} {:>4}s  +{:<3} XP  [{}] {}",
            r.completed_at.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
            r.task_id,
            r.time_spent_seconds,
            r.experience_gained,
            r.category,
            r.description
        );
    }
    let pg = history.pagination;
    println!(
        "Page {}/{} ({} total){}",
        pg.page,
        pg.total_pages.max(1),
        pg.total,
        if pg.has_next() { "  --page for more" } else { "" }
    );

    if let Some(p) = csv_path {
        let f = std::fs::File::create(p).with_context(|| format!("create {}", p.display()))?;
        write_history_csv(&history.completions, f)?;
        println!("Wrote {} rows to {}", history.completions.len(), p.display());
    }
    print_unlocks(session);
    Ok(())
}

fn print_unlocks<S: TaskSource, K: KeyValueStore>(session: &mut TaskSession<S, K>) {
    for event in session.drain_events() {
        if let microtask_core::LifecycleEvent::MedalUnlocked(m) = event {
            println!("{} Medal unlocked: {} (+{} XP)", m.icon, m.name, m.experience_reward());
        }
    }
}

pub fn reset<K: KeyValueStore>(store: &mut StatStore<K>, yes: bool) -> Result<()> {
    if !yes {
        print!("Reset all local stats and medals? [y/N]: ");
        io::stdout().flush().ok();
        let mut s = String::new();
        io::stdin().read_line(&mut s)?;
        if !matches!(s.trim(), "y" | "Y" | "yes") {
            println!("Aborted.");
            return Ok(());
        }
    }
    store.reset()?;
    println!("Local stats and medals reset.");
    Ok(())
}
