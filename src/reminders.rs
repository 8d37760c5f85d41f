//! Fee reminder sweep and its background scheduler.
//!
//! A sweep logs at most one reminder per student, reminder type and day.
//! Running it again on the same day only fills in what is missing, so the
//! scheduler and the manual `reminders.generate` call can both use it.

use crate::config::ReminderSettings;
use crate::db::{self, new_id, now_ts};
use crate::error::{AppError, AppResult};
use chrono::{Duration as ChronoDuration, NaiveDate};
use log::{error, info, warn};
use rusqlite::{params, Connection, Params};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReminderKind {
    FeeOverdue,
    FeeUpcoming,
}

impl ReminderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderKind::FeeOverdue => "FeeOverdue",
            ReminderKind::FeeUpcoming => "FeeUpcoming",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepOutcome {
    pub swept_on: NaiveDate,
    pub overdue_heads: usize,
    pub upcoming_heads: usize,
    pub created: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Clone)]
struct DueHead {
    id: String,
    name: String,
    amount: f64,
    applicable_class: Option<String>,
    academic_year_id: String,
    due_date: NaiveDate,
}

fn message_for(kind: ReminderKind, head: &DueHead) -> String {
    let due = head.due_date.format("%d-%b-%Y");
    match kind {
        ReminderKind::FeeOverdue => format!(
            "Fee '{}' of ₹{:.2} is overdue (due: {})",
            head.name, head.amount, due
        ),
        ReminderKind::FeeUpcoming => format!(
            "Fee '{}' of ₹{:.2} is due on {}",
            head.name, head.amount, due
        ),
    }
}

fn due_heads<P: Params>(conn: &Connection, due_clause: &str, args: P) -> AppResult<Vec<DueHead>> {
    let sql = format!(
        "SELECT id, name, amount, applicable_class, academic_year_id, due_date
         FROM fee_heads
         WHERE is_active = 1 AND {due_clause}
         ORDER BY due_date, name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let heads = stmt
        .query_map(args, |r| {
            Ok(DueHead {
                id: r.get(0)?,
                name: r.get(1)?,
                amount: r.get(2)?,
                applicable_class: r.get(3)?,
                academic_year_id: r.get(4)?,
                due_date: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(heads)
}

fn fully_paid_students(conn: &Connection, head: &DueHead) -> AppResult<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM fee_payments
         WHERE fee_head_id = ? AND status = 'Completed'
         GROUP BY student_id
         HAVING SUM(amount_paid) >= ?",
    )?;
    let ids = stmt
        .query_map(params![head.id, head.amount], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())?;
    Ok(ids)
}

fn candidate_students(conn: &Connection, head: &DueHead) -> AppResult<Vec<String>> {
    let ids = match head.applicable_class.as_deref() {
        None => {
            let mut stmt = conn.prepare(
                "SELECT id FROM students WHERE is_active = 1 ORDER BY admission_number",
            )?;
            let ids = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
            ids
        }
        Some(class_name) => {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT s.id
                 FROM students s
                 JOIN enrollments e ON e.student_id = s.id
                 JOIN class_sections cs ON cs.id = e.class_section_id
                 WHERE s.is_active = 1 AND e.is_active = 1
                   AND e.academic_year_id = ? AND cs.class_name = ?
                 ORDER BY s.admission_number",
            )?;
            let ids = stmt
                .query_map(params![head.academic_year_id, class_name], |r| {
                    r.get::<_, String>(0)
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
            ids
        }
    };
    Ok(ids)
}

/// Runs one reminder sweep for `today`.
///
/// Overdue heads are active heads due before `today`; upcoming heads are due
/// within `[today, today + window_days]`. All inserts commit together.
pub fn generate_reminders(conn: &Connection, today: NaiveDate, window_days: i64) -> AppResult<SweepOutcome> {
    let horizon = today + ChronoDuration::days(window_days);
    let overdue = due_heads(conn, "due_date < ?1", params![today])?;
    let upcoming = due_heads(conn, "due_date BETWEEN ?1 AND ?2", params![today, horizon])?;

    let tx = conn.unchecked_transaction()?;
    let mut logged: HashSet<(String, String)> = {
        let mut stmt =
            tx.prepare("SELECT student_id, reminder_type FROM reminder_logs WHERE reminder_day = ?")?;
        let rows = stmt
            .query_map([today], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())?;
        rows
    };

    let mut outcome = SweepOutcome {
        swept_on: today,
        overdue_heads: overdue.len(),
        upcoming_heads: upcoming.len(),
        created: 0,
        skipped_existing: 0,
    };

    let now = now_ts();
    let batches = [
        (ReminderKind::FeeOverdue, &overdue),
        (ReminderKind::FeeUpcoming, &upcoming),
    ];
    for (kind, heads) in batches {
        for head in heads.iter() {
            let paid = fully_paid_students(&tx, head)?;
            let message = message_for(kind, head);
            for student_id in candidate_students(&tx, head)? {
                if paid.contains(&student_id) {
                    continue;
                }
                let key = (student_id, kind.as_str().to_string());
                if logged.contains(&key) {
                    outcome.skipped_existing += 1;
                    continue;
                }
                tx.execute(
                    "INSERT INTO reminder_logs(id, student_id, fee_head_id, reminder_type, reminder_day,
                                               message, is_sent, created_at)
                     VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
                    params![new_id(), key.0, head.id, key.1, today, message, now],
                )?;
                logged.insert(key);
                outcome.created += 1;
            }
        }
    }
    tx.commit()?;

    info!(
        "event=reminder_sweep module=reminders status=ok day={} overdue_heads={} upcoming_heads={} created={} skipped={}",
        today, outcome.overdue_heads, outcome.upcoming_heads, outcome.created, outcome.skipped_existing
    );
    Ok(outcome)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderLogView {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub admission_number: String,
    pub fee_head_id: Option<String>,
    pub reminder_type: String,
    pub reminder_day: NaiveDate,
    pub message: String,
    pub created_at: String,
}

/// Unsent reminders, newest first.
pub fn pending_reminders(conn: &Connection, limit: usize) -> AppResult<Vec<ReminderLogView>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.student_id, s.first_name || ' ' || s.last_name, s.admission_number,
                r.fee_head_id, r.reminder_type, r.reminder_day, r.message, r.created_at
         FROM reminder_logs r
         JOIN students s ON s.id = r.student_id
         WHERE r.is_sent = 0
         ORDER BY r.created_at DESC, r.reminder_day DESC, s.admission_number
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(ReminderLogView {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                admission_number: r.get(3)?,
                fee_head_id: r.get(4)?,
                reminder_type: r.get(5)?,
                reminder_day: r.get(6)?,
                message: r.get(7)?,
                created_at: r.get(8)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

/// Marks reminders as delivered. Returns how many rows changed state.
pub fn mark_sent(conn: &Connection, ids: &[String]) -> AppResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let now = now_ts();
    let mut changed = 0usize;
    for id in ids {
        changed += tx.execute(
            "UPDATE reminder_logs SET is_sent = 1, sent_at = ? WHERE id = ? AND is_sent = 0",
            params![now, id],
        )?;
    }
    tx.commit()?;
    Ok(changed)
}

// ------------------------------------------------------------ scheduling

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub finished_at: String,
    pub outcome: Option<SweepOutcome>,
    pub error: Option<String>,
}

/// Shared between the scheduler thread and request handlers so that only
/// one sweep runs at a time.
#[derive(Debug, Default)]
pub struct SweepState {
    running: AtomicBool,
    last: Mutex<Option<LastRun>>,
}

pub struct SweepPermit<'a> {
    state: &'a SweepState,
}

impl Drop for SweepPermit<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
    }
}

impl SweepState {
    /// Claims the sweep slot, or `None` when a sweep is already running.
    pub fn try_begin(&self) -> Option<SweepPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepPermit { state: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_run(&self) -> Option<LastRun> {
        self.last.lock().ok().and_then(|g| g.clone())
    }

    fn record(&self, run: LastRun) {
        if let Ok(mut g) = self.last.lock() {
            *g = Some(run);
        }
    }
}

/// Runs a sweep unless one is already in flight. `Ok(None)` means skipped.
pub fn run_guarded(
    state: &SweepState,
    conn: &Connection,
    today: NaiveDate,
    window_days: i64,
) -> AppResult<Option<SweepOutcome>> {
    let Some(_permit) = state.try_begin() else {
        info!("event=reminder_sweep module=reminders status=skipped reason=in_progress");
        return Ok(None);
    };
    match generate_reminders(conn, today, window_days) {
        Ok(outcome) => {
            state.record(LastRun {
                finished_at: now_ts(),
                outcome: Some(outcome.clone()),
                error: None,
            });
            Ok(Some(outcome))
        }
        Err(e) => {
            state.record(LastRun {
                finished_at: now_ts(),
                outcome: None,
                error: Some(e.to_string()),
            });
            Err(e)
        }
    }
}

/// Background thread running the sweep every `interval_seconds`.
///
/// Dropping the scheduler signals the thread and waits for it; the wait
/// between runs is interrupted immediately.
pub struct ReminderScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReminderScheduler {
    pub fn start(
        workspace: PathBuf,
        settings: ReminderSettings,
        state: Arc<SweepState>,
    ) -> AppResult<ReminderScheduler> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = Duration::from_secs(settings.interval_seconds);
        let window = settings.upcoming_window_days;

        let handle = std::thread::Builder::new()
            .name("reminder-sweep".to_string())
            .spawn(move || {
                let conn = match db::connect(&workspace) {
                    Ok(c) => c,
                    Err(e) => {
                        error!(
                            "event=reminder_scheduler module=reminders status=error reason=connect error={e:#}"
                        );
                        return;
                    }
                };
                info!(
                    "event=reminder_scheduler module=reminders status=started interval_secs={}",
                    interval.as_secs()
                );
                loop {
                    match run_guarded(&state, &conn, db::today(), window) {
                        Ok(_) => {}
                        Err(e) => warn!(
                            "event=reminder_sweep module=reminders status=error code={} error={}",
                            e.code(),
                            e
                        ),
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("event=reminder_scheduler module=reminders status=stopped");
            })
            .map_err(AppError::Io)?;

        Ok(ReminderScheduler {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("event=reminder_scheduler module=reminders status=error reason=thread_panicked");
            }
        }
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
