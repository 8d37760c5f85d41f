use crate::db::today;
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{optional_date, optional_i64, respond, scoped, string_list};
use crate::ipc::types::{AppState, Request};
use crate::reminders;
use serde_json::{json, Value};

const DEFAULT_PENDING_LIMIT: i64 = 100;
const MAX_PENDING_LIMIT: i64 = 1000;

fn reminders_generate(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let as_of = optional_date(&req.params, "asOf")?.unwrap_or_else(today);
    let window = state.config.reminders.upcoming_window_days;
    match reminders::run_guarded(&state.sweep, conn, as_of, window)? {
        Some(outcome) => Ok(json!({ "ran": true, "outcome": outcome })),
        None => Ok(json!({ "ran": false, "reason": "sweep_in_progress" })),
    }
}

fn reminders_pending(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let limit = optional_i64(&req.params, "limit")?.unwrap_or(DEFAULT_PENDING_LIMIT);
    if !(1..=MAX_PENDING_LIMIT).contains(&limit) {
        return Err(AppError::invalid(
            "limit",
            format!("limit must be between 1 and {}", MAX_PENDING_LIMIT),
        ));
    }
    let pending = reminders::pending_reminders(conn, limit as usize)?;
    Ok(json!({ "reminders": pending }))
}

fn reminders_mark_sent(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let ids = string_list(&req.params, "ids")?;
    let updated = reminders::mark_sent(conn, &ids)?;
    Ok(json!({ "updated": updated }))
}

fn reminders_status(state: &AppState, req: &Request) -> AppResult<Value> {
    let (_, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let settings = &state.config.reminders;
    Ok(json!({
        "enabled": settings.enabled,
        "intervalSeconds": settings.interval_seconds,
        "upcomingWindowDays": settings.upcoming_window_days,
        "schedulerRunning": state.scheduler.as_ref().map(|s| s.is_alive()).unwrap_or(false),
        "sweepInProgress": state.sweep.is_running(),
        "lastRun": state.sweep.last_run(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "reminders.generate" => reminders_generate(state, req),
        "reminders.pending" => reminders_pending(state, req),
        "reminders.markSent" => reminders_mark_sent(state, req),
        "reminders.status" => reminders_status(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
