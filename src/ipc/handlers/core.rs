use crate::config::Config;
use crate::db;
use crate::error::AppResult;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::reminders::ReminderScheduler;
use log::{error, info};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "remindersEnabled": state.config.reminders.enabled,
        }),
    )
}

/// Opens `path` as the current workspace, replacing any open one, and starts
/// the reminder scheduler when the workspace config enables it.
pub fn open_workspace(state: &mut AppState, path: &Path) -> Result<serde_json::Value, (&'static str, String)> {
    let config = Config::load(path).map_err(|e| (e.code(), e.to_string()))?;
    state.close_workspace();
    let conn = db::open_db(path).map_err(|e| ("db_open_failed", format!("{e:#}")))?;

    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.config = config.clone();
    info!(
        "event=workspace_open module=ipc status=ok path={} reminders_enabled={}",
        path.display(),
        config.reminders.enabled
    );

    if config.reminders.enabled {
        match ReminderScheduler::start(
            path.to_path_buf(),
            config.reminders.clone(),
            state.sweep.clone(),
        ) {
            Ok(s) => state.scheduler = Some(s),
            Err(e) => error!(
                "event=reminder_scheduler module=ipc status=error reason=start error={}",
                e
            ),
        }
    }

    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "remindersEnabled": config.reminders.enabled,
        "schedulerRunning": state.scheduler.is_some(),
    }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path: AppResult<PathBuf> = required_str(&req.params, "path").map(PathBuf::from);
    let path = match path {
        Ok(p) => p,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };
    match open_workspace(state, &path) {
        Ok(v) => ok(&req.id, v),
        Err((code, message)) => err(&req.id, code, message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
