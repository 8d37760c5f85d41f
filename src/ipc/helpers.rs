use crate::auth::{resolve_scope, AccessScope};
use crate::error::{AppError, AppResult};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::years::{self, AcademicYear};
use chrono::NaiveDate;
use log::{debug, warn};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde_json::Value;

/// Turns a handler result into the response envelope.
pub fn respond(req: &Request, result: AppResult<Value>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            match &e {
                AppError::Db(_) | AppError::Io(_) | AppError::Internal(_) => warn!(
                    "event=request_failed module=ipc method={} code={} error={}",
                    req.method,
                    e.code(),
                    e
                ),
                _ => debug!(
                    "event=request_rejected module=ipc method={} code={}",
                    req.method,
                    e.code()
                ),
            }
            err(&req.id, e.code(), e.to_string(), e.details())
        }
    }
}

pub fn db_conn(state: &AppState) -> AppResult<&Connection> {
    state.db.as_ref().ok_or(AppError::NoWorkspace)
}

/// Connection plus the caller's access scope.
pub fn scoped<'a>(state: &'a AppState, req: &Request) -> AppResult<(&'a Connection, AccessScope)> {
    let conn = db_conn(state)?;
    let scope = resolve_scope(conn, req.actor.as_ref())?;
    Ok((conn, scope))
}

pub fn required_str(params: &Value, key: &'static str) -> AppResult<String> {
    match params.get(key) {
        None | Some(Value::Null) => Err(AppError::bad_params(format!("missing {}", key))),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                Err(AppError::invalid(key, format!("{} is required", key)))
            } else {
                Ok(t.to_string())
            }
        }
        Some(_) => Err(AppError::bad_params(format!("{} must be a string", key))),
    }
}

/// Trimmed string, with empty strings treated as absent.
pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn required_f64(params: &Value, key: &'static str) -> AppResult<f64> {
    optional_f64(params, key)?.ok_or_else(|| AppError::bad_params(format!("missing {}", key)))
}

pub fn optional_f64(params: &Value, key: &'static str) -> AppResult<Option<f64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|x| x.is_finite())
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("{} must be a number", key))),
    }
}

pub fn optional_i64(params: &Value, key: &'static str) -> AppResult<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn optional_bool(params: &Value, key: &'static str) -> AppResult<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn parse_date(key: &'static str, s: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::bad_params(format!("{} must be a YYYY-MM-DD date", key)))
}

pub fn required_date(params: &Value, key: &'static str) -> AppResult<NaiveDate> {
    parse_date(key, &required_str(params, key)?)
}

pub fn optional_date(params: &Value, key: &'static str) -> AppResult<Option<NaiveDate>> {
    optional_str(params, key)
        .map(|s| parse_date(key, &s))
        .transpose()
}

pub fn required_array<'a>(params: &'a Value, key: &'static str) -> AppResult<&'a Vec<Value>> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| AppError::bad_params(format!("missing {}", key)))
}

pub fn string_list(params: &Value, key: &'static str) -> AppResult<Vec<String>> {
    required_array(params, key)?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| AppError::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

/// `academicYearId` when given, otherwise the active year.
pub fn year_scope(conn: &Connection, params: &Value) -> AppResult<AcademicYear> {
    match optional_str(params, "academicYearId") {
        Some(id) => years::get_year(conn, &id),
        None => years::require_active_year(conn),
    }
}

pub fn ensure_exists(conn: &Connection, table: &str, id: &str, what: &str) -> AppResult<()> {
    let found: Option<i64> = conn
        .query_row(&format!("SELECT 1 FROM {} WHERE id = ?", table), [id], |r| {
            r.get(0)
        })
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(AppError::not_found(format!("{} not found", what))),
    }
}

/// Maps a UNIQUE/FOREIGN KEY failure into a conflict on `field`.
pub fn constraint_conflict(e: rusqlite::Error, field: &'static str, message: &str) -> AppError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            AppError::conflict(field, message)
        }
        _ => AppError::Db(e),
    }
}
