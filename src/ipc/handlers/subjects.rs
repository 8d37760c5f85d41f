use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{ensure_exists, optional_i64, optional_str, required_str, respond, scoped};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const MAX_NAME_LEN: usize = 200;
const MAX_CODE_LEN: usize = 20;

struct SubjectInput {
    standard: i64,
    name: String,
    code: Option<String>,
    teacher_id: Option<String>,
}

fn validate_standard(standard: i64) -> AppResult<i64> {
    if !(1..=12).contains(&standard) {
        return Err(AppError::invalid("standard", "standard must be between 1 and 12"));
    }
    Ok(standard)
}

fn subject_input(conn: &Connection, params: &Value) -> AppResult<SubjectInput> {
    let standard = optional_i64(params, "standard")?
        .ok_or_else(|| AppError::bad_params("missing standard"))
        .and_then(validate_standard)?;
    let name = required_str(params, "name")?;
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::invalid("name", "name must be at most 200 characters"));
    }
    let code = optional_str(params, "code");
    if code.as_deref().is_some_and(|c| c.chars().count() > MAX_CODE_LEN) {
        return Err(AppError::invalid("code", "code must be at most 20 characters"));
    }
    let teacher_id = optional_str(params, "teacherId");
    if let Some(t) = teacher_id.as_deref() {
        let active: Option<i64> = conn
            .query_row("SELECT is_active FROM teachers WHERE id = ?", [t], |r| r.get(0))
            .optional()?;
        match active {
            None => return Err(AppError::not_found("teacher not found")),
            Some(0) => {
                return Err(AppError::invalid(
                    "teacherId",
                    "cannot assign an inactive teacher",
                ))
            }
            Some(_) => {}
        }
    }
    Ok(SubjectInput {
        standard,
        name,
        code,
        teacher_id,
    })
}

const SUBJECT_SELECT: &str = "SELECT s.id, s.standard, s.name, s.code, s.teacher_id,
        t.first_name || ' ' || t.last_name
     FROM subjects s LEFT JOIN teachers t ON t.id = s.teacher_id";

fn subject_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "standard": r.get::<_, i64>(1)?,
        "name": r.get::<_, String>(2)?,
        "code": r.get::<_, Option<String>>(3)?,
        "teacherId": r.get::<_, Option<String>>(4)?,
        "teacherName": r.get::<_, Option<String>>(5)?,
    }))
}

fn subject_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(&format!("{SUBJECT_SELECT} WHERE s.id = ?"), [id], subject_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("subject not found"))
}

/// Subjects ordered by standard then name, plus every standard in use so the
/// caller can offer a filter.
fn subjects_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let standard = optional_i64(&req.params, "standard")?
        .map(validate_standard)
        .transpose()?;
    let search = optional_str(&req.params, "search")
        .map(|s| format!("%{}%", s.to_lowercase()))
        .unwrap_or_default();

    let mut stmt = conn.prepare(&format!(
        "{SUBJECT_SELECT}
         WHERE (?1 IS NULL OR s.standard = ?1)
           AND (?2 = '' OR lower(s.name) LIKE ?2 OR lower(COALESCE(s.code, '')) LIKE ?2)
         ORDER BY s.standard, s.name"
    ))?;
    let subjects = stmt
        .query_map(params![standard, search], subject_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut stmt = conn.prepare("SELECT DISTINCT standard FROM subjects ORDER BY standard")?;
    let standards = stmt
        .query_map([], |r| r.get::<_, i64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "subjects": subjects, "standards": standards }))
}

fn subjects_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let input = subject_input(conn, &req.params)?;
    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO subjects(id, standard, name, code, teacher_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![id, input.standard, input.name, input.code, input.teacher_id, now, now],
    )?;
    Ok(json!({ "subject": subject_json(conn, &id)? }))
}

fn subjects_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "subjectId")?;
    ensure_exists(conn, "subjects", &id, "subject")?;
    let input = subject_input(conn, &req.params)?;
    conn.execute(
        "UPDATE subjects SET standard = ?, name = ?, code = ?, teacher_id = ?, updated_at = ?
         WHERE id = ?",
        params![input.standard, input.name, input.code, input.teacher_id, now_ts(), id],
    )?;
    Ok(json!({ "subject": subject_json(conn, &id)? }))
}

fn subjects_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "subjectId")?;
    ensure_exists(conn, "subjects", &id, "subject")?;
    conn.execute("DELETE FROM subjects WHERE id = ?", [&id])?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "subjects.list" => subjects_list(state, req),
        "subjects.create" => subjects_create(state, req),
        "subjects.update" => subjects_update(state, req),
        "subjects.delete" => subjects_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
