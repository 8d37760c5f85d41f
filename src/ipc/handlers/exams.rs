use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    ensure_exists, optional_f64, optional_str, required_date, required_str, respond, scoped,
};
use crate::ipc::types::{AppState, Request};
use crate::years;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

struct ExamInput {
    name: String,
    course_id: String,
    exam_date: NaiveDate,
    total_marks: f64,
    room: Option<String>,
}

fn exam_input(conn: &Connection, params: &Value) -> AppResult<ExamInput> {
    let total_marks = optional_f64(params, "totalMarks")?.unwrap_or(100.0);
    if total_marks <= 0.0 {
        return Err(AppError::invalid("totalMarks", "total marks must be greater than zero"));
    }
    let course_id = required_str(params, "courseId")?;
    ensure_exists(conn, "courses", &course_id, "course")?;
    Ok(ExamInput {
        name: required_str(params, "name")?,
        course_id,
        exam_date: required_date(params, "examDate")?,
        total_marks,
        room: optional_str(params, "room"),
    })
}

const EXAM_SELECT: &str = "SELECT x.id, x.name, x.course_id, c.name, x.exam_date, x.total_marks,
        x.room, (SELECT COUNT(*) FROM mark_entries m WHERE m.exam_id = x.id)
     FROM exams x JOIN courses c ON c.id = x.course_id";

fn exam_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "courseId": r.get::<_, String>(2)?,
        "courseName": r.get::<_, String>(3)?,
        "examDate": r.get::<_, String>(4)?,
        "totalMarks": r.get::<_, f64>(5)?,
        "room": r.get::<_, Option<String>>(6)?,
        "entryCount": r.get::<_, i64>(7)?,
    }))
}

fn exam_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(&format!("{EXAM_SELECT} WHERE x.id = ?"), [id], exam_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("exam not found"))
}

fn exams_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let course_filter = optional_str(&req.params, "courseId").unwrap_or_default();
    let year = match optional_str(&req.params, "academicYearId") {
        Some(id) => Some(years::get_year(conn, &id)?),
        None => years::get_active_year(conn)?,
    };
    let (from, to) = match &year {
        Some(y) => (y.start_date, y.end_date),
        None => (NaiveDate::MIN, NaiveDate::MAX),
    };
    let mut stmt = conn.prepare(&format!(
        "{EXAM_SELECT}
         WHERE (?1 = '' OR x.course_id = ?1)
           AND (?2 = 0 OR x.exam_date BETWEEN ?3 AND ?4)
         ORDER BY x.exam_date DESC, x.name"
    ))?;
    let exams = stmt
        .query_map(params![course_filter, year.is_some(), from, to], exam_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "exams": exams }))
}

fn exams_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let x = exam_input(conn, &req.params)?;
    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO exams(id, name, course_id, exam_date, total_marks, room, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![id, x.name, x.course_id, x.exam_date, x.total_marks, x.room, now, now],
    )?;
    Ok(json!({ "exam": exam_json(conn, &id)? }))
}

fn exams_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let id = required_str(&req.params, "examId")?;
    ensure_exists(conn, "exams", &id, "exam")?;
    let x = exam_input(conn, &req.params)?;
    let entries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mark_entries WHERE exam_id = ? AND course_id <> ?",
        params![id, x.course_id],
        |r| r.get(0),
    )?;
    if entries > 0 {
        return Err(AppError::conflict(
            "courseId",
            "cannot change the course of an exam that already has marks",
        ));
    }
    conn.execute(
        "UPDATE exams SET name = ?, course_id = ?, exam_date = ?, total_marks = ?, room = ?,
                updated_at = ?
         WHERE id = ?",
        params![x.name, x.course_id, x.exam_date, x.total_marks, x.room, now_ts(), id],
    )?;
    Ok(json!({ "exam": exam_json(conn, &id)? }))
}

/// Removes the exam together with its mark entries.
fn exams_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let id = required_str(&req.params, "examId")?;
    ensure_exists(conn, "exams", &id, "exam")?;
    let tx = conn.unchecked_transaction()?;
    let marks = tx.execute("DELETE FROM mark_entries WHERE exam_id = ?", [&id])?;
    tx.execute("DELETE FROM exams WHERE id = ?", [&id])?;
    tx.commit()?;
    Ok(json!({ "ok": true, "marksDeleted": marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "exams.list" => exams_list(state, req),
        "exams.create" => exams_create(state, req),
        "exams.update" => exams_update(state, req),
        "exams.delete" => exams_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
