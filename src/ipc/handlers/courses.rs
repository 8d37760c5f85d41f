use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    constraint_conflict, ensure_exists, optional_i64, optional_str, required_str, respond, scoped,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

struct CourseInput {
    name: String,
    code: Option<String>,
    credits: i64,
    teacher_id: Option<String>,
}

fn course_input(conn: &Connection, params: &Value) -> AppResult<CourseInput> {
    let credits = optional_i64(params, "credits")?.unwrap_or(1);
    if credits < 1 {
        return Err(AppError::invalid("credits", "credits must be at least 1"));
    }
    let teacher_id = optional_str(params, "teacherId");
    if let Some(t) = teacher_id.as_deref() {
        ensure_exists(conn, "teachers", t, "teacher")?;
    }
    Ok(CourseInput {
        name: required_str(params, "name")?,
        code: optional_str(params, "code"),
        credits,
        teacher_id,
    })
}

fn course_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(
        "SELECT c.id, c.name, c.code, c.credits, c.teacher_id,
                t.first_name || ' ' || t.last_name
         FROM courses c LEFT JOIN teachers t ON t.id = c.teacher_id
         WHERE c.id = ?",
        [id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
                "credits": r.get::<_, i64>(3)?,
                "teacherId": r.get::<_, Option<String>>(4)?,
                "teacherName": r.get::<_, Option<String>>(5)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("course not found"))
}

fn courses_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.code, c.credits, c.teacher_id,
                t.first_name || ' ' || t.last_name,
                (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id AND e.is_active = 1)
         FROM courses c LEFT JOIN teachers t ON t.id = c.teacher_id
         ORDER BY c.name",
    )?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "code": r.get::<_, Option<String>>(2)?,
                "credits": r.get::<_, i64>(3)?,
                "teacherId": r.get::<_, Option<String>>(4)?,
                "teacherName": r.get::<_, Option<String>>(5)?,
                "enrolledCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "courses": courses }))
}

fn courses_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let input = course_input(conn, &req.params)?;
    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO courses(id, name, code, credits, teacher_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![id, input.name, input.code, input.credits, input.teacher_id, now, now],
    )
    .map_err(|e| constraint_conflict(e, "code", "a course with this code already exists"))?;
    Ok(json!({ "course": course_json(conn, &id)? }))
}

fn courses_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "courseId")?;
    ensure_exists(conn, "courses", &id, "course")?;
    let input = course_input(conn, &req.params)?;
    conn.execute(
        "UPDATE courses SET name = ?, code = ?, credits = ?, teacher_id = ?, updated_at = ?
         WHERE id = ?",
        params![input.name, input.code, input.credits, input.teacher_id, now_ts(), id],
    )
    .map_err(|e| constraint_conflict(e, "code", "a course with this code already exists"))?;
    Ok(json!({ "course": course_json(conn, &id)? }))
}

fn courses_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "courseId")?;
    ensure_exists(conn, "courses", &id, "course")?;
    let active: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = ? AND is_active = 1",
        [&id],
        |r| r.get(0),
    )?;
    if active > 0 {
        return Err(AppError::conflict(
            "courseId",
            format!("cannot delete: {active} active enrollment(s) use this course"),
        ));
    }
    conn.execute("DELETE FROM courses WHERE id = ?", [&id])
        .map_err(|e| {
            constraint_conflict(e, "courseId", "cannot delete: course has exams or history")
        })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "courses.list" => courses_list(state, req),
        "courses.create" => courses_create(state, req),
        "courses.update" => courses_update(state, req),
        "courses.delete" => courses_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
