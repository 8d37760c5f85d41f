use crate::db::{new_id, now_ts, today};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    constraint_conflict, ensure_exists, optional_bool, optional_date, optional_str, required_str,
    respond, scoped,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

struct TeacherInput {
    employee_id: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
    specialization: Option<String>,
    qualification: Option<String>,
    joining_date: NaiveDate,
    user_id: Option<String>,
}

fn teacher_input(params: &Value) -> AppResult<TeacherInput> {
    Ok(TeacherInput {
        employee_id: required_str(params, "employeeId")?,
        first_name: required_str(params, "firstName")?,
        last_name: required_str(params, "lastName")?,
        email: optional_str(params, "email"),
        phone: optional_str(params, "phone"),
        specialization: optional_str(params, "specialization"),
        qualification: optional_str(params, "qualification"),
        joining_date: optional_date(params, "joiningDate")?.unwrap_or_else(today),
        user_id: optional_str(params, "userId"),
    })
}

const TEACHER_COLUMNS: &str = "id, employee_id, first_name, last_name, email, phone,
    specialization, qualification, joining_date, user_id, is_active";

fn teacher_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "employeeId": r.get::<_, String>(1)?,
        "firstName": r.get::<_, String>(2)?,
        "lastName": r.get::<_, String>(3)?,
        "email": r.get::<_, Option<String>>(4)?,
        "phone": r.get::<_, Option<String>>(5)?,
        "specialization": r.get::<_, Option<String>>(6)?,
        "qualification": r.get::<_, Option<String>>(7)?,
        "joiningDate": r.get::<_, String>(8)?,
        "userId": r.get::<_, Option<String>>(9)?,
        "isActive": r.get::<_, i64>(10)? != 0,
    }))
}

fn teacher_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(
        &format!("SELECT {TEACHER_COLUMNS} FROM teachers WHERE id = ?"),
        [id],
        teacher_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("teacher not found"))
}

fn teachers_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let include_inactive = optional_bool(&req.params, "includeInactive")?.unwrap_or(false);
    let mut stmt = conn.prepare(&format!(
        "SELECT {TEACHER_COLUMNS} FROM teachers
         WHERE is_active = 1 OR ?
         ORDER BY last_name, first_name"
    ))?;
    let teachers = stmt
        .query_map([include_inactive], teacher_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "teachers": teachers }))
}

fn teachers_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let t = teacher_input(&req.params)?;
    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO teachers(id, employee_id, first_name, last_name, email, phone, specialization,
                              qualification, joining_date, user_id, is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![
            id,
            t.employee_id,
            t.first_name,
            t.last_name,
            t.email,
            t.phone,
            t.specialization,
            t.qualification,
            t.joining_date,
            t.user_id,
            now,
            now
        ],
    )
    .map_err(|e| constraint_conflict(e, "employeeId", "employee id already in use"))?;
    Ok(json!({ "teacher": teacher_json(conn, &id)? }))
}

fn teachers_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "teacherId")?;
    ensure_exists(conn, "teachers", &id, "teacher")?;
    let t = teacher_input(&req.params)?;
    conn.execute(
        "UPDATE teachers SET employee_id = ?, first_name = ?, last_name = ?, email = ?, phone = ?,
                specialization = ?, qualification = ?, joining_date = ?, user_id = ?, updated_at = ?
         WHERE id = ?",
        params![
            t.employee_id,
            t.first_name,
            t.last_name,
            t.email,
            t.phone,
            t.specialization,
            t.qualification,
            t.joining_date,
            t.user_id,
            now_ts(),
            id
        ],
    )
    .map_err(|e| constraint_conflict(e, "employeeId", "employee id already in use"))?;
    Ok(json!({ "teacher": teacher_json(conn, &id)? }))
}

fn teachers_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "teacherId")?;
    ensure_exists(conn, "teachers", &id, "teacher")?;
    conn.execute(
        "UPDATE teachers SET is_active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), id],
    )?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "teachers.list" => teachers_list(state, req),
        "teachers.create" => teachers_create(state, req),
        "teachers.update" => teachers_update(state, req),
        "teachers.delete" => teachers_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
