use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    ensure_exists, required_array, required_date, required_str, respond, scoped, year_scope,
};
use crate::ipc::types::{AppState, Request};
use crate::years;
use log::{info, warn};
use rusqlite::params;
use serde_json::{json, Value};
use std::collections::HashSet;

struct AttendanceEntry {
    student_id: String,
    is_present: bool,
    remarks: Option<String>,
}

fn parse_entries(params: &Value) -> AppResult<Vec<AttendanceEntry>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (i, v) in required_array(params, "entries")?.iter().enumerate() {
        let student_id = v
            .get("studentId")
            .and_then(|s| s.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::bad_params(format!("entries[{}].studentId missing", i)))?;
        let is_present = v
            .get("isPresent")
            .and_then(|b| b.as_bool())
            .ok_or_else(|| AppError::bad_params(format!("entries[{}].isPresent missing", i)))?;
        if !seen.insert(student_id.clone()) {
            return Err(AppError::invalid(
                "entries",
                format!("student {} appears more than once", student_id),
            ));
        }
        let remarks = v
            .get("remarks")
            .and_then(|s| s.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        out.push(AttendanceEntry {
            student_id,
            is_present,
            remarks,
        });
    }
    Ok(out)
}

/// Enrolled students of a class on a day, with any saved marks. Unsaved
/// students default to present.
fn attendance_sheet(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let class_id = required_str(&req.params, "classSectionId")?;
    ensure_exists(conn, "class_sections", &class_id, "class section")?;
    let date = required_date(&req.params, "date")?;
    let year = year_scope(conn, &req.params)?;

    let mut stmt = conn.prepare(
        "SELECT e.student_id, s.first_name || ' ' || s.last_name, s.admission_number,
                e.roll_number, a.is_present, a.remarks
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN attendance_records a
           ON a.student_id = e.student_id AND a.class_section_id = e.class_section_id AND a.date = ?3
         WHERE e.class_section_id = ?1 AND e.academic_year_id = ?2 AND e.is_active = 1
         ORDER BY e.roll_number",
    )?;
    let rows = stmt
        .query_map(params![class_id, year.id, date], |r| {
            let stored: Option<i64> = r.get(4)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "admissionNumber": r.get::<_, String>(2)?,
                "rollNumber": r.get::<_, i64>(3)?,
                "isPresent": stored.map(|p| p != 0).unwrap_or(true),
                "saved": stored.is_some(),
                "remarks": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let saved = rows.iter().any(|r| r["saved"] == json!(true));
    Ok(json!({
        "classSectionId": class_id,
        "date": date,
        "alreadySaved": saved,
        "students": rows,
    }))
}

/// Replaces every record of the class for that day.
fn attendance_save(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let class_id = required_str(&req.params, "classSectionId")?;
    ensure_exists(conn, "class_sections", &class_id, "class section")?;
    let date = required_date(&req.params, "date")?;
    let entries = parse_entries(&req.params)?;
    for e in &entries {
        ensure_exists(conn, "students", &e.student_id, "student")?;
    }
    // Records outside the active year are kept but never counted by the summaries.
    if let Some(year) = years::get_active_year(conn)? {
        if !year.contains(date) {
            warn!(
                "event=attendance_outside_year module=attendance class={} date={} year={}",
                class_id, date, year.name
            );
        }
    }

    let now = now_ts();
    let tx = conn.unchecked_transaction()?;
    let replaced = tx.execute(
        "DELETE FROM attendance_records WHERE class_section_id = ? AND date = ?",
        params![class_id, date],
    )?;
    for e in &entries {
        tx.execute(
            "INSERT INTO attendance_records(id, student_id, class_section_id, date, is_present,
                                            remarks, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            params![new_id(), e.student_id, class_id, date, e.is_present, e.remarks, now, now],
        )?;
    }
    tx.commit()?;

    let present = entries.iter().filter(|e| e.is_present).count();
    info!(
        "event=attendance_saved module=attendance class={} date={} saved={} replaced={}",
        class_id,
        date,
        entries.len(),
        replaced
    );
    Ok(json!({
        "saved": entries.len(),
        "replaced": replaced,
        "present": present,
        "absent": entries.len() - present,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attendance.sheet" => attendance_sheet(state, req),
        "attendance.save" => attendance_save(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
