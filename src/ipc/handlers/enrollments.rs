use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    ensure_exists, optional_i64, optional_str, required_str, respond, scoped, year_scope,
};
use crate::ipc::types::{AppState, Request};
use crate::years;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

fn roll_number_taken(conn: &Connection, class_id: &str, year_id: &str, roll: i64, except: &str) -> AppResult<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments
             WHERE class_section_id = ? AND academic_year_id = ? AND roll_number = ? AND id <> ?",
            params![class_id, year_id, roll, except],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

/// Enrolls a student in a class section for a year.
///
/// A withdrawn enrollment for the same triple is reactivated. Without an
/// explicit roll number the next free one in the class/year is assigned.
pub fn enroll(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    year_id: &str,
    course_id: Option<&str>,
    roll_number: Option<i64>,
) -> AppResult<String> {
    let active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?;
    match active {
        None => return Err(AppError::not_found("student not found")),
        Some(0) => {
            return Err(AppError::invalid(
                "studentId",
                "cannot enroll an inactive student",
            ))
        }
        Some(_) => {}
    }
    ensure_exists(conn, "class_sections", class_id, "class section")?;
    ensure_exists(conn, "academic_years", year_id, "academic year")?;
    if let Some(c) = course_id {
        ensure_exists(conn, "courses", c, "course")?;
    }
    if let Some(r) = roll_number {
        if r < 1 {
            return Err(AppError::invalid("rollNumber", "roll number must be positive"));
        }
    }

    let existing: Option<(String, bool)> = conn
        .query_row(
            "SELECT id, is_active FROM enrollments
             WHERE student_id = ? AND class_section_id = ? AND academic_year_id = ?",
            params![student_id, class_id, year_id],
            |r| Ok((r.get(0)?, r.get::<_, i64>(1)? != 0)),
        )
        .optional()?;
    if let Some((_, true)) = existing {
        return Err(AppError::conflict(
            "studentId",
            "student is already enrolled in this class for this year",
        ));
    }
    let self_id = existing.as_ref().map(|(id, _)| id.as_str()).unwrap_or("");

    let roll = match roll_number {
        Some(r) => {
            if roll_number_taken(conn, class_id, year_id, r, self_id)? {
                return Err(AppError::conflict(
                    "rollNumber",
                    "roll number already assigned in this class",
                ));
            }
            r
        }
        None => years::next_roll_number(conn, class_id, year_id)?,
    };

    let now = now_ts();
    match existing {
        Some((id, _)) => {
            conn.execute(
                "UPDATE enrollments SET is_active = 1, course_id = ?, roll_number = ?, updated_at = ?
                 WHERE id = ?",
                params![course_id, roll, now, id],
            )?;
            Ok(id)
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO enrollments(id, student_id, class_section_id, academic_year_id, course_id,
                                         roll_number, is_active, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
                params![id, student_id, class_id, year_id, course_id, roll, now, now],
            )?;
            Ok(id)
        }
    }
}

fn enrollment_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(
        "SELECT e.id, e.student_id, s.first_name || ' ' || s.last_name, s.admission_number,
                e.class_section_id, cs.class_name, cs.section, e.academic_year_id,
                e.course_id, e.roll_number, e.is_active
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         JOIN class_sections cs ON cs.id = e.class_section_id
         WHERE e.id = ?",
        [id],
        enrollment_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("enrollment not found"))
}

fn enrollment_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "studentName": r.get::<_, String>(2)?,
        "admissionNumber": r.get::<_, String>(3)?,
        "classSectionId": r.get::<_, String>(4)?,
        "className": r.get::<_, String>(5)?,
        "section": r.get::<_, String>(6)?,
        "academicYearId": r.get::<_, String>(7)?,
        "courseId": r.get::<_, Option<String>>(8)?,
        "rollNumber": r.get::<_, i64>(9)?,
        "isActive": r.get::<_, i64>(10)? != 0,
    }))
}

fn enrollments_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let year = year_scope(conn, &req.params)?;
    let class_filter = optional_str(&req.params, "classSectionId").unwrap_or_default();
    let mut stmt = conn.prepare(
        "SELECT e.id, e.student_id, s.first_name || ' ' || s.last_name, s.admission_number,
                e.class_section_id, cs.class_name, cs.section, e.academic_year_id,
                e.course_id, e.roll_number, e.is_active
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         JOIN class_sections cs ON cs.id = e.class_section_id
         WHERE e.academic_year_id = ?1 AND e.is_active = 1
           AND (?2 = '' OR e.class_section_id = ?2)
         ORDER BY cs.class_name, cs.section, e.roll_number",
    )?;
    let rows = stmt
        .query_map(params![year.id, class_filter], enrollment_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "academicYearId": year.id, "enrollments": rows }))
}

fn enrollments_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let student_id = required_str(&req.params, "studentId")?;
    let class_id = required_str(&req.params, "classSectionId")?;
    let year = year_scope(conn, &req.params)?;
    let course_id = optional_str(&req.params, "courseId");
    let roll = optional_i64(&req.params, "rollNumber")?;
    let id = enroll(conn, &student_id, &class_id, &year.id, course_id.as_deref(), roll)?;
    Ok(json!({ "enrollment": enrollment_json(conn, &id)? }))
}

fn enrollments_withdraw(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let id = required_str(&req.params, "enrollmentId")?;
    ensure_exists(conn, "enrollments", &id, "enrollment")?;
    conn.execute(
        "UPDATE enrollments SET is_active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), id],
    )?;
    Ok(json!({ "enrollment": enrollment_json(conn, &id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "enrollments.list" => enrollments_list(state, req),
        "enrollments.create" => enrollments_create(state, req),
        "enrollments.withdraw" => enrollments_withdraw(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
