use crate::db::{new_id, now_ts, today};
use crate::error::{AppError, AppResult};
use crate::ipc::handlers::enrollments::enroll;
use crate::ipc::helpers::{
    constraint_conflict, ensure_exists, optional_bool, optional_date, optional_str, required_str,
    respond, scoped, year_scope,
};
use crate::ipc::types::{AppState, Request};
use crate::years;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

struct StudentInput {
    admission_number: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    address: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    admission_date: NaiveDate,
    user_id: Option<String>,
}

fn student_input(params: &Value) -> AppResult<StudentInput> {
    let date_of_birth = optional_date(params, "dateOfBirth")?;
    if let Some(dob) = date_of_birth {
        if dob > today() {
            return Err(AppError::invalid(
                "dateOfBirth",
                "date of birth cannot be in the future",
            ));
        }
    }
    Ok(StudentInput {
        admission_number: required_str(params, "admissionNumber")?,
        first_name: required_str(params, "firstName")?,
        last_name: required_str(params, "lastName")?,
        email: optional_str(params, "email"),
        phone: optional_str(params, "phone"),
        date_of_birth,
        gender: optional_str(params, "gender"),
        address: optional_str(params, "address"),
        guardian_name: optional_str(params, "guardianName"),
        guardian_phone: optional_str(params, "guardianPhone"),
        admission_date: optional_date(params, "admissionDate")?.unwrap_or_else(today),
        user_id: optional_str(params, "userId"),
    })
}

const STUDENT_COLUMNS: &str = "s.id, s.admission_number, s.first_name, s.last_name, s.email,
    s.phone, s.date_of_birth, s.gender, s.address, s.guardian_name, s.guardian_phone,
    s.admission_date, s.user_id, s.is_active";

fn student_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "admissionNumber": r.get::<_, String>(1)?,
        "firstName": r.get::<_, String>(2)?,
        "lastName": r.get::<_, String>(3)?,
        "email": r.get::<_, Option<String>>(4)?,
        "phone": r.get::<_, Option<String>>(5)?,
        "dateOfBirth": r.get::<_, Option<String>>(6)?,
        "gender": r.get::<_, Option<String>>(7)?,
        "address": r.get::<_, Option<String>>(8)?,
        "guardianName": r.get::<_, Option<String>>(9)?,
        "guardianPhone": r.get::<_, Option<String>>(10)?,
        "admissionDate": r.get::<_, String>(11)?,
        "userId": r.get::<_, Option<String>>(12)?,
        "isActive": r.get::<_, i64>(13)? != 0,
    }))
}

fn student_json(conn: &Connection, id: &str) -> AppResult<Value> {
    let mut student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students s WHERE s.id = ?"),
            [id],
            student_row,
        )
        .optional()?
        .ok_or_else(|| AppError::not_found("student not found"))?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.class_section_id, cs.class_name, cs.section, e.academic_year_id,
                y.name, e.roll_number, e.is_active
         FROM enrollments e
         JOIN class_sections cs ON cs.id = e.class_section_id
         JOIN academic_years y ON y.id = e.academic_year_id
         WHERE e.student_id = ?
         ORDER BY y.start_date DESC, cs.class_name",
    )?;
    let enrollments = stmt
        .query_map([id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "classSectionId": r.get::<_, String>(1)?,
                "className": r.get::<_, String>(2)?,
                "section": r.get::<_, String>(3)?,
                "academicYearId": r.get::<_, String>(4)?,
                "academicYearName": r.get::<_, String>(5)?,
                "rollNumber": r.get::<_, i64>(6)?,
                "isActive": r.get::<_, i64>(7)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    student["enrollments"] = json!(enrollments);
    Ok(student)
}

fn students_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let include_inactive = optional_bool(&req.params, "includeInactive")?.unwrap_or(false);
    let search = optional_str(&req.params, "search")
        .map(|s| format!("%{}%", s.to_lowercase()))
        .unwrap_or_default();
    let class_filter = optional_str(&req.params, "classSectionId").unwrap_or_default();
    let year_id = years::get_active_year(conn)?.map(|y| y.id).unwrap_or_default();

    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS}, cur.class_section_id, cur.roll_number
         FROM students s
         LEFT JOIN enrollments cur
           ON cur.student_id = s.id AND cur.academic_year_id = ?1 AND cur.is_active = 1
         WHERE (s.is_active = 1 OR ?2)
           AND (?3 = '' OR lower(s.first_name || ' ' || s.last_name || ' ' || s.admission_number) LIKE ?3)
           AND (?4 = '' OR cur.class_section_id = ?4)
         ORDER BY s.last_name, s.first_name, s.admission_number"
    ))?;
    let students = stmt
        .query_map(
            params![year_id, include_inactive, search, class_filter],
            |r| {
                let mut v = student_row(r)?;
                v["currentClassSectionId"] = json!(r.get::<_, Option<String>>(14)?);
                v["rollNumber"] = json!(r.get::<_, Option<i64>>(15)?);
                Ok(v)
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn students_get(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    let id = required_str(&req.params, "studentId")?;
    scope.require_student_access(&id)?;
    Ok(json!({ "student": student_json(conn, &id)? }))
}

fn students_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let s = student_input(&req.params)?;
    let class_id = optional_str(&req.params, "classSectionId");
    let year = match class_id {
        Some(_) => Some(year_scope(conn, &req.params)?),
        None => None,
    };

    let id = new_id();
    let now = now_ts();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO students(id, admission_number, first_name, last_name, email, phone,
                              date_of_birth, gender, address, guardian_name, guardian_phone,
                              admission_date, user_id, is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![
            id,
            s.admission_number,
            s.first_name,
            s.last_name,
            s.email,
            s.phone,
            s.date_of_birth,
            s.gender,
            s.address,
            s.guardian_name,
            s.guardian_phone,
            s.admission_date,
            s.user_id,
            now,
            now
        ],
    )
    .map_err(|e| constraint_conflict(e, "admissionNumber", "admission number already exists"))?;
    if let (Some(class_id), Some(year)) = (class_id.as_deref(), year.as_ref()) {
        let course_id = optional_str(&req.params, "courseId");
        enroll(&tx, &id, class_id, &year.id, course_id.as_deref(), None)?;
    }
    tx.commit()?;
    Ok(json!({ "student": student_json(conn, &id)? }))
}

fn students_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let id = required_str(&req.params, "studentId")?;
    ensure_exists(conn, "students", &id, "student")?;
    let s = student_input(&req.params)?;
    conn.execute(
        "UPDATE students SET admission_number = ?, first_name = ?, last_name = ?, email = ?,
                phone = ?, date_of_birth = ?, gender = ?, address = ?, guardian_name = ?,
                guardian_phone = ?, admission_date = ?, user_id = ?, updated_at = ?
         WHERE id = ?",
        params![
            s.admission_number,
            s.first_name,
            s.last_name,
            s.email,
            s.phone,
            s.date_of_birth,
            s.gender,
            s.address,
            s.guardian_name,
            s.guardian_phone,
            s.admission_date,
            s.user_id,
            now_ts(),
            id
        ],
    )
    .map_err(|e| constraint_conflict(e, "admissionNumber", "admission number already exists"))?;
    Ok(json!({ "student": student_json(conn, &id)? }))
}

/// Soft delete: the student and all of their enrollments become inactive.
fn students_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let id = required_str(&req.params, "studentId")?;
    ensure_exists(conn, "students", &id, "student")?;
    let now = now_ts();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE students SET is_active = 0, updated_at = ? WHERE id = ?",
        params![now, id],
    )?;
    let withdrawn = tx.execute(
        "UPDATE enrollments SET is_active = 0, updated_at = ? WHERE student_id = ? AND is_active = 1",
        params![now, id],
    )?;
    tx.commit()?;
    Ok(json!({ "ok": true, "enrollmentsWithdrawn": withdrawn }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.get" => students_get(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.delete" => students_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
