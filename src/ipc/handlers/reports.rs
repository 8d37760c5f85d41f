use crate::auth::AccessScope;
use crate::calc;
use crate::db::today;
use crate::error::{AppError, AppResult};
use crate::grading::{self, mean, rate, round_1, round_2};
use crate::ipc::handlers::fees::payment_json;
use crate::ipc::helpers::{
    ensure_exists, optional_date, optional_i64, optional_str, required_str, respond, scoped,
    year_scope,
};
use crate::ipc::types::{AppState, Request};
use crate::years::{self, AcademicYear};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;

fn reports_overview(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let year = year_scope(conn, &req.params)?;
    let as_of = optional_date(&req.params, "asOf")?.unwrap_or_else(today);
    Ok(json!(calc::overview(conn, &year, as_of)?))
}

/// Present/total attendance records for one student inside the year.
fn student_attendance(conn: &Connection, student_id: &str, year: &AcademicYear) -> AppResult<(i64, i64)> {
    Ok(conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_present), 0) FROM attendance_records
         WHERE student_id = ? AND date BETWEEN ? AND ?",
        params![student_id, year.start_date, year.end_date],
        |r| Ok((r.get(1)?, r.get(0)?)),
    )?)
}

fn student_card(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    // Students may omit the id and get their own card.
    let student_id = match (optional_str(&req.params, "studentId"), scope.student_id()) {
        (Some(id), _) => id,
        (None, Some(own)) => own.to_string(),
        (None, None) => required_str(&req.params, "studentId")?,
    };
    scope.require_student_access(&student_id)?;
    let year = year_scope(conn, &req.params)?;

    let student = conn
        .query_row(
            "SELECT first_name || ' ' || last_name, admission_number FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "id": student_id,
                    "name": r.get::<_, String>(0)?,
                    "admissionNumber": r.get::<_, String>(1)?,
                }))
            },
        )
        .optional()?
        .ok_or_else(|| AppError::not_found("student not found"))?;
    let class = conn
        .query_row(
            "SELECT cs.class_name, cs.section, e.roll_number
             FROM enrollments e JOIN class_sections cs ON cs.id = e.class_section_id
             WHERE e.student_id = ? AND e.academic_year_id = ? AND e.is_active = 1
             ORDER BY e.created_at LIMIT 1",
            params![student_id, year.id],
            |r| {
                Ok(json!({
                    "className": r.get::<_, String>(0)?,
                    "section": r.get::<_, String>(1)?,
                    "rollNumber": r.get::<_, i64>(2)?,
                }))
            },
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT x.name, x.exam_date, c.name, c.credits, m.marks_obtained, x.total_marks,
                m.grade_point, m.letter_grade
         FROM mark_entries m
         JOIN exams x ON x.id = m.exam_id
         JOIN courses c ON c.id = m.course_id
         WHERE m.student_id = ? AND x.exam_date BETWEEN ? AND ?
         ORDER BY x.exam_date, c.name",
    )?;
    let rows = stmt
        .query_map(params![student_id, year.start_date, year.end_date], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, NaiveDate>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, f64>(5)?,
                r.get::<_, Option<f64>>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut points = Vec::with_capacity(rows.len());
    let mut weighted = Vec::with_capacity(rows.len());
    let mut subjects = Vec::with_capacity(rows.len());
    for (exam, exam_date, course, credits, marks, total, gp, letter) in rows {
        let fallback = grading::get_grade(marks, total);
        let gp = gp.unwrap_or(fallback.grade_point);
        points.push(gp);
        weighted.push((gp, credits));
        subjects.push(json!({
            "examName": exam,
            "examDate": exam_date,
            "courseName": course,
            "credits": credits,
            "marksObtained": marks,
            "totalMarks": total,
            "percentage": round_1(grading::percentage(marks, total)),
            "gradePoint": gp,
            "letterGrade": letter.unwrap_or_else(|| fallback.letter.to_string()),
        }));
    }
    let gpa = mean(&points).map(round_2);
    let (present, total) = student_attendance(conn, &student_id, &year)?;
    let result = match gpa {
        Some(g) if grading::is_pass(g) => "PASS",
        Some(_) => "FAIL",
        None => "NOT_EVALUATED",
    };

    Ok(json!({
        "student": student,
        "class": class,
        "academicYear": year,
        "subjects": subjects,
        "gpa": gpa,
        "weightedGpa": gpa.map(|_| grading::calculate_weighted_gpa(&weighted)),
        "grade": gpa.map(grading::letter_for_grade_point),
        "attendance": {
            "present": present,
            "total": total,
            "percentage": rate(present as f64, total as f64),
        },
        "result": result,
    }))
}

fn fee_receipt(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    let payment_id = required_str(&req.params, "paymentId")?;
    let payment = payment_json(conn, &payment_id)?;
    let owner = payment
        .get("studentId")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    scope.require_student_access(owner)?;
    Ok(json!({ "receipt": payment, "issuedOn": today() }))
}

fn month_bounds(year: i64, month: i64) -> AppResult<(NaiveDate, NaiveDate)> {
    if !(2000..=2100).contains(&year) {
        return Err(AppError::invalid("year", "year must be between 2000 and 2100"));
    }
    if !(1..=12).contains(&month) {
        return Err(AppError::invalid("month", "month must be between 1 and 12"));
    }
    let first = NaiveDate::from_ymd_opt(year as i32, month as u32, 1)
        .ok_or_else(|| AppError::invalid("month", "invalid month"))?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year as i32 + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year as i32, month as u32 + 1, 1)
    }
    .and_then(|d| d.pred_opt())
    .ok_or_else(|| AppError::invalid("month", "invalid month"))?;
    Ok((first, next))
}

fn attendance_month(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let class_id = required_str(&req.params, "classSectionId")?;
    ensure_exists(conn, "class_sections", &class_id, "class section")?;
    let cal_year =
        optional_i64(&req.params, "year")?.ok_or_else(|| AppError::bad_params("missing year"))?;
    let month =
        optional_i64(&req.params, "month")?.ok_or_else(|| AppError::bad_params("missing month"))?;
    let (first, last) = month_bounds(cal_year, month)?;
    let academic_year = years::get_active_year(conn)?;

    let recorded_days: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT date) FROM attendance_records
         WHERE class_section_id = ? AND date BETWEEN ? AND ?",
        params![class_id, first, last],
        |r| r.get(0),
    )?;
    let working_days = recorded_days.max(1);

    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name || ' ' || s.last_name, e.roll_number,
                COALESCE(SUM(CASE WHEN a.is_present = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.is_present = 0 THEN 1 ELSE 0 END), 0)
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         LEFT JOIN attendance_records a
           ON a.student_id = s.id AND a.class_section_id = e.class_section_id
          AND a.date BETWEEN ?3 AND ?4
         WHERE e.class_section_id = ?1 AND e.academic_year_id = ?2 AND e.is_active = 1
         GROUP BY s.id, e.roll_number
         ORDER BY e.roll_number",
    )?;
    let year_id = academic_year.as_ref().map(|y| y.id.clone());
    let students = stmt
        .query_map(params![class_id, year_id, first, last], |r| {
            let present: i64 = r.get(3)?;
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "rollNumber": r.get::<_, i64>(2)?,
                "present": present,
                "absent": r.get::<_, i64>(4)?,
                "percentage": rate(present as f64, working_days as f64),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({
        "classSectionId": class_id,
        "year": cal_year,
        "month": month,
        "workingDays": working_days,
        "students": students,
    }))
}

fn class_result(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let exam_id = required_str(&req.params, "examId")?;
    let exam = conn
        .query_row(
            "SELECT x.name, x.exam_date, x.total_marks, c.name
             FROM exams x JOIN courses c ON c.id = x.course_id WHERE x.id = ?",
            [&exam_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, NaiveDate>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| AppError::not_found("exam not found"))?;
    let class_id = optional_str(&req.params, "classSectionId");

    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name || ' ' || s.last_name, m.marks_obtained, m.grade_point
         FROM mark_entries m JOIN students s ON s.id = m.student_id
         WHERE m.exam_id = ?1
           AND (?2 IS NULL OR EXISTS (
                SELECT 1 FROM enrollments e
                WHERE e.student_id = s.id AND e.class_section_id = ?2 AND e.is_active = 1))
         ORDER BY m.marks_obtained DESC, s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map(params![exam_id, class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let (name, exam_date, total_marks, course) = exam;
    let marks: Vec<f64> = rows.iter().map(|r| r.2).collect();
    let points: Vec<f64> = rows
        .iter()
        .map(|(_, _, m, gp)| gp.unwrap_or_else(|| grading::get_grade(*m, total_marks).grade_point))
        .collect();
    let passed = points.iter().filter(|gp| grading::is_pass(**gp)).count();
    let students: Vec<Value> = rows
        .iter()
        .zip(&points)
        .enumerate()
        .map(|(i, ((id, student_name, m, _), gp))| {
            json!({
                "rank": i + 1,
                "studentId": id,
                "studentName": student_name,
                "marksObtained": m,
                "gradePoint": gp,
                "letterGrade": grading::letter_for_grade_point(*gp),
                "pass": grading::is_pass(*gp),
            })
        })
        .collect();

    Ok(json!({
        "examId": exam_id,
        "examName": name,
        "examDate": exam_date,
        "courseName": course,
        "totalMarks": total_marks,
        "classSectionId": class_id,
        "entries": rows.len(),
        "average": mean(&marks).map(round_1),
        "highest": marks.iter().copied().reduce(f64::max),
        "lowest": marks.iter().copied().reduce(f64::min),
        "passRate": rate(passed as f64, rows.len() as f64),
        "averageGpa": mean(&points).map(round_2),
        "students": students,
    }))
}

fn count(conn: &Connection, sql: &str) -> AppResult<i64> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

fn dashboard(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    let year = years::get_active_year(conn)?;
    let on = today();

    if let AccessScope::Student { student_id } = &scope {
        let attendance = match &year {
            Some(y) => {
                let (present, total) = student_attendance(conn, student_id, y)?;
                if total == 0 {
                    100.0
                } else {
                    rate(present as f64, total as f64)
                }
            }
            None => 100.0,
        };
        let fees_paid: Option<f64> = match &year {
            Some(y) => Some(conn.query_row(
                "SELECT COALESCE(SUM(p.amount_paid), 0.0)
                 FROM fee_payments p
                 JOIN fee_heads h ON h.id = p.fee_head_id
                 WHERE p.student_id = ? AND p.status = 'Completed' AND h.academic_year_id = ?",
                params![student_id, y.id],
                |r| r.get(0),
            )?),
            None => None,
        };
        let enrolled: HashSet<String> = match &year {
            Some(y) => calc::enrolled_students(conn, y)?.into_keys().collect(),
            None => HashSet::new(),
        };
        return Ok(json!({
            "view": "student",
            "studentId": student_id,
            "academicYear": year,
            "enrolled": enrolled.contains(student_id),
            "attendancePercentage": attendance,
            "feesPaid": fees_paid.map(round_2),
        }));
    }

    let (attendance_rate, fees_collected, fees_overdue) = match &year {
        Some(y) => {
            let att = calc::attendance_summary(conn, y)?;
            let fees = calc::fee_summary(conn, y, on)?;
            (
                Some(att.overall_rate),
                Some(fees.total_collected),
                Some(fees.total_overdue),
            )
        }
        None => (None, None, None),
    };
    Ok(json!({
        "view": if scope.is_admin() { "admin" } else { "teacher" },
        "academicYear": year,
        "asOf": on,
        "activeStudents": count(conn, "SELECT COUNT(*) FROM students WHERE is_active = 1")?,
        "activeTeachers": count(conn, "SELECT COUNT(*) FROM teachers WHERE is_active = 1")?,
        "classSections": count(conn, "SELECT COUNT(*) FROM class_sections")?,
        "attendanceRate": attendance_rate,
        "feesCollected": fees_collected,
        "feesOverdue": fees_overdue,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "reports.overview" => reports_overview(state, req),
        "reports.studentCard" => student_card(state, req),
        "reports.feeReceipt" => fee_receipt(state, req),
        "reports.attendanceMonth" => attendance_month(state, req),
        "reports.classResult" => class_result(state, req),
        "dashboard.get" => dashboard(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
