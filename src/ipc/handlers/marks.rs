use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::grading::{self, mean, round_1};
use crate::ipc::helpers::{
    ensure_exists, optional_bool, optional_f64, required_array, required_f64, required_str,
    respond, scoped, year_scope,
};
use crate::ipc::types::{AppState, Request};
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;

struct ExamInfo {
    id: String,
    name: String,
    course_id: String,
    course_name: String,
    total_marks: f64,
}

fn load_exam(conn: &Connection, exam_id: &str) -> AppResult<ExamInfo> {
    conn.query_row(
        "SELECT x.id, x.name, x.course_id, c.name, x.total_marks
         FROM exams x JOIN courses c ON c.id = x.course_id
         WHERE x.id = ?",
        [exam_id],
        |r| {
            Ok(ExamInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                course_id: r.get(2)?,
                course_name: r.get(3)?,
                total_marks: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("exam not found"))
}

/// Students taking the exam's course this year plus anyone who already has
/// a mark for it.
fn marks_sheet(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let exam = load_exam(conn, &required_str(&req.params, "examId")?)?;
    let year = year_scope(conn, &req.params)?;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name || ' ' || s.last_name, s.admission_number,
                m.marks_obtained, m.letter_grade, m.grade_point, m.is_published
         FROM students s
         LEFT JOIN mark_entries m
           ON m.student_id = s.id AND m.exam_id = ?1 AND m.course_id = ?2
         WHERE m.id IS NOT NULL
            OR EXISTS (SELECT 1 FROM enrollments e
                       WHERE e.student_id = s.id AND e.course_id = ?2
                         AND e.academic_year_id = ?3 AND e.is_active = 1 AND s.is_active = 1)
         ORDER BY s.last_name, s.first_name",
    )?;
    let rows = stmt
        .query_map(params![exam.id, exam.course_id, year.id], |r| {
            let marks: Option<f64> = r.get(3)?;
            Ok((
                marks,
                json!({
                    "studentId": r.get::<_, String>(0)?,
                    "studentName": r.get::<_, String>(1)?,
                    "admissionNumber": r.get::<_, String>(2)?,
                    "marksObtained": marks,
                    "letterGrade": r.get::<_, Option<String>>(4)?,
                    "gradePoint": r.get::<_, Option<f64>>(5)?,
                    "isPublished": r.get::<_, Option<i64>>(6)?.map(|p| p != 0),
                    "saved": marks.is_some(),
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let scored: Vec<f64> = rows.iter().filter_map(|(m, _)| *m).collect();
    let students: Vec<Value> = rows.into_iter().map(|(_, v)| v).collect();
    Ok(json!({
        "examId": exam.id,
        "examName": exam.name,
        "courseId": exam.course_id,
        "courseName": exam.course_name,
        "totalMarks": exam.total_marks,
        "students": students,
        "stats": {
            "entered": scored.len(),
            "average": mean(&scored).map(round_1),
            "highest": scored.iter().copied().reduce(f64::max),
            "lowest": scored.iter().copied().reduce(f64::min),
        },
    }))
}

/// Upserts marks for an exam, grading each entry against the exam's total.
/// Saved marks become unpublished until published again.
fn marks_save(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let exam = load_exam(conn, &required_str(&req.params, "examId")?)?;
    let entries = required_array(&req.params, "entries")?;

    let mut parsed = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (i, v) in entries.iter().enumerate() {
        let student_id = v
            .get("studentId")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::bad_params(format!("entries[{}].studentId missing", i)))?;
        let marks = v
            .get("marksObtained")
            .and_then(|m| m.as_f64())
            .ok_or_else(|| AppError::bad_params(format!("entries[{}].marksObtained missing", i)))?;
        if !(0.0..=exam.total_marks).contains(&marks) {
            return Err(AppError::invalid(
                "marksObtained",
                format!("marks must be between 0 and {}", exam.total_marks),
            ));
        }
        if !seen.insert(student_id.clone()) {
            return Err(AppError::invalid(
                "entries",
                format!("student {} appears more than once", student_id),
            ));
        }
        ensure_exists(conn, "students", &student_id, "student")?;
        parsed.push((student_id, marks));
    }

    let now = now_ts();
    let tx = conn.unchecked_transaction()?;
    for (student_id, marks) in &parsed {
        let grade = grading::get_grade(*marks, exam.total_marks);
        tx.execute(
            "INSERT INTO mark_entries(id, student_id, exam_id, course_id, marks_obtained, grade_point,
                                      letter_grade, is_published, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)
             ON CONFLICT(student_id, exam_id, course_id) DO UPDATE SET
                marks_obtained = excluded.marks_obtained,
                grade_point = excluded.grade_point,
                letter_grade = excluded.letter_grade,
                is_published = 0,
                updated_at = excluded.updated_at",
            params![
                new_id(),
                student_id,
                exam.id,
                exam.course_id,
                marks,
                grade.grade_point,
                grade.letter,
                now
            ],
        )?;
    }
    tx.commit()?;
    info!(
        "event=marks_saved module=marks exam={} entries={}",
        exam.id,
        parsed.len()
    );
    Ok(json!({ "saved": parsed.len() }))
}

fn marks_publish(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let exam_id = required_str(&req.params, "examId")?;
    ensure_exists(conn, "exams", &exam_id, "exam")?;
    let published = optional_bool(&req.params, "published")?.unwrap_or(true);
    let changed = conn.execute(
        "UPDATE mark_entries SET is_published = ?, updated_at = ? WHERE exam_id = ?",
        params![published, now_ts(), exam_id],
    )?;
    Ok(json!({ "updated": changed, "published": published }))
}

fn grading_grade(req: &Request) -> AppResult<Value> {
    let marks = required_f64(&req.params, "marks")?;
    let total = optional_f64(&req.params, "totalMarks")?.unwrap_or(100.0);
    let grade = grading::get_grade(marks, total);
    Ok(json!({
        "letter": grade.letter,
        "gradePoint": grade.grade_point,
        "percentage": round_1(grading::percentage(marks, total)),
        "pass": grading::is_pass(grade.grade_point),
    }))
}

/// Credit-weighted GPA from either raw marks or grade points.
fn grading_gpa(req: &Request) -> AppResult<Value> {
    let total = optional_f64(&req.params, "totalMarks")?.unwrap_or(100.0);
    let mut from_marks = Vec::new();
    let mut from_points = Vec::new();
    for (i, v) in required_array(&req.params, "entries")?.iter().enumerate() {
        let credits = v.get("credits").and_then(|c| c.as_f64()).unwrap_or(1.0);
        if credits < 0.0 {
            return Err(AppError::invalid("credits", "credits cannot be negative"));
        }
        match (
            v.get("marks").and_then(|m| m.as_f64()),
            v.get("gradePoint").and_then(|g| g.as_f64()),
        ) {
            (Some(m), _) => from_marks.push((m, credits)),
            (None, Some(gp)) => from_points.push((gp, credits)),
            (None, None) => {
                return Err(AppError::bad_params(format!(
                    "entries[{}] needs marks or gradePoint",
                    i
                )))
            }
        }
    }
    let gpa = if from_points.is_empty() {
        grading::calculate_gpa(&from_marks, total)
    } else {
        let mut all = from_points;
        all.extend(
            from_marks
                .iter()
                .map(|(m, c)| (grading::get_grade(*m, total).grade_point, *c)),
        );
        grading::calculate_weighted_gpa(&all)
    };
    Ok(json!({ "gpa": gpa, "letter": grading::letter_for_grade_point(gpa) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "marks.sheet" => marks_sheet(state, req),
        "marks.save" => marks_save(state, req),
        "marks.publish" => marks_publish(state, req),
        "grading.grade" => grading_grade(req),
        "grading.gpa" => grading_gpa(req),
        _ => return None,
    };
    Some(respond(req, result))
}
