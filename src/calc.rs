//! Aggregation engine for the year-scoped reporting snapshot.
//!
//! Every loader takes the academic year explicitly; callers resolve it once
//! per request. The arithmetic lives in pure functions over row structs so
//! it can be checked without a database.

use crate::error::AppResult;
use crate::grading::{self, is_pass, mean, rate, round_1, round_2};
use crate::years::AcademicYear;
use chrono::NaiveDate;
use log::error;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub const GPA_BUCKETS: [(&str, f64, f64); 5] = [
    ("3.5 - 4.0", 3.5, f64::INFINITY),
    ("3.0 - 3.49", 3.0, 3.5),
    ("2.5 - 2.99", 2.5, 3.0),
    ("2.0 - 2.49", 2.0, 2.5),
    ("Below 2.0", f64::NEG_INFINITY, 2.0),
];

const TOP_STUDENT_COUNT: usize = 5;

// ---------------------------------------------------------------- fees

#[derive(Debug, Clone)]
pub struct FeeHeadRow {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub applicable_class: Option<String>,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLine {
    pub fee_head_id: String,
    pub fee_name: String,
    pub amount: f64,
    pub applicable_class: Option<String>,
    pub due_date: NaiveDate,
    pub applicable_students: usize,
    pub expected: f64,
    pub collected: f64,
    pub pending: f64,
    pub collection_rate: f64,
    pub is_overdue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSummary {
    pub total_expected: f64,
    pub total_collected: f64,
    pub total_pending: f64,
    pub total_overdue: f64,
    pub collection_rate: f64,
    pub total_payments: usize,
    pub paid_student_count: usize,
    pub unpaid_student_count: usize,
    pub breakdown: Vec<FeeLine>,
}

pub fn fee_line(head: &FeeHeadRow, applicable_students: usize, collected: f64, today: NaiveDate) -> FeeLine {
    let expected = head.amount * applicable_students as f64;
    let pending = (expected - collected).max(0.0);
    FeeLine {
        fee_head_id: head.id.clone(),
        fee_name: head.name.clone(),
        amount: round_2(head.amount),
        applicable_class: head.applicable_class.clone(),
        due_date: head.due_date,
        applicable_students,
        expected: round_2(expected),
        collected: round_2(collected),
        pending: round_2(pending),
        collection_rate: rate(collected, expected),
        is_overdue: head.due_date < today && pending > 0.0,
    }
}

pub fn summarize_fees(
    breakdown: Vec<FeeLine>,
    total_payments: usize,
    paid_student_count: usize,
    unpaid_student_count: usize,
) -> FeeSummary {
    let total_expected: f64 = breakdown.iter().map(|l| l.expected).sum();
    let total_collected: f64 = breakdown.iter().map(|l| l.collected).sum();
    let total_pending: f64 = breakdown.iter().map(|l| l.pending).sum();
    let total_overdue: f64 = breakdown
        .iter()
        .filter(|l| l.is_overdue)
        .map(|l| l.pending)
        .sum();
    FeeSummary {
        total_expected: round_2(total_expected),
        total_collected: round_2(total_collected),
        total_pending: round_2(total_pending),
        total_overdue: round_2(total_overdue),
        collection_rate: rate(total_collected, total_expected),
        total_payments,
        paid_student_count,
        unpaid_student_count,
        breakdown,
    }
}

fn applies_to(head: &FeeHeadRow, classes: &HashSet<String>) -> bool {
    match head.applicable_class.as_deref() {
        None => true,
        Some(c) => classes.contains(c),
    }
}

/// Active students with an active enrollment in `year`, with the class
/// names they are enrolled in.
pub fn enrolled_students(conn: &Connection, year: &AcademicYear) -> AppResult<BTreeMap<String, HashSet<String>>> {
    let mut stmt = conn.prepare(
        "SELECT e.student_id, cs.class_name
         FROM enrollments e
         JOIN class_sections cs ON cs.id = e.class_section_id
         JOIN students s ON s.id = e.student_id
         WHERE e.academic_year_id = ? AND e.is_active = 1 AND s.is_active = 1",
    )?;
    let rows = stmt
        .query_map([&year.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let mut out: BTreeMap<String, HashSet<String>> = BTreeMap::new();
    for (student_id, class_name) in rows {
        out.entry(student_id).or_default().insert(class_name);
    }
    Ok(out)
}

pub fn active_fee_heads(conn: &Connection, year: &AcademicYear) -> AppResult<Vec<FeeHeadRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, amount, applicable_class, due_date
         FROM fee_heads
         WHERE academic_year_id = ? AND is_active = 1
         ORDER BY due_date, name",
    )?;
    let heads = stmt
        .query_map([&year.id], |r| {
            Ok(FeeHeadRow {
                id: r.get(0)?,
                name: r.get(1)?,
                amount: r.get(2)?,
                applicable_class: r.get(3)?,
                due_date: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(heads)
}

/// Completed payment totals keyed by `(student_id, fee_head_id)` for the
/// active fee heads of `year`.
fn completed_payments(conn: &Connection, year: &AcademicYear) -> AppResult<(HashMap<(String, String), f64>, usize)> {
    let mut stmt = conn.prepare(
        "SELECT p.student_id, p.fee_head_id, SUM(p.amount_paid), COUNT(*)
         FROM fee_payments p
         JOIN fee_heads h ON h.id = p.fee_head_id
         WHERE h.academic_year_id = ? AND h.is_active = 1 AND p.status = 'Completed'
         GROUP BY p.student_id, p.fee_head_id",
    )?;
    let rows = stmt
        .query_map([&year.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let mut count = 0usize;
    let mut map = HashMap::new();
    for (student_id, head_id, sum, n) in rows {
        count += n as usize;
        map.insert((student_id, head_id), sum);
    }
    Ok((map, count))
}

pub fn fee_summary(conn: &Connection, year: &AcademicYear, today: NaiveDate) -> AppResult<FeeSummary> {
    let heads = active_fee_heads(conn, year)?;
    let students = enrolled_students(conn, year)?;
    let (paid, total_payments) = completed_payments(conn, year)?;

    let mut collected_by_head: HashMap<&str, f64> = HashMap::new();
    for ((_, head_id), sum) in &paid {
        *collected_by_head.entry(head_id.as_str()).or_default() += sum;
    }

    let breakdown: Vec<FeeLine> = heads
        .iter()
        .map(|h| {
            let applicable = students.values().filter(|classes| applies_to(h, classes)).count();
            let collected = collected_by_head.get(h.id.as_str()).copied().unwrap_or(0.0);
            fee_line(h, applicable, collected, today)
        })
        .collect();

    let mut paid_students = 0usize;
    for (student_id, classes) in &students {
        let settled = heads.iter().filter(|h| applies_to(h, classes)).all(|h| {
            let p = paid
                .get(&(student_id.clone(), h.id.clone()))
                .copied()
                .unwrap_or(0.0);
            p >= h.amount
        });
        if settled {
            paid_students += 1;
        }
    }

    Ok(summarize_fees(
        breakdown,
        total_payments,
        paid_students,
        students.len() - paid_students,
    ))
}

// ---------------------------------------------------------- attendance

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAttendance {
    pub class_section_id: String,
    pub class_name: String,
    pub section: String,
    pub total_students: usize,
    pub present: usize,
    pub absent: usize,
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub total_records: usize,
    pub present_records: usize,
    pub overall_rate: f64,
    pub total_working_days: usize,
    pub latest_date: Option<NaiveDate>,
    pub classes: Vec<ClassAttendance>,
}

pub fn class_attendance(
    class_section_id: &str,
    class_name: &str,
    section: &str,
    total_students: usize,
    present: usize,
    absent: usize,
) -> ClassAttendance {
    ClassAttendance {
        class_section_id: class_section_id.to_string(),
        class_name: class_name.to_string(),
        section: section.to_string(),
        total_students,
        present,
        absent,
        attendance_rate: rate(present as f64, total_students as f64),
    }
}

pub fn attendance_summary(conn: &Connection, year: &AcademicYear) -> AppResult<AttendanceSummary> {
    let (total, present, days, latest): (i64, Option<i64>, i64, Option<NaiveDate>) = conn.query_row(
        "SELECT COUNT(*), SUM(is_present), COUNT(DISTINCT date), MAX(date)
         FROM attendance_records
         WHERE date BETWEEN ? AND ?",
        params![year.start_date, year.end_date],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;
    let present = present.unwrap_or(0) as usize;
    let total = total as usize;

    let mut classes = Vec::new();
    if let Some(day) = latest {
        let mut stmt = conn.prepare(
            "SELECT cs.id, cs.class_name, cs.section,
                    (SELECT COUNT(*) FROM enrollments e
                       WHERE e.class_section_id = cs.id AND e.academic_year_id = ?1
                         AND e.is_active = 1),
                    (SELECT COUNT(*) FROM attendance_records a
                       WHERE a.class_section_id = cs.id AND a.date = ?2 AND a.is_present = 1),
                    (SELECT COUNT(*) FROM attendance_records a
                       WHERE a.class_section_id = cs.id AND a.date = ?2 AND a.is_present = 0)
             FROM class_sections cs
             ORDER BY cs.class_name, cs.section",
        )?;
        let rows = stmt
            .query_map(params![year.id, day], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
        for (id, class_name, section, enrolled, p, a) in rows {
            if enrolled == 0 && p + a == 0 {
                continue;
            }
            classes.push(class_attendance(
                &id,
                &class_name,
                &section,
                enrolled as usize,
                p as usize,
                a as usize,
            ));
        }
    }

    Ok(AttendanceSummary {
        total_records: total,
        present_records: present,
        overall_rate: rate(present as f64, total as f64),
        total_working_days: days as usize,
        latest_date: latest,
        classes,
    })
}

// ----------------------------------------------------------------- gpa

#[derive(Debug, Clone, PartialEq)]
pub struct MarkRow {
    pub student_id: String,
    pub exam_id: String,
    pub marks_obtained: f64,
    pub total_marks: f64,
    pub grade_point: Option<f64>,
}

impl MarkRow {
    /// Stored grade point, or one derived from the marks when missing.
    pub fn effective_grade_point(&self) -> f64 {
        self.grade_point
            .unwrap_or_else(|| grading::get_grade(self.marks_obtained, self.total_marks).grade_point)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaBucket {
    pub range: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaSummary {
    pub distribution: Vec<GpaBucket>,
    pub graded_entries: usize,
    pub evaluated_students: usize,
    pub average_gpa: f64,
    pub highest_gpa: Option<f64>,
    pub lowest_gpa: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassFail {
    pub total_students: usize,
    pub pass: usize,
    pub fail: usize,
    pub not_evaluated: usize,
}

pub fn bucket_label(gp: f64) -> &'static str {
    GPA_BUCKETS
        .iter()
        .find(|(_, lo, hi)| gp >= *lo && gp < *hi)
        .map(|(label, _, _)| *label)
        .unwrap_or("Below 2.0")
}

pub fn gpa_distribution(rows: &[MarkRow]) -> Vec<GpaBucket> {
    let mut counts = [0usize; GPA_BUCKETS.len()];
    for gp in rows.iter().filter_map(|r| r.grade_point) {
        let label = bucket_label(gp);
        if let Some(i) = GPA_BUCKETS.iter().position(|(l, _, _)| *l == label) {
            counts[i] += 1;
        }
    }
    GPA_BUCKETS
        .iter()
        .zip(counts)
        .map(|(bucket, count)| GpaBucket {
            range: bucket.0,
            count,
        })
        .collect()
}

/// Mean grade point per student over entries that carry a grade point.
pub fn student_gpas(rows: &[MarkRow]) -> BTreeMap<String, f64> {
    let mut points: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in rows {
        if let Some(gp) = r.grade_point {
            points.entry(r.student_id.clone()).or_default().push(gp);
        }
    }
    points
        .into_iter()
        .filter_map(|(id, gps)| mean(&gps).map(|m| (id, m)))
        .collect()
}

pub fn gpa_summary(rows: &[MarkRow]) -> GpaSummary {
    let per_student = student_gpas(rows);
    let averages: Vec<f64> = per_student.values().copied().collect();
    GpaSummary {
        distribution: gpa_distribution(rows),
        graded_entries: rows.iter().filter(|r| r.grade_point.is_some()).count(),
        evaluated_students: per_student.len(),
        average_gpa: mean(&averages).map(round_2).unwrap_or(0.0),
        highest_gpa: averages.iter().copied().reduce(f64::max).map(round_2),
        lowest_gpa: averages.iter().copied().reduce(f64::min).map(round_2),
    }
}

/// Tallies pass/fail over the enrolled population.
///
/// Only students in `enrolled` are counted. Graded students outside it
/// (withdrawn or deactivated) are left out of the tally; they are logged as
/// an invariant violation and reported in `warnings`.
pub fn tally_pass_fail(
    enrolled: &BTreeSet<String>,
    student_gpas: &BTreeMap<String, f64>,
    warnings: &mut Vec<String>,
) -> PassFail {
    let (counted, outside): (Vec<(&String, &f64)>, Vec<(&String, &f64)>) = student_gpas
        .iter()
        .partition(|(id, _)| enrolled.contains(*id));
    if !outside.is_empty() {
        warnings.push(format!(
            "pass/fail tally inconsistent: {} graded student(s) not enrolled in the year were excluded",
            outside.len()
        ));
        error!(
            "event=invariant_violation module=calc check=pass_fail excluded={} enrolled={}",
            outside.len(),
            enrolled.len()
        );
    }
    let pass = counted.iter().filter(|(_, g)| is_pass(**g)).count();
    let fail = counted.len() - pass;
    PassFail {
        total_students: enrolled.len(),
        pass,
        fail,
        not_evaluated: enrolled.len() - counted.len(),
    }
}

/// Mark entries whose exam falls inside the year's date range.
pub fn year_marks(conn: &Connection, year: &AcademicYear) -> AppResult<Vec<MarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.student_id, m.exam_id, m.marks_obtained, x.total_marks, m.grade_point
         FROM mark_entries m
         JOIN exams x ON x.id = m.exam_id
         WHERE x.exam_date BETWEEN ? AND ?",
    )?;
    let rows = stmt
        .query_map(params![year.start_date, year.end_date], |r| {
            Ok(MarkRow {
                student_id: r.get(0)?,
                exam_id: r.get(1)?,
                marks_obtained: r.get(2)?,
                total_marks: r.get(3)?,
                grade_point: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(rows)
}

// --------------------------------------------------------- exam results

#[derive(Debug, Clone)]
pub struct ExamMeta {
    pub id: String,
    pub name: String,
    pub course_name: String,
    pub exam_date: NaiveDate,
    pub total_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub exam_id: String,
    pub exam_name: String,
    pub course_name: String,
    pub exam_date: NaiveDate,
    pub total_marks: f64,
    pub total_students: usize,
    pub average: f64,
    pub highest: f64,
    pub lowest: f64,
    pub pass_rate: f64,
}

/// `None` when the exam has no mark entries.
pub fn exam_result(exam: &ExamMeta, rows: &[&MarkRow]) -> Option<ExamResult> {
    if rows.is_empty() {
        return None;
    }
    let marks: Vec<f64> = rows.iter().map(|r| r.marks_obtained).collect();
    let passed = rows.iter().filter(|r| is_pass(r.effective_grade_point())).count();
    Some(ExamResult {
        exam_id: exam.id.clone(),
        exam_name: exam.name.clone(),
        course_name: exam.course_name.clone(),
        exam_date: exam.exam_date,
        total_marks: exam.total_marks,
        total_students: rows.len(),
        average: mean(&marks).map(round_1).unwrap_or(0.0),
        highest: marks.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        lowest: marks.iter().copied().fold(f64::INFINITY, f64::min),
        pass_rate: rate(passed as f64, rows.len() as f64),
    })
}

pub fn year_exams(conn: &Connection, year: &AcademicYear) -> AppResult<Vec<ExamMeta>> {
    let mut stmt = conn.prepare(
        "SELECT x.id, x.name, c.name, x.exam_date, x.total_marks
         FROM exams x
         JOIN courses c ON c.id = x.course_id
         WHERE x.exam_date BETWEEN ? AND ?
         ORDER BY x.exam_date DESC, x.name",
    )?;
    let exams = stmt
        .query_map(params![year.start_date, year.end_date], |r| {
            Ok(ExamMeta {
                id: r.get(0)?,
                name: r.get(1)?,
                course_name: r.get(2)?,
                exam_date: r.get(3)?,
                total_marks: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(exams)
}

pub fn exam_results(exams: &[ExamMeta], rows: &[MarkRow]) -> Vec<ExamResult> {
    let mut by_exam: HashMap<&str, Vec<&MarkRow>> = HashMap::new();
    for r in rows {
        by_exam.entry(r.exam_id.as_str()).or_default().push(r);
    }
    exams
        .iter()
        .filter_map(|x| {
            let entries = by_exam.get(x.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            exam_result(x, entries)
        })
        .collect()
}

// ------------------------------------------------------------- overview

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopStudent {
    pub student_id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub roll_number: Option<i64>,
    pub gpa: f64,
    pub grade: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub year: AcademicYear,
    pub as_of: NaiveDate,
    pub total_students: usize,
    pub fees: FeeSummary,
    pub attendance: AttendanceSummary,
    pub gpa: GpaSummary,
    pub pass_fail: PassFail,
    pub exam_results: Vec<ExamResult>,
    pub top_students: Vec<TopStudent>,
    pub warnings: Vec<String>,
}

fn top_students(
    conn: &Connection,
    year: &AcademicYear,
    gpas: &BTreeMap<String, f64>,
) -> AppResult<Vec<TopStudent>> {
    let mut ranked: Vec<(&String, f64)> = gpas.iter().map(|(id, g)| (id, *g)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(TOP_STUDENT_COUNT);

    let mut stmt = conn.prepare(
        "SELECT s.first_name || ' ' || s.last_name,
                (SELECT cs.class_name || '-' || cs.section FROM enrollments e
                   JOIN class_sections cs ON cs.id = e.class_section_id
                   WHERE e.student_id = s.id AND e.academic_year_id = ?2 AND e.is_active = 1
                   ORDER BY e.created_at LIMIT 1),
                (SELECT e.roll_number FROM enrollments e
                   WHERE e.student_id = s.id AND e.academic_year_id = ?2 AND e.is_active = 1
                   ORDER BY e.created_at LIMIT 1)
         FROM students s WHERE s.id = ?1",
    )?;
    let mut out = Vec::with_capacity(ranked.len());
    for (student_id, gpa) in ranked {
        let (name, class_name, roll_number) = stmt.query_row(params![student_id, year.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, Option<i64>>(2)?,
            ))
        })?;
        out.push(TopStudent {
            student_id: student_id.clone(),
            name,
            class_name,
            roll_number,
            gpa: round_2(gpa),
            grade: grading::letter_for_grade_point(gpa),
        });
    }
    Ok(out)
}

pub fn overview(conn: &Connection, year: &AcademicYear, today: NaiveDate) -> AppResult<Overview> {
    let mut warnings = Vec::new();
    let enrolled: BTreeSet<String> = enrolled_students(conn, year)?.into_keys().collect();
    let total_students = enrolled.len();
    let fees = fee_summary(conn, year, today)?;
    let attendance = attendance_summary(conn, year)?;
    let marks = year_marks(conn, year)?;
    let gpa = gpa_summary(&marks);
    let per_student = student_gpas(&marks);
    let pass_fail = tally_pass_fail(&enrolled, &per_student, &mut warnings);
    let exams = year_exams(conn, year)?;
    let exam_results = exam_results(&exams, &marks);
    let top_students = top_students(conn, year, &per_student)?;

    Ok(Overview {
        year: year.clone(),
        as_of: today,
        total_students,
        fees,
        attendance,
        gpa,
        pass_fail,
        exam_results,
        top_students,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn head(amount: f64, due: &str) -> FeeHeadRow {
        FeeHeadRow {
            id: "h1".into(),
            name: "Tuition".into(),
            amount,
            applicable_class: None,
            due_date: day(due),
        }
    }

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn mark(student: &str, exam: &str, marks: f64, gp: Option<f64>) -> MarkRow {
        MarkRow {
            student_id: student.into(),
            exam_id: exam.into(),
            marks_obtained: marks,
            total_marks: 100.0,
            grade_point: gp,
        }
    }

    #[test]
    fn fee_scenario_twenty_five_students_fifteen_paid() {
        let line = fee_line(&head(15000.0, "2026-09-01"), 25, 15.0 * 15000.0, day("2026-10-01"));
        assert_eq!(line.expected, 375000.0);
        assert_eq!(line.collected, 225000.0);
        assert_eq!(line.pending, 150000.0);
        assert_eq!(line.collection_rate, 60.0);
        assert!(line.is_overdue);

        let summary = summarize_fees(vec![line], 15, 15, 10);
        assert_eq!(summary.total_expected, 375000.0);
        assert_eq!(summary.total_overdue, 150000.0);
        assert_eq!(summary.collection_rate, 60.0);
    }

    #[test]
    fn pending_never_negative_and_zero_expected_rate_is_zero() {
        let over = fee_line(&head(100.0, "2026-09-01"), 1, 250.0, day("2026-08-01"));
        assert_eq!(over.pending, 0.0);
        assert!(!over.is_overdue);
        let empty = fee_line(&head(100.0, "2026-09-01"), 0, 0.0, day("2026-08-01"));
        assert_eq!(empty.collection_rate, 0.0);
    }

    #[test]
    fn class_attendance_rate_uses_enrollment_count() {
        let c = class_attendance("c1", "10", "A", 40, 30, 10);
        assert_eq!(c.attendance_rate, 75.0);
        let none = class_attendance("c1", "10", "A", 0, 0, 0);
        assert_eq!(none.attendance_rate, 0.0);
    }

    #[test]
    fn buckets_follow_fixed_ranges() {
        assert_eq!(bucket_label(4.0), "3.5 - 4.0");
        assert_eq!(bucket_label(3.5), "3.5 - 4.0");
        assert_eq!(bucket_label(3.49), "3.0 - 3.49");
        assert_eq!(bucket_label(2.5), "2.5 - 2.99");
        assert_eq!(bucket_label(2.0), "2.0 - 2.49");
        assert_eq!(bucket_label(1.5), "Below 2.0");
        assert_eq!(bucket_label(0.0), "Below 2.0");
    }

    #[test]
    fn distribution_skips_entries_without_grade_points() {
        let rows = vec![
            mark("s1", "e1", 95.0, Some(4.0)),
            mark("s1", "e2", 85.0, Some(3.7)),
            mark("s2", "e1", 20.0, Some(0.0)),
            mark("s3", "e1", 50.0, None),
        ];
        let dist = gpa_distribution(&rows);
        assert_eq!(dist.len(), 5);
        assert_eq!(dist[0].count, 2);
        assert_eq!(dist[4].count, 1);
        assert_eq!(dist.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[test]
    fn average_is_mean_of_student_averages() {
        // s1 averages 3.5 over two entries, s2 has 2.0 from one entry.
        let rows = vec![
            mark("s1", "e1", 95.0, Some(4.0)),
            mark("s1", "e2", 60.0, Some(3.0)),
            mark("s2", "e1", 45.0, Some(2.0)),
        ];
        let s = gpa_summary(&rows);
        assert_eq!(s.evaluated_students, 2);
        assert_eq!(s.average_gpa, 2.75);
        assert_eq!(s.highest_gpa, Some(3.5));
        assert_eq!(s.lowest_gpa, Some(2.0));
    }

    #[test]
    fn pass_fail_adds_up_for_consistent_data() {
        let rows = vec![
            mark("s1", "e1", 95.0, Some(4.0)),
            mark("s2", "e1", 20.0, Some(0.0)),
            mark("s3", "e1", 35.0, Some(1.5)),
        ];
        let mut warnings = Vec::new();
        let pf = tally_pass_fail(&ids(&["s1", "s2", "s3", "s4", "s5"]), &student_gpas(&rows), &mut warnings);
        assert_eq!((pf.pass, pf.fail, pf.not_evaluated), (2, 1, 2));
        assert_eq!(pf.pass + pf.fail + pf.not_evaluated, pf.total_students);
        assert!(warnings.is_empty());
    }

    #[test]
    fn pass_fail_excludes_graded_students_outside_enrollment() {
        // s2 was graded but is no longer enrolled; s3 is enrolled but ungraded.
        let rows = vec![
            mark("s1", "e1", 90.0, Some(4.0)),
            mark("s2", "e1", 90.0, Some(4.0)),
        ];
        let mut warnings = Vec::new();
        let pf = tally_pass_fail(&ids(&["s1", "s3"]), &student_gpas(&rows), &mut warnings);
        assert_eq!(
            pf,
            PassFail {
                total_students: 2,
                pass: 1,
                fail: 0,
                not_evaluated: 1,
            }
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("not enrolled"));
    }

    #[test]
    fn exam_results_skip_exams_without_entries() {
        let exams = vec![
            ExamMeta {
                id: "e1".into(),
                name: "Midterm".into(),
                course_name: "Maths".into(),
                exam_date: day("2026-09-10"),
                total_marks: 100.0,
            },
            ExamMeta {
                id: "e2".into(),
                name: "Quiz".into(),
                course_name: "Maths".into(),
                exam_date: day("2026-09-12"),
                total_marks: 100.0,
            },
        ];
        let rows = vec![
            mark("s1", "e1", 80.0, Some(3.7)),
            mark("s2", "e1", 30.0, None),
            mark("s3", "e1", 55.0, Some(2.5)),
        ];
        let results = exam_results(&exams, &rows);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.total_students, 3);
        assert_eq!(r.average, 55.0);
        assert_eq!(r.highest, 80.0);
        assert_eq!(r.lowest, 30.0);
        assert_eq!(r.pass_rate, 66.7);
    }
}
