//! Grading policy: percentage thresholds to letter grade and grade point.

use serde::Serialize;

/// Minimum grade point that counts as a pass (grade D).
pub const PASS_GRADE_POINT: f64 = 1.5;

/// Ordered from the highest threshold down; the first row whose threshold is
/// at or below the percentage wins.
pub const GRADE_TABLE: [(f64, &str, f64); 8] = [
    (90.0, "A+", 4.0),
    (80.0, "A", 3.7),
    (70.0, "B+", 3.3),
    (60.0, "B", 3.0),
    (50.0, "C+", 2.5),
    (40.0, "C", 2.0),
    (33.0, "D", 1.5),
    (0.0, "F", 0.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub letter: &'static str,
    pub grade_point: f64,
}

pub fn percentage(marks: f64, total: f64) -> f64 {
    if total > 0.0 {
        marks / total * 100.0
    } else {
        0.0
    }
}

pub fn get_grade(marks: f64, total: f64) -> Grade {
    let pct = percentage(marks, total);
    for (threshold, letter, grade_point) in GRADE_TABLE {
        if pct >= threshold {
            return Grade {
                letter,
                grade_point,
            };
        }
    }
    Grade {
        letter: "F",
        grade_point: 0.0,
    }
}

/// Letter for an averaged grade point: the best row whose point does not
/// exceed it.
pub fn letter_for_grade_point(gpa: f64) -> &'static str {
    GRADE_TABLE
        .iter()
        .find(|(_, _, gp)| gpa >= *gp)
        .map(|(_, letter, _)| *letter)
        .unwrap_or("F")
}

pub fn is_pass(grade_point: f64) -> bool {
    grade_point >= PASS_GRADE_POINT
}

/// Credit-weighted GPA from raw marks. Each entry is `(marks, credits)` and
/// every entry is graded against `total_marks`.
pub fn calculate_gpa(entries: &[(f64, f64)], total_marks: f64) -> f64 {
    let weighted: Vec<(f64, f64)> = entries
        .iter()
        .map(|(marks, credits)| (get_grade(*marks, total_marks).grade_point, *credits))
        .collect();
    calculate_weighted_gpa(&weighted)
}

/// Credit-weighted mean of `(grade_point, credits)` pairs, rounded to 2
/// decimals. Zero total credits gives 0.
pub fn calculate_weighted_gpa(entries: &[(f64, f64)]) -> f64 {
    let total_credits: f64 = entries.iter().map(|(_, c)| *c).sum();
    if total_credits <= 0.0 {
        return 0.0;
    }
    let points: f64 = entries.iter().map(|(gp, c)| gp * c).sum();
    round_2(points / total_credits)
}

/// Rounds half away from zero to one decimal place.
pub fn round_1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Rounds half away from zero to two decimal places.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `part / whole * 100` rounded to one decimal, or 0 when `whole` is 0.
pub fn rate(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        round_1(part / whole * 100.0)
    } else {
        0.0
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
