//! Academic year lifecycle and the active-year resolver.

use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use chrono::NaiveDate;
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
}

impl AcademicYear {
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

#[derive(Debug, Clone)]
pub struct YearInput {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloverOutcome {
    pub copied: usize,
    pub skipped: usize,
}

const YEAR_COLUMNS: &str = "id, name, start_date, end_date, is_active";

fn year_from_row(r: &Row<'_>) -> rusqlite::Result<AcademicYear> {
    Ok(AcademicYear {
        id: r.get(0)?,
        name: r.get(1)?,
        start_date: r.get(2)?,
        end_date: r.get(3)?,
        is_active: r.get::<_, i64>(4)? != 0,
    })
}

pub fn get_active_year(conn: &Connection) -> AppResult<Option<AcademicYear>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {YEAR_COLUMNS} FROM academic_years WHERE is_active = 1
                 ORDER BY start_date DESC LIMIT 1"
            ),
            [],
            year_from_row,
        )
        .optional()?)
}

/// Like [`get_active_year`] but treats "no active year" as NotFound.
pub fn require_active_year(conn: &Connection) -> AppResult<AcademicYear> {
    get_active_year(conn)?.ok_or_else(|| AppError::not_found("no active academic year"))
}

pub fn get_year(conn: &Connection, id: &str) -> AppResult<AcademicYear> {
    conn.query_row(
        &format!("SELECT {YEAR_COLUMNS} FROM academic_years WHERE id = ?"),
        [id],
        year_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("academic year not found"))
}

pub fn list_years(conn: &Connection) -> AppResult<Vec<AcademicYear>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {YEAR_COLUMNS} FROM academic_years ORDER BY start_date DESC"
    ))?;
    let years = stmt
        .query_map([], year_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(years)
}

fn validate_input(conn: &Connection, input: &YearInput, exclude_id: Option<&str>) -> AppResult<()> {
    if input.name.trim().is_empty() {
        return Err(AppError::invalid("name", "name is required"));
    }
    if input.start_date >= input.end_date {
        return Err(AppError::invalid(
            "endDate",
            "end date must be after start date",
        ));
    }
    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM academic_years WHERE name = ? AND id <> ?",
            params![input.name.trim(), exclude_id.unwrap_or("")],
            |r| r.get(0),
        )
        .optional()?;
    if clash.is_some() {
        return Err(AppError::conflict(
            "name",
            "an academic year with this name already exists",
        ));
    }
    Ok(())
}

pub fn create_year(conn: &Connection, input: &YearInput, activate: bool) -> AppResult<AcademicYear> {
    validate_input(conn, input, None)?;
    let id = new_id();
    let now = now_ts();
    let tx = conn.unchecked_transaction()?;
    if activate {
        tx.execute("UPDATE academic_years SET is_active = 0 WHERE is_active = 1", [])?;
    }
    tx.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            input.name.trim(),
            input.start_date,
            input.end_date,
            activate as i64,
            now,
            now
        ],
    )?;
    tx.commit()?;
    info!(
        "event=year_created module=years status=ok id={} active={}",
        id, activate
    );
    get_year(conn, &id)
}

pub fn update_year(conn: &Connection, id: &str, input: &YearInput) -> AppResult<AcademicYear> {
    get_year(conn, id)?;
    validate_input(conn, input, Some(id))?;
    conn.execute(
        "UPDATE academic_years SET name = ?, start_date = ?, end_date = ?, updated_at = ?
         WHERE id = ?",
        params![input.name.trim(), input.start_date, input.end_date, now_ts(), id],
    )?;
    get_year(conn, id)
}

pub fn delete_year(conn: &Connection, id: &str) -> AppResult<()> {
    let year = get_year(conn, id)?;
    if year.is_active {
        return Err(AppError::conflict(
            "id",
            "cannot delete the active academic year; activate another year first",
        ));
    }
    let enrollments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE academic_year_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if enrollments > 0 {
        return Err(AppError::conflict(
            "id",
            format!("cannot delete: {enrollments} enrollment(s) reference this year"),
        ));
    }
    let fee_heads: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fee_heads WHERE academic_year_id = ?",
        [id],
        |r| r.get(0),
    )?;
    if fee_heads > 0 {
        return Err(AppError::conflict(
            "id",
            format!("cannot delete: {fee_heads} fee head(s) reference this year"),
        ));
    }
    conn.execute("DELETE FROM academic_years WHERE id = ?", [id])?;
    Ok(())
}

/// Makes `id` the only active year. An unknown id leaves every row as it was.
pub fn set_active_year(conn: &Connection, id: &str) -> AppResult<AcademicYear> {
    let tx = conn.unchecked_transaction()?;
    let exists: Option<i64> = tx
        .query_row("SELECT 1 FROM academic_years WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("academic year not found"));
    }
    let now = now_ts();
    tx.execute(
        "UPDATE academic_years SET is_active = 0, updated_at = ? WHERE is_active = 1 AND id <> ?",
        params![now, id],
    )?;
    tx.execute(
        "UPDATE academic_years SET is_active = 1, updated_at = ? WHERE id = ?",
        params![now, id],
    )?;
    tx.commit()?;
    info!("event=year_activated module=years status=ok id={}", id);
    get_year(conn, id)
}

/// Copies active enrollments of `from_id` into `to_id`.
///
/// A `(student, class section)` pair already present in the target year is
/// skipped. Roll numbers carry over unless already taken in the target
/// class, in which case the next free number is used.
pub fn rollover(conn: &Connection, from_id: &str, to_id: &str) -> AppResult<RolloverOutcome> {
    if from_id == to_id {
        return Err(AppError::invalid(
            "toYearId",
            "source and target year must differ",
        ));
    }
    get_year(conn, from_id)?;
    get_year(conn, to_id)?;

    let tx = conn.unchecked_transaction()?;
    let source: Vec<(String, String, Option<String>, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT student_id, class_section_id, course_id, roll_number
             FROM enrollments
             WHERE academic_year_id = ? AND is_active = 1
             ORDER BY class_section_id, roll_number",
        )?;
        let rows = stmt
            .query_map([from_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
        rows
    };

    let now = now_ts();
    let mut outcome = RolloverOutcome {
        copied: 0,
        skipped: 0,
    };
    for (student_id, class_id, course_id, roll_number) in source {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM enrollments
                 WHERE student_id = ? AND class_section_id = ? AND academic_year_id = ?",
                params![student_id, class_id, to_id],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            outcome.skipped += 1;
            continue;
        }
        let roll_taken: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM enrollments
                 WHERE class_section_id = ? AND academic_year_id = ? AND roll_number = ?",
                params![class_id, to_id, roll_number],
                |r| r.get(0),
            )
            .optional()?;
        let roll = if roll_taken.is_some() {
            next_roll_number(&tx, &class_id, to_id)?
        } else {
            roll_number
        };
        tx.execute(
            "INSERT INTO enrollments(id, student_id, class_section_id, academic_year_id, course_id,
                                     roll_number, is_active, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
            params![new_id(), student_id, class_id, to_id, course_id, roll, now, now],
        )?;
        outcome.copied += 1;
    }
    tx.commit()?;
    info!(
        "event=year_rollover module=years status=ok from={} to={} copied={} skipped={}",
        from_id, to_id, outcome.copied, outcome.skipped
    );
    Ok(outcome)
}

pub fn next_roll_number(conn: &Connection, class_id: &str, year_id: &str) -> AppResult<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(roll_number) FROM enrollments WHERE class_section_id = ? AND academic_year_id = ?",
        params![class_id, year_id],
        |r| r.get(0),
    )?;
    Ok(max.unwrap_or(0) + 1)
}
