use crate::db::{new_id, now_ts, today};
use crate::error::{AppError, AppResult};
use crate::grading::round_2;
use crate::ipc::helpers::{
    ensure_exists, optional_date, optional_f64, optional_str, required_f64, required_str,
    respond, scoped,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

pub const SALARY_STATUSES: [&str; 2] = ["Pending", "Paid"];

struct SalaryInput {
    teacher_id: String,
    basic_salary: f64,
    allowances: f64,
    deductions: f64,
    month: String,
}

impl SalaryInput {
    fn net(&self) -> f64 {
        round_2(self.basic_salary + self.allowances - self.deductions)
    }
}

/// `YYYY-MM`, checked by parsing the first of the month.
fn parse_month(value: &str) -> AppResult<String> {
    NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m").to_string())
        .map_err(|_| AppError::invalid("month", "month must be YYYY-MM"))
}

fn non_negative(params: &Value, key: &'static str, required: bool) -> AppResult<f64> {
    let v = if required {
        required_f64(params, key)?
    } else {
        optional_f64(params, key)?.unwrap_or(0.0)
    };
    if v < 0.0 {
        return Err(AppError::invalid(key, format!("{} cannot be negative", key)));
    }
    Ok(v)
}

fn salary_input(params: &Value) -> AppResult<SalaryInput> {
    let input = SalaryInput {
        teacher_id: required_str(params, "teacherId")?,
        basic_salary: non_negative(params, "basicSalary", true)?,
        allowances: non_negative(params, "allowances", false)?,
        deductions: non_negative(params, "deductions", false)?,
        month: parse_month(&required_str(params, "month")?)?,
    };
    if input.net() < 0.0 {
        return Err(AppError::invalid(
            "deductions",
            "deductions exceed basic salary plus allowances",
        ));
    }
    Ok(input)
}

const SALARY_SELECT: &str = "SELECT s.id, s.teacher_id, t.first_name || ' ' || t.last_name,
        t.employee_id, s.basic_salary, s.allowances, s.deductions, s.net_salary,
        s.payment_date, s.month, s.status
     FROM salaries s JOIN teachers t ON t.id = s.teacher_id";

fn salary_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "teacherId": r.get::<_, String>(1)?,
        "teacherName": r.get::<_, String>(2)?,
        "employeeId": r.get::<_, String>(3)?,
        "basicSalary": r.get::<_, f64>(4)?,
        "allowances": r.get::<_, f64>(5)?,
        "deductions": r.get::<_, f64>(6)?,
        "netSalary": r.get::<_, f64>(7)?,
        "paymentDate": r.get::<_, Option<String>>(8)?,
        "month": r.get::<_, String>(9)?,
        "status": r.get::<_, String>(10)?,
    }))
}

fn salary_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(&format!("{SALARY_SELECT} WHERE s.id = ?"), [id], salary_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("salary record not found"))
}

fn salaries_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let teacher_id = optional_str(&req.params, "teacherId");
    let month = optional_str(&req.params, "month")
        .map(|m| parse_month(&m))
        .transpose()?;
    let status = optional_str(&req.params, "status")
        .map(|st| {
            SALARY_STATUSES
                .iter()
                .find(|a| a.eq_ignore_ascii_case(&st))
                .map(|a| a.to_string())
                .ok_or_else(|| AppError::invalid("status", "status must be Pending or Paid"))
        })
        .transpose()?;
    let mut stmt = conn.prepare(&format!(
        "{SALARY_SELECT}
         WHERE (?1 IS NULL OR s.teacher_id = ?1)
           AND (?2 IS NULL OR s.month = ?2)
           AND (?3 IS NULL OR s.status = ?3)
         ORDER BY s.month DESC, t.last_name, t.first_name"
    ))?;
    let salaries = stmt
        .query_map(params![teacher_id, month, status], salary_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    let total_net: f64 = salaries
        .iter()
        .filter_map(|s| s.get("netSalary").and_then(|v| v.as_f64()))
        .sum();
    Ok(json!({ "salaries": salaries, "totalNet": round_2(total_net) }))
}

fn salaries_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let s = salary_input(&req.params)?;
    ensure_exists(conn, "teachers", &s.teacher_id, "teacher")?;
    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO salaries(id, teacher_id, basic_salary, allowances, deductions, net_salary,
                              payment_date, month, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, NULL, ?, 'Pending', ?, ?)",
        params![
            id,
            s.teacher_id,
            s.basic_salary,
            s.allowances,
            s.deductions,
            s.net(),
            s.month,
            now,
            now
        ],
    )?;
    Ok(json!({ "salary": salary_json(conn, &id)? }))
}

fn salaries_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "salaryId")?;
    ensure_exists(conn, "salaries", &id, "salary record")?;
    let s = salary_input(&req.params)?;
    ensure_exists(conn, "teachers", &s.teacher_id, "teacher")?;
    conn.execute(
        "UPDATE salaries SET teacher_id = ?, basic_salary = ?, allowances = ?, deductions = ?,
                net_salary = ?, month = ?, updated_at = ?
         WHERE id = ?",
        params![
            s.teacher_id,
            s.basic_salary,
            s.allowances,
            s.deductions,
            s.net(),
            s.month,
            now_ts(),
            id
        ],
    )?;
    Ok(json!({ "salary": salary_json(conn, &id)? }))
}

fn salaries_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "salaryId")?;
    let n = conn.execute("DELETE FROM salaries WHERE id = ?", [&id])?;
    if n == 0 {
        return Err(AppError::not_found("salary record not found"));
    }
    Ok(json!({ "ok": true }))
}

fn salaries_mark_paid(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "salaryId")?;
    ensure_exists(conn, "salaries", &id, "salary record")?;
    let paid_on = optional_date(&req.params, "paymentDate")?.unwrap_or_else(today);
    conn.execute(
        "UPDATE salaries SET status = 'Paid', payment_date = ?, updated_at = ? WHERE id = ?",
        params![paid_on, now_ts(), id],
    )?;
    Ok(json!({ "salary": salary_json(conn, &id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "salaries.list" => salaries_list(state, req),
        "salaries.create" => salaries_create(state, req),
        "salaries.update" => salaries_update(state, req),
        "salaries.delete" => salaries_delete(state, req),
        "salaries.markPaid" => salaries_mark_paid(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
