use crate::calc;
use crate::db::{new_id, now_ts, today};
use crate::error::{AppError, AppResult};
use crate::grading::round_2;
use crate::ipc::helpers::{
    ensure_exists, optional_bool, optional_date, optional_str, required_date, required_f64,
    required_str, respond, scoped, year_scope,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::HashSet;

pub const PAYMENT_METHODS: [&str; 3] = ["Cash", "Online", "Cheque"];
pub const PAYMENT_STATUSES: [&str; 3] = ["Completed", "Pending", "Failed"];

const RECENT_PAYMENTS: i64 = 10;

pub fn receipt_number(receipt_no: i64) -> String {
    format!("RCP-{:06}", receipt_no)
}

fn one_of(field: &'static str, value: &str, allowed: &[&str]) -> AppResult<String> {
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(value))
        .map(|a| a.to_string())
        .ok_or_else(|| AppError::invalid(field, format!("{} must be one of {}", field, allowed.join(", "))))
}

// ------------------------------------------------------------ fee heads

fn fee_head_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "amount": r.get::<_, f64>(2)?,
        "applicableClass": r.get::<_, Option<String>>(3)?,
        "academicYearId": r.get::<_, String>(4)?,
        "dueDate": r.get::<_, String>(5)?,
        "isActive": r.get::<_, i64>(6)? != 0,
        "collected": round_2(r.get::<_, f64>(7)?),
        "paymentCount": r.get::<_, i64>(8)?,
    }))
}

const FEE_HEAD_SELECT: &str = "SELECT h.id, h.name, h.amount, h.applicable_class, h.academic_year_id,
        h.due_date, h.is_active,
        COALESCE((SELECT SUM(p.amount_paid) FROM fee_payments p
                  WHERE p.fee_head_id = h.id AND p.status = 'Completed'), 0.0),
        (SELECT COUNT(*) FROM fee_payments p WHERE p.fee_head_id = h.id)
     FROM fee_heads h";

fn fee_head_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(&format!("{FEE_HEAD_SELECT} WHERE h.id = ?"), [id], fee_head_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("fee head not found"))
}

struct FeeHeadInput {
    name: String,
    amount: f64,
    applicable_class: Option<String>,
    due_date: NaiveDate,
}

fn fee_head_input(params: &Value) -> AppResult<FeeHeadInput> {
    let amount = required_f64(params, "amount")?;
    if amount <= 0.0 {
        return Err(AppError::invalid("amount", "amount must be greater than zero"));
    }
    Ok(FeeHeadInput {
        name: required_str(params, "name")?,
        amount,
        applicable_class: optional_str(params, "applicableClass"),
        due_date: required_date(params, "dueDate")?,
    })
}

fn heads_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let year = year_scope(conn, &req.params)?;
    let include_inactive = optional_bool(&req.params, "includeInactive")?.unwrap_or(false);
    let mut stmt = conn.prepare(&format!(
        "{FEE_HEAD_SELECT}
         WHERE h.academic_year_id = ? AND (h.is_active = 1 OR ?)
         ORDER BY h.due_date, h.name"
    ))?;
    let heads = stmt
        .query_map(params![year.id, include_inactive], fee_head_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "academicYearId": year.id, "feeHeads": heads }))
}

fn heads_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let input = fee_head_input(&req.params)?;
    let year = year_scope(conn, &req.params)?;
    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO fee_heads(id, name, amount, applicable_class, academic_year_id, due_date,
                               is_active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![
            id,
            input.name,
            input.amount,
            input.applicable_class,
            year.id,
            input.due_date,
            now,
            now
        ],
    )?;
    Ok(json!({ "feeHead": fee_head_json(conn, &id)? }))
}

fn heads_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "feeHeadId")?;
    ensure_exists(conn, "fee_heads", &id, "fee head")?;
    let input = fee_head_input(&req.params)?;
    let is_active = optional_bool(&req.params, "isActive")?;
    conn.execute(
        "UPDATE fee_heads SET name = ?, amount = ?, applicable_class = ?, due_date = ?,
                is_active = COALESCE(?, is_active), updated_at = ?
         WHERE id = ?",
        params![
            input.name,
            input.amount,
            input.applicable_class,
            input.due_date,
            is_active,
            now_ts(),
            id
        ],
    )?;
    Ok(json!({ "feeHead": fee_head_json(conn, &id)? }))
}

/// Heads with payments are deactivated; unused heads are removed.
fn heads_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "feeHeadId")?;
    ensure_exists(conn, "fee_heads", &id, "fee head")?;
    let payments: i64 = conn.query_row(
        "SELECT COUNT(*) FROM fee_payments WHERE fee_head_id = ?",
        [&id],
        |r| r.get(0),
    )?;
    if payments > 0 {
        conn.execute(
            "UPDATE fee_heads SET is_active = 0, updated_at = ? WHERE id = ?",
            params![now_ts(), id],
        )?;
        return Ok(json!({ "deleted": "soft", "paymentCount": payments }));
    }
    conn.execute("DELETE FROM reminder_logs WHERE fee_head_id = ?", [&id])?;
    conn.execute("DELETE FROM fee_heads WHERE id = ?", [&id])?;
    Ok(json!({ "deleted": "hard", "paymentCount": 0 }))
}

// ------------------------------------------------------------- payments

const PAYMENT_SELECT: &str = "SELECT p.id, p.receipt_no, p.student_id,
        s.first_name || ' ' || s.last_name, s.admission_number, p.fee_head_id, h.name,
        p.amount_paid, p.payment_date, p.payment_method, p.transaction_id, p.status
     FROM fee_payments p
     JOIN students s ON s.id = p.student_id
     JOIN fee_heads h ON h.id = p.fee_head_id";

fn payment_row(r: &Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "receiptNumber": receipt_number(r.get::<_, i64>(1)?),
        "studentId": r.get::<_, String>(2)?,
        "studentName": r.get::<_, String>(3)?,
        "admissionNumber": r.get::<_, String>(4)?,
        "feeHeadId": r.get::<_, String>(5)?,
        "feeName": r.get::<_, String>(6)?,
        "amountPaid": r.get::<_, f64>(7)?,
        "paymentDate": r.get::<_, String>(8)?,
        "paymentMethod": r.get::<_, String>(9)?,
        "transactionId": r.get::<_, Option<String>>(10)?,
        "status": r.get::<_, String>(11)?,
    }))
}

pub fn payment_json(conn: &Connection, id: &str) -> AppResult<Value> {
    conn.query_row(&format!("{PAYMENT_SELECT} WHERE p.id = ?"), [id], payment_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("payment not found"))
}

fn payments_record(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    let student_id = match scope.student_id() {
        Some(own) => own.to_string(),
        None => required_str(&req.params, "studentId")?,
    };
    scope.require_student_access(&student_id)?;
    let head_id = required_str(&req.params, "feeHeadId")?;
    let amount = required_f64(&req.params, "amountPaid")?;
    if amount <= 0.0 {
        return Err(AppError::invalid("amountPaid", "amount must be greater than zero"));
    }
    let method = one_of(
        "paymentMethod",
        &optional_str(&req.params, "paymentMethod").unwrap_or_else(|| "Cash".into()),
        &PAYMENT_METHODS,
    )?;
    let status = one_of(
        "status",
        &optional_str(&req.params, "status").unwrap_or_else(|| "Completed".into()),
        &PAYMENT_STATUSES,
    )?;
    let payment_date = optional_date(&req.params, "paymentDate")?.unwrap_or_else(today);

    let student_active: Option<i64> = conn
        .query_row("SELECT is_active FROM students WHERE id = ?", [&student_id], |r| r.get(0))
        .optional()?;
    match student_active {
        None => return Err(AppError::not_found("student not found")),
        Some(0) => return Err(AppError::invalid("studentId", "student is inactive")),
        Some(_) => {}
    }
    let head_active: Option<i64> = conn
        .query_row("SELECT is_active FROM fee_heads WHERE id = ?", [&head_id], |r| r.get(0))
        .optional()?;
    match head_active {
        None => return Err(AppError::not_found("fee head not found")),
        Some(0) => return Err(AppError::invalid("feeHeadId", "fee head is no longer active")),
        Some(_) => {}
    }

    let id = new_id();
    let now = now_ts();
    let transaction_id = optional_str(&req.params, "transactionId")
        .unwrap_or_else(|| format!("TXN-{}", chrono::Utc::now().timestamp_millis()));
    let tx = conn.unchecked_transaction()?;
    let receipt_no: i64 = tx.query_row(
        "SELECT COALESCE(MAX(receipt_no), 0) + 1 FROM fee_payments",
        [],
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO fee_payments(id, student_id, fee_head_id, receipt_no, amount_paid, payment_date,
                                  payment_method, transaction_id, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            student_id,
            head_id,
            receipt_no,
            amount,
            payment_date,
            method,
            transaction_id,
            status,
            now,
            now
        ],
    )?;
    tx.commit()?;
    Ok(json!({ "payment": payment_json(conn, &id)? }))
}

fn payments_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    let student_filter = match scope.student_id() {
        Some(own) => own.to_string(),
        None => {
            scope.require_staff()?;
            optional_str(&req.params, "studentId").unwrap_or_default()
        }
    };
    let head_filter = optional_str(&req.params, "feeHeadId").unwrap_or_default();
    let year = year_scope(conn, &req.params)?;
    let mut stmt = conn.prepare(&format!(
        "{PAYMENT_SELECT}
         WHERE h.academic_year_id = ?1
           AND (?2 = '' OR p.student_id = ?2)
           AND (?3 = '' OR p.fee_head_id = ?3)
         ORDER BY p.payment_date DESC, p.receipt_no DESC"
    ))?;
    let payments = stmt
        .query_map(params![year.id, student_filter, head_filter], payment_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "payments": payments }))
}

fn payments_set_status(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "paymentId")?;
    ensure_exists(conn, "fee_payments", &id, "payment")?;
    let status = one_of("status", &required_str(&req.params, "status")?, &PAYMENT_STATUSES)?;
    conn.execute(
        "UPDATE fee_payments SET status = ?, updated_at = ? WHERE id = ?",
        params![status, now_ts(), id],
    )?;
    Ok(json!({ "payment": payment_json(conn, &id)? }))
}

// ------------------------------------------------------------ statement

fn statement_status(amount: f64, paid: f64, due: NaiveDate, on: NaiveDate) -> &'static str {
    if paid >= amount {
        "Paid"
    } else if due < on {
        "Overdue"
    } else {
        "Pending"
    }
}

/// Student classes in the given year, used to scope class-specific heads.
fn student_classes(conn: &Connection, student_id: &str, year_id: &str) -> AppResult<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT cs.class_name FROM enrollments e
         JOIN class_sections cs ON cs.id = e.class_section_id
         WHERE e.student_id = ? AND e.academic_year_id = ? AND e.is_active = 1",
    )?;
    let classes = stmt
        .query_map(params![student_id, year_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())?;
    Ok(classes)
}

fn fees_statement(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    let student_id = match scope.student_id() {
        Some(own) => own.to_string(),
        None => required_str(&req.params, "studentId")?,
    };
    scope.require_student_access(&student_id)?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let year = year_scope(conn, &req.params)?;
    let on = today();
    let classes = student_classes(conn, &student_id, &year.id)?;

    let mut lines = Vec::new();
    let (mut total_due, mut total_paid) = (0.0, 0.0);
    for head in calc::active_fee_heads(conn, &year)? {
        if let Some(c) = head.applicable_class.as_deref() {
            if !classes.contains(c) {
                continue;
            }
        }
        let paid: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_paid), 0.0) FROM fee_payments
             WHERE student_id = ? AND fee_head_id = ? AND status = 'Completed'",
            params![student_id, head.id],
            |r| r.get(0),
        )?;
        total_due += head.amount;
        total_paid += paid;
        lines.push(json!({
            "feeHeadId": head.id,
            "feeName": head.name,
            "amount": round_2(head.amount),
            "paid": round_2(paid),
            "balance": round_2((head.amount - paid).max(0.0)),
            "dueDate": head.due_date,
            "status": statement_status(head.amount, paid, head.due_date, on),
        }));
    }

    let mut stmt = conn.prepare(&format!(
        "{PAYMENT_SELECT}
         WHERE p.student_id = ? AND h.academic_year_id = ?
         ORDER BY p.payment_date DESC, p.receipt_no DESC
         LIMIT ?"
    ))?;
    let recent = stmt
        .query_map(params![student_id, year.id, RECENT_PAYMENTS], payment_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({
        "studentId": student_id,
        "academicYearId": year.id,
        "lines": lines,
        "totalDue": round_2(total_due),
        "totalPaid": round_2(total_paid),
        "balance": round_2((total_due - total_paid).max(0.0)),
        "recentPayments": recent,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "fees.heads.list" => heads_list(state, req),
        "fees.heads.create" => heads_create(state, req),
        "fees.heads.update" => heads_update(state, req),
        "fees.heads.delete" => heads_delete(state, req),
        "fees.payments.record" => payments_record(state, req),
        "fees.payments.list" => payments_list(state, req),
        "fees.payments.setStatus" => payments_set_status(state, req),
        "fees.statement" => fees_statement(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn statement_status_prefers_paid_then_overdue() {
        let on = d("2026-10-18");
        assert_eq!(statement_status(100.0, 100.0, d("2026-01-01"), on), "Paid");
        assert_eq!(statement_status(100.0, 40.0, d("2026-10-17"), on), "Overdue");
        assert_eq!(statement_status(100.0, 40.0, d("2026-10-18"), on), "Pending");
    }

    #[test]
    fn receipt_numbers_are_zero_padded() {
        assert_eq!(receipt_number(7), "RCP-000007");
        assert_eq!(receipt_number(1234567), "RCP-1234567");
    }

    #[test]
    fn payment_method_matching_is_case_insensitive() {
        assert_eq!(one_of("m", "online", &PAYMENT_METHODS).expect("ok"), "Online");
        assert!(one_of("m", "Card", &PAYMENT_METHODS).is_err());
    }
}
