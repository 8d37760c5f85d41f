use crate::db::{new_id, now_ts};
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{
    constraint_conflict, ensure_exists, optional_i64, required_str, respond, scoped,
};
use crate::ipc::types::{AppState, Request};
use crate::years;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

const DEFAULT_CAPACITY: i64 = 40;

fn class_json(conn: &Connection, class_id: &str) -> AppResult<Value> {
    conn.query_row(
        "SELECT id, class_name, section, capacity FROM class_sections WHERE id = ?",
        [class_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "className": r.get::<_, String>(1)?,
                "section": r.get::<_, String>(2)?,
                "capacity": r.get::<_, i64>(3)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("class section not found"))
}

fn validate_capacity(capacity: i64) -> AppResult<i64> {
    if capacity < 1 {
        return Err(AppError::invalid("capacity", "capacity must be at least 1"));
    }
    Ok(capacity)
}

fn classes_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let year_id = years::get_active_year(conn)?.map(|y| y.id).unwrap_or_default();

    // Correlated subquery keeps counts from multiplying across joins.
    let mut stmt = conn.prepare(
        "SELECT cs.id, cs.class_name, cs.section, cs.capacity,
                (SELECT COUNT(*) FROM enrollments e
                   WHERE e.class_section_id = cs.id AND e.academic_year_id = ?
                     AND e.is_active = 1) AS enrolled
         FROM class_sections cs
         ORDER BY cs.class_name, cs.section",
    )?;
    let classes = stmt
        .query_map([&year_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "className": r.get::<_, String>(1)?,
                "section": r.get::<_, String>(2)?,
                "capacity": r.get::<_, i64>(3)?,
                "enrolledCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let class_name = required_str(&req.params, "className")?;
    let section = required_str(&req.params, "section")?;
    let capacity = validate_capacity(
        optional_i64(&req.params, "capacity")?.unwrap_or(DEFAULT_CAPACITY),
    )?;

    let id = new_id();
    let now = now_ts();
    conn.execute(
        "INSERT INTO class_sections(id, class_name, section, capacity, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![id, class_name, section, capacity, now, now],
    )
    .map_err(|e| constraint_conflict(e, "section", "this class and section already exist"))?;
    Ok(json!({ "classSection": class_json(conn, &id)? }))
}

fn classes_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "classSectionId")?;
    ensure_exists(conn, "class_sections", &id, "class section")?;
    let class_name = required_str(&req.params, "className")?;
    let section = required_str(&req.params, "section")?;
    let capacity = validate_capacity(
        optional_i64(&req.params, "capacity")?.unwrap_or(DEFAULT_CAPACITY),
    )?;
    conn.execute(
        "UPDATE class_sections SET class_name = ?, section = ?, capacity = ?, updated_at = ?
         WHERE id = ?",
        params![class_name, section, capacity, now_ts(), id],
    )
    .map_err(|e| constraint_conflict(e, "section", "this class and section already exist"))?;
    Ok(json!({ "classSection": class_json(conn, &id)? }))
}

fn classes_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let id = required_str(&req.params, "classSectionId")?;
    ensure_exists(conn, "class_sections", &id, "class section")?;
    let active: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE class_section_id = ? AND is_active = 1",
        [&id],
        |r| r.get(0),
    )?;
    if active > 0 {
        return Err(AppError::conflict(
            "classSectionId",
            format!("cannot delete: {active} active enrollment(s) in this class section"),
        ));
    }
    conn.execute("DELETE FROM class_sections WHERE id = ?", [&id])
        .map_err(|e| {
            constraint_conflict(
                e,
                "classSectionId",
                "cannot delete: class section has enrollment or attendance history",
            )
        })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state, req),
        "classes.create" => classes_create(state, req),
        "classes.update" => classes_update(state, req),
        "classes.delete" => classes_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
