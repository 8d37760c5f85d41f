use crate::error::AppResult;
use crate::ipc::helpers::{optional_bool, required_date, required_str, respond, scoped};
use crate::ipc::types::{AppState, Request};
use crate::years::{self, YearInput};
use serde_json::{json, Value};

fn year_input(params: &Value) -> AppResult<YearInput> {
    Ok(YearInput {
        name: required_str(params, "name")?,
        start_date: required_date(params, "startDate")?,
        end_date: required_date(params, "endDate")?,
    })
}

fn years_list(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_staff()?;
    let years = years::list_years(conn)?;
    Ok(json!({ "years": years }))
}

fn years_active(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, _scope) = scoped(state, req)?;
    Ok(json!({ "year": years::get_active_year(conn)? }))
}

fn years_create(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let input = year_input(&req.params)?;
    let activate = optional_bool(&req.params, "isActive")?.unwrap_or(false);
    let year = years::create_year(conn, &input, activate)?;
    Ok(json!({ "year": year }))
}

fn years_update(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let year_id = required_str(&req.params, "yearId")?;
    let input = year_input(&req.params)?;
    let year = years::update_year(conn, &year_id, &input)?;
    Ok(json!({ "year": year }))
}

fn years_delete(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let year_id = required_str(&req.params, "yearId")?;
    years::delete_year(conn, &year_id)?;
    Ok(json!({ "ok": true }))
}

fn years_set_active(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let year_id = required_str(&req.params, "yearId")?;
    let year = years::set_active_year(conn, &year_id)?;
    Ok(json!({ "year": year }))
}

fn years_rollover(state: &AppState, req: &Request) -> AppResult<Value> {
    let (conn, scope) = scoped(state, req)?;
    scope.require_admin()?;
    let from = required_str(&req.params, "fromYearId")?;
    let to = required_str(&req.params, "toYearId")?;
    let outcome = years::rollover(conn, &from, &to)?;
    Ok(json!(outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "years.list" => years_list(state, req),
        "years.active" => years_active(state, req),
        "years.create" => years_create(state, req),
        "years.update" => years_update(state, req),
        "years.delete" => years_delete(state, req),
        "years.setActive" => years_set_active(state, req),
        "years.rollover" => years_rollover(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
