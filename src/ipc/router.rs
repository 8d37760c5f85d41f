use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[Handler] = &[
    handlers::core::try_handle,
    handlers::years::try_handle,
    handlers::classes::try_handle,
    handlers::courses::try_handle,
    handlers::teachers::try_handle,
    handlers::subjects::try_handle,
    handlers::students::try_handle,
    handlers::enrollments::try_handle,
    handlers::fees::try_handle,
    handlers::attendance::try_handle,
    handlers::exams::try_handle,
    handlers::marks::try_handle,
    handlers::payroll::try_handle,
    handlers::reports::try_handle,
    handlers::reminders::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    for handler in HANDLERS {
        if let Some(resp) = handler(state, &req) {
            return resp;
        }
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
