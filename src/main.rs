mod auth;
mod backup;
mod calc;
mod config;
mod db;
mod error;
mod grading;
mod ipc;
mod logging;
mod reminders;
mod years;

use log::{info, warn};
use serde_json::json;
use std::io::{self, BufRead, Write};

fn main() {
    if let Err(e) = logging::init_from_env() {
        eprintln!("schoold: logging disabled: {}", e);
    }

    let mut state = ipc::AppState::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!("event=stdin_closed module=main error={}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No id to echo back.
            Err(e) => json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() },
            }),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    state.close_workspace();
    info!("event=shutdown module=main");
}
