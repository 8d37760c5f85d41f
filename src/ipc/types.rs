use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::Actor;
use crate::config::Config;
use crate::reminders::{ReminderScheduler, SweepState};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub actor: Option<Actor>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    pub sweep: Arc<SweepState>,
    pub scheduler: Option<ReminderScheduler>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            db: None,
            config: Config::default(),
            sweep: Arc::new(SweepState::default()),
            scheduler: None,
        }
    }

    /// Stops the reminder thread and closes the database.
    pub fn close_workspace(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        self.db = None;
        self.workspace = None;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
