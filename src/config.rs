use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "schoold.json";

const DEFAULT_INTERVAL_SECS: u64 = 6 * 60 * 60;
const DEFAULT_UPCOMING_WINDOW_DAYS: i64 = 7;
const MAX_UPCOMING_WINDOW_DAYS: i64 = 90;

/// Workspace configuration read from `<workspace>/schoold.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub reminders: ReminderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_seconds: u64,
    #[serde(default = "default_upcoming_window_days")]
    pub upcoming_window_days: i64,
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_upcoming_window_days() -> i64 {
    DEFAULT_UPCOMING_WINDOW_DAYS
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: DEFAULT_INTERVAL_SECS,
            upcoming_window_days: DEFAULT_UPCOMING_WINDOW_DAYS,
        }
    }
}

impl Config {
    /// Loads the workspace config; a missing file yields defaults.
    pub fn load(workspace: &Path) -> AppResult<Config> {
        let path = workspace.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> AppResult<Config> {
        let cfg: Config = serde_json::from_str(text)
            .map_err(|e| AppError::Config(format!("{CONFIG_FILE}: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> AppResult<()> {
        if self.reminders.interval_seconds == 0 {
            return Err(AppError::Config(
                "reminders.intervalSeconds must be at least 1".into(),
            ));
        }
        if !(0..=MAX_UPCOMING_WINDOW_DAYS).contains(&self.reminders.upcoming_window_days) {
            return Err(AppError::Config(format!(
                "reminders.upcomingWindowDays must be between 0 and {MAX_UPCOMING_WINDOW_DAYS}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg = Config::parse("{}").expect("parse");
        assert_eq!(cfg, Config::default());
        assert!(!cfg.reminders.enabled);
        assert_eq!(cfg.reminders.interval_seconds, 21600);
        assert_eq!(cfg.reminders.upcoming_window_days, 7);
    }

    #[test]
    fn partial_reminder_section_keeps_other_defaults() {
        let cfg = Config::parse(r#"{"reminders":{"enabled":true}}"#).expect("parse");
        assert!(cfg.reminders.enabled);
        assert_eq!(cfg.reminders.interval_seconds, 21600);
    }

    #[test]
    fn rejects_zero_interval_and_bad_json() {
        let e = Config::parse(r#"{"reminders":{"intervalSeconds":0}}"#).expect_err("zero");
        assert_eq!(e.code(), "config_invalid");
        let e = Config::parse("{not json").expect_err("bad json");
        assert_eq!(e.code(), "config_invalid");
        let e = Config::parse(r#"{"reminders":{"upcomingWindowDays":-1}}"#).expect_err("window");
        assert_eq!(e.code(), "config_invalid");
    }
}
