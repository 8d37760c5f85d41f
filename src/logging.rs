//! Daemon logging.
//!
//! Stdout carries responses, so records go to stderr, or to rotating files
//! under `SCHOOLD_LOG_DIR` when that is set. `SCHOOLD_LOG_LEVEL=off`
//! silences everything (the integration tests run that way).

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::str::FromStr;

pub const LEVEL_ENV: &str = "SCHOOLD_LOG_LEVEL";
pub const DIR_ENV: &str = "SCHOOLD_LOG_DIR";

const LOG_BASENAME: &str = "schoold";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_FILES: usize = 5;
const PANIC_MESSAGE_LIMIT: usize = 160;

static LOGGER: OnceCell<LoggerHandle> = OnceCell::new();

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: LevelFilter,
    pub dir: Option<PathBuf>,
}

impl LogSettings {
    /// Builds settings from raw variable values; blank values mean "unset".
    pub fn from_vars(level: Option<&str>, dir: Option<&str>) -> Result<LogSettings, String> {
        let level = match level.map(str::trim).filter(|l| !l.is_empty()) {
            Some(l) => LevelFilter::from_str(l)
                .map_err(|_| format!("{LEVEL_ENV}: unknown level `{l}`"))?,
            None if cfg!(debug_assertions) => LevelFilter::Debug,
            None => LevelFilter::Info,
        };
        let dir = match dir.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => {
                let path = PathBuf::from(d);
                if !path.is_absolute() {
                    return Err(format!("{DIR_ENV} must be an absolute path, got `{d}`"));
                }
                Some(path)
            }
            None => None,
        };
        Ok(LogSettings { level, dir })
    }

    fn spec(&self) -> String {
        self.level.to_string().to_ascii_lowercase()
    }
}

/// Starts the logger from the environment. Later calls are no-ops.
pub fn init_from_env() -> Result<(), String> {
    let level = std::env::var(LEVEL_ENV).ok();
    let dir = std::env::var(DIR_ENV).ok();
    let settings = LogSettings::from_vars(level.as_deref(), dir.as_deref())?;
    LOGGER.get_or_try_init(|| start(&settings))?;
    Ok(())
}

fn start(settings: &LogSettings) -> Result<LoggerHandle, String> {
    let builder = Logger::try_with_str(settings.spec()).map_err(|e| e.to_string())?;
    let handle = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
            builder
                .log_to_file(FileSpec::default().directory(dir).basename(LOG_BASENAME))
                .rotate(
                    Criterion::Size(ROTATE_AT_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(KEEP_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .start()
        }
        None => builder
            .log_to_stderr()
            .format(flexi_logger::detailed_format)
            .start(),
    }
    .map_err(|e| format!("logger failed to start: {e}"))?;

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let thread = std::thread::current();
        error!(
            "event=panic module=schoold thread={} location={} message={}",
            thread.name().unwrap_or("unnamed"),
            panic
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown".into()),
            one_line(panic_text(panic.payload()), PANIC_MESSAGE_LIMIT)
        );
        previous(panic);
    }));

    info!(
        "event=app_start module=schoold version={} level={} target={}",
        env!("CARGO_PKG_VERSION"),
        settings.spec(),
        settings
            .dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "stderr".into())
    );
    Ok(handle)
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Flattens `text` onto one line and caps it at `limit` characters.
fn one_line(text: &str, limit: usize) -> String {
    let mut out: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(limit)
        .collect();
    if text.chars().count() > limit {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_and_dir_come_from_variables() {
        let s = LogSettings::from_vars(Some(" WARN "), Some("/var/log/schoold")).expect("settings");
        assert_eq!(s.level, LevelFilter::Warn);
        assert_eq!(s.dir, Some(PathBuf::from("/var/log/schoold")));
        assert_eq!(s.spec(), "warn");

        let off = LogSettings::from_vars(Some("off"), Some("  ")).expect("off");
        assert_eq!(off.level, LevelFilter::Off);
        assert_eq!(off.dir, None);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(LogSettings::from_vars(Some("verbose"), None).is_err());
        let err = LogSettings::from_vars(None, Some("logs")).expect_err("relative dir");
        assert!(err.contains("absolute"));
    }

    #[test]
    fn panic_messages_are_flattened_and_capped() {
        assert_eq!(one_line("a\nb\rc", 10), "a b c");
        assert_eq!(one_line("abcdefghij", 4), "abcd...");
    }
}
