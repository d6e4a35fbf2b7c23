use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::{AppError, AppResult};

/// Daily log file that mirrors everything the console logger accepts
pub struct AppLogger {
    file: Mutex<Option<File>>,
    path: PathBuf,
}

impl AppLogger {
    pub fn new(log_dir: &Path) -> Self {
        let date = Local::now().format("%Y-%m-%d").to_string();
        let path = log_dir.join(format!("picave-{}.log", date));

        // Ensure directory exists
        std::fs::create_dir_all(log_dir).ok();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok();

        Self {
            file: Mutex::new(file),
            path,
        }
    }

    pub fn write_line(&self, level: Level, message: &str) {
        let line = format_line(level, message);
        if let Ok(mut file_lock) = self.file.lock() {
            if let Some(file) = file_lock.as_mut() {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.path
    }
}

fn format_line(level: Level, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    format!("[{}] [{}] {}\n", timestamp, level.as_str(), message)
}

/// env_logger on stderr, optionally teed into an `AppLogger` file
struct TeeLogger {
    console: env_logger::Logger,
    file: Option<AppLogger>,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);
        if let Some(file) = &self.file {
            file.write_line(record.level(), &record.args().to_string());
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file_lock) = file.file.lock() {
                if let Some(f) = file_lock.as_mut() {
                    let _ = f.flush();
                }
            }
        }
    }
}

/// Install the process-wide logger.
///
/// `RUST_LOG` overrides `default_level`. When `log_dir` is given, lines are also
/// appended to `picave-YYYY-MM-DD.log` in that directory. Returns the log file
/// path, if any.
pub fn init_logging(log_dir: Option<&Path>, default_level: LevelFilter) -> AppResult<Option<PathBuf>> {
    let env = env_logger::Env::default().default_filter_or(default_level.as_str());
    let console = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .build();
    let max_level = console.filter();

    let file = log_dir.map(AppLogger::new);
    let file_path = file.as_ref().map(|f| f.log_path().clone());

    log::set_boxed_logger(Box::new(TeeLogger { console, file }))
        .map_err(|e| AppError::Other(format!("Logger already initialised: {}", e)))?;
    log::set_max_level(max_level);

    Ok(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format_has_timestamp_and_level() {
        let line = format_line(Level::Warn, "cache directory missing");
        assert!(line.starts_with('['));
        assert!(line.contains("] [WARN] cache directory missing"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn app_logger_appends_to_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AppLogger::new(dir.path());
        logger.write_line(Level::Info, "first");
        logger.write_line(Level::Error, "second");

        let name = logger.log_path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("picave-") && name.ends_with(".log"));

        let content = std::fs::read_to_string(logger.log_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].ends_with("[ERROR] second"));
    }
}
