//! Session logger, installed as the backend of the `log` facade.
//!
//! The file is truncated at each launch, so it only holds output from the
//! most recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\Colorbook\colorbook.log`
//!   Linux:    `~/.local/share/Colorbook/colorbook.log`
//!   macOS:    `~/Library/Application Support/Colorbook/colorbook.log`
//!
//! Records at or above the configured level also go to stderr when `echo`
//! is set (the CLI does this for `--verbose`).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

struct SessionLogger {
    file: Option<Mutex<File>>,
    echo: bool,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] {}: {}",
            timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(file) = &self.file {
            let _ = writeln!(file.lock(), "{}", line);
        }
        if self.echo {
            eprintln!("{}", line);
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

/// Returns the path to the current session log file.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Initialise the session logger. Later calls are no-ops.
///
/// * Creates (or truncates) the log file; failure to open it is not fatal.
/// * Installs a panic hook that writes the panic message to the log before
///   running the previous handler.
pub fn init(level: LevelFilter, echo: bool) {
    if LOGGER.get().is_some() {
        return;
    }
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(f) => {
            let _ = LOG_PATH.set(path.clone());
            Some(Mutex::new(f))
        }
        Err(e) => {
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            None
        }
    };

    let logger = LOGGER.get_or_init(|| SessionLogger { file, echo });
    if log::set_logger(logger).is_err() {
        // Another backend won the race (tests, embedding host)
        return;
    }
    log::set_max_level(level);

    if let Some(file) = &logger.file {
        let mut f = file.lock();
        let _ = writeln!(f, "=== Colorbook session started {} ===", human_timestamp());
        let _ = writeln!(f, "Log file: {}", path.display());
        let _ = writeln!(f);
    }

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!(target: "panic", "{}", info);
        log::logger().flush();
        prev(info);
    }));
}

fn log_file_path() -> PathBuf {
    data_dir().join("Colorbook").join("colorbook.log")
}

/// Platform data directory (without the app sub-folder).
pub fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from(".")
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

fn human_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
