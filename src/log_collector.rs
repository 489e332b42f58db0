//! Logging sink for the build binaries.
//!
//! ```text
//! log::info!() / tool output
//!     |
//! [LogCollector]  (log::Log)
//!     |-- stderr echo (everything except tool output, which already went to stdout)
//!     |
//!     | crossbeam unbounded channel
//!     v
//! [writer thread] --> <log_dir>/<YYYYmmdd_HHMMSS>_<session>.log
//! ```
//!
//! The writer is a plain OS thread so records sent from any tokio worker
//! reach disk. `flush_blocking` waits until everything sent before it has
//! been written.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Target used for subprocess output lines
pub const TOOL_TARGET: &str = "tool";

enum LogMessage {
    Line(String),
    Flush(std::sync::mpsc::Sender<()>),
}

/// `[HH:MM:SS.mmm] [LEVEL] message`
pub fn format_line(level: Level, message: &str) -> String {
    format!("[{}] [{}] {}", Local::now().format("%H:%M:%S%.3f"), level, message)
}

/// `<YYYYmmdd_HHMMSS>_<session>.log`
pub fn session_log_name(session: &str) -> String {
    format!("{}_{}.log", Local::now().format("%Y%m%d_%H%M%S"), session)
}

#[derive(Clone)]
pub struct LogCollector {
    tx: Option<Sender<LogMessage>>,
    log_path: Option<PathBuf>,
    level: LevelFilter,
}

impl LogCollector {
    /// Create a collector. With a `log_dir`, a writer thread appends every
    /// record to a fresh session file in it.
    pub fn new(log_dir: Option<&Path>, session: &str, level: LevelFilter) -> Result<Self, String> {
        let Some(log_dir) = log_dir else {
            return Ok(LogCollector {
                tx: None,
                log_path: None,
                level,
            });
        };

        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create logs directory: {}", e))?;
        let log_path = log_dir.join(session_log_name(session));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to open log file {}: {}", log_path.display(), e))?;

        let (tx, rx) = unbounded::<LogMessage>();
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        if let Err(e) = writeln!(file, "{}", line) {
                            eprintln!("[Log] Failed to write log line: {}", e);
                        }
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = done.send(());
                    }
                }
            }
            let _ = file.flush();
        });

        Ok(LogCollector {
            tx: Some(tx),
            log_path: Some(log_path),
            level,
        })
    }

    /// Register a clone of this collector as the global logger.
    pub fn install(&self) -> Result<(), String> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map(|()| log::set_max_level(self.level))
            .map_err(|e| format!("Failed to install logger: {}", e))
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Queue a line for the log file only
    pub fn log_str(&self, line: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(LogMessage::Line(line.into()));
        }
    }

    /// Block until every line sent so far is on disk.
    pub fn flush_blocking(&self) -> Result<(), String> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        tx.send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // Debug output from dependencies (hyper, reqwest, ...) is noise
        metadata.level() <= self.level
            && (metadata.level() <= Level::Info
                || metadata.target().starts_with(env!("CARGO_CRATE_NAME")))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), &record.args().to_string());
        if record.target() != TOOL_TARGET {
            eprintln!("{}", line);
        }
        self.log_str(line);
    }

    fn flush(&self) {
        let _ = self.flush_blocking();
    }
}
