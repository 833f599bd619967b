//! Installation log pipeline.
//!
//! Every `log::*!` record is sent over an unbounded channel to a writer thread
//! that appends timestamped lines to the installation log file. The caller
//! never blocks on disk I/O; `flush()` waits until everything sent before it
//! has been written.
//!
//! ```text
//! log::info!() ...
//!     |
//! [LogCollector] (log::Log impl)
//!     | (crossbeam unbounded channel)
//!     v
//! [writer thread] --> /var/log/nvidia-installer.log
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    /// "full" or "parsed"
    pub log_type: &'static str,
    pub timestamp: String,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            log_type: "full",
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            log_type: "parsed",
            ..LogLine::new(message)
        }
    }
}

/// Writes every log record to the installation log file.
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    level: LevelFilter,
}

impl LogCollector {
    /// Open (truncate) `log_path`, write the header, and start the writer thread.
    ///
    /// # Arguments
    ///
    /// * `log_path` - Installation log file
    /// * `header` - Lines written after the timestamp banner, e.g. option status
    pub fn new(log_path: &Path, header: &[String]) -> Result<Self, String> {
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create log directory: {}", e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(log_path)
            .map_err(|e| format!("Failed to open log file {}: {}", log_path.display(), e))?;

        write_header(&mut file, header)
            .map_err(|e| format!("Failed to write log header: {}", e))?;

        let (tx, rx) = unbounded::<LogMessage>();

        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        if let Err(e) = persist_log_line(&mut file, &line) {
                            eprintln!("[Log] Failed to write log line: {}", e);
                        }
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_path: log_path.to_path_buf(),
            level: LevelFilter::Debug,
        })
    }

    /// Maximum level forwarded to the file.
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Send a log line (non-blocking)
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log_line(LogLine::new(message.into()));
    }

    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log_line(LogLine::parsed(message.into()));
    }

    /// Wait for all pending lines to reach the file.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Install a clone of this collector as the global `log` backend.
    pub fn install_global(&self) -> Result<(), String> {
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| format!("Failed to install logger: {}", e))?;
        log::set_max_level(self.level);
        Ok(())
    }
}

/// Wires all log::info!(), log::warn!(), log::error!() calls into LogCollector
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!("[{}] {}", record.level(), record.args());

            if record.target() == "parsed" {
                self.log_parsed(message);
            } else {
                self.log_str(message);
            }
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}

fn write_header(file: &mut File, header: &[String]) -> std::io::Result<()> {
    writeln!(
        file,
        "nvidia-installer log file '{}'",
        Local::now().format("%a %b %e %H:%M:%S %Y")
    )?;
    for line in header {
        writeln!(file, "{}", line)?;
    }
    writeln!(file)?;
    file.flush()
}

/// Persist a single log line
fn persist_log_line(file: &mut File, line: &LogLine) -> std::io::Result<()> {
    let marker = if line.log_type == "parsed" { "-> " } else { "" };
    writeln!(file, "[{}] {}{}", line.timestamp, marker, line.message)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use tempfile::TempDir;

    #[test]
    fn test_log_collector_creates_file_with_header() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("var/log/installer.log");
        let header = vec!["option status:".to_string(), "  expert : false".to_string()];

        let collector = LogCollector::new(&path, &header).unwrap();
        collector.wait_for_empty().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("nvidia-installer log file"));
        assert!(content.contains("  expert : false"));
        assert_eq!(collector.log_path(), path.as_path());
    }

    #[test]
    fn test_flush_waits_for_every_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("installer.log");
        let collector = LogCollector::new(&path, &[]).unwrap();

        for i in 0..500 {
            collector.log_str(format!("Log message {}", i));
        }
        collector.log_parsed("Installation complete");
        collector.wait_for_empty().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Log message 0"));
        assert!(content.contains("Log message 499"));
        assert!(content.contains("-> Installation complete"));
    }

    #[test]
    fn test_log_trait_routes_records() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("installer.log");
        let collector = LogCollector::new(&path, &[])
            .unwrap()
            .with_level(LevelFilter::Info);

        collector.log(
            &Record::builder()
                .args(format_args!("module built"))
                .level(Level::Info)
                .target("parsed")
                .build(),
        );
        collector.log(
            &Record::builder()
                .args(format_args!("hidden detail"))
                .level(Level::Debug)
                .build(),
        );
        Log::flush(&collector);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("-> [INFO] module built"));
        assert!(!content.contains("hidden detail"));
    }
}
