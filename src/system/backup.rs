//! Directory-based backup record.
//!
//! The record is a plain text log inside the backup directory:
//!
//! ```text
//! VERSION 1.0-9631 NVIDIA Accelerated Graphics Driver
//! INSTALL /usr/lib/libGL.so.1.0.9631
//! BACKUP /usr/lib/libGL.so.1 /var/lib/nvidia/1
//! ```
//!
//! Uninstalling a previous driver replays the log backwards: installed files
//! are removed, backed-up files are restored, and the directory is cleared.

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::models::Package;
use crate::system::BackupEngine;
use crate::ui::UserInterface;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default backup directory.
pub const DEFAULT_BACKUP_DIR: &str = "/var/lib/nvidia";

const RECORD_FILE: &str = "log";

/// One line of the backup record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLine {
    Version { version: String, description: String },
    Installed(PathBuf),
    BackedUp { original: PathBuf, saved: PathBuf },
}

impl RecordLine {
    fn parse(line: &str) -> Option<RecordLine> {
        let (tag, rest) = line.split_once(' ')?;
        match tag {
            "VERSION" => {
                let (version, description) = rest.split_once(' ').unwrap_or((rest, ""));
                Some(RecordLine::Version {
                    version: version.to_string(),
                    description: description.to_string(),
                })
            }
            "INSTALL" => Some(RecordLine::Installed(PathBuf::from(rest))),
            "BACKUP" => {
                let (original, saved) = rest.rsplit_once(' ')?;
                Some(RecordLine::BackedUp {
                    original: PathBuf::from(original),
                    saved: PathBuf::from(saved),
                })
            }
            _ => None,
        }
    }
}

/// Read every line of the record in `dir`, skipping lines that do not parse.
pub fn read_record(dir: &Path) -> Option<Vec<RecordLine>> {
    let content = fs::read_to_string(dir.join(RECORD_FILE)).ok()?;
    Some(content.lines().filter_map(RecordLine::parse).collect())
}

/// Version of the driver recorded in `dir`, if any.
pub fn recorded_version(dir: &Path) -> Option<String> {
    read_record(dir)?.into_iter().find_map(|line| match line {
        RecordLine::Version { version, .. } => Some(version),
        _ => None,
    })
}

/// Backup engine storing its record and saved files under one directory.
#[derive(Debug)]
pub struct DirectoryBackup {
    dir: PathBuf,
    record: Option<File>,
    saved: usize,
}

impl DirectoryBackup {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryBackup {
            dir: dir.into(),
            record: None,
            saved: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(&mut self, line: &str) -> Result<(), String> {
        let record = self
            .record
            .as_mut()
            .ok_or_else(|| "backup record has not been initialized".to_string())?;
        writeln!(record, "{}", line).map_err(|e| format!("Cannot write backup record: {}", e))
    }
}

impl Default for DirectoryBackup {
    fn default() -> Self {
        DirectoryBackup::new(DEFAULT_BACKUP_DIR)
    }
}

impl BackupEngine for DirectoryBackup {
    fn uninstall_existing_driver(
        &mut self,
        _opts: &InstallerOptions,
        ui: &mut dyn UserInterface,
    ) -> Result<(), InstallError> {
        let Some(lines) = read_record(&self.dir) else {
            log::debug!("[Backup] No previous installation recorded in {}", self.dir.display());
            return Ok(());
        };

        ui.log("Uninstalling the previously installed driver.");
        let mut problems = Vec::new();

        for line in lines.iter().rev() {
            match line {
                RecordLine::Installed(path) => {
                    if let Err(e) = fs::remove_file(path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            problems.push(format!("cannot remove {}: {}", path.display(), e));
                        }
                    }
                }
                RecordLine::BackedUp { original, saved } => {
                    if let Err(e) = fs::rename(saved, original) {
                        problems.push(format!("cannot restore {}: {}", original.display(), e));
                    }
                }
                RecordLine::Version { .. } => {}
            }
        }

        for problem in &problems {
            ui.warn(&format!("While uninstalling the previous driver: {}", problem));
        }

        fs::remove_dir_all(&self.dir).map_err(|e| {
            InstallError::stage(
                "Previous driver removal",
                format!("cannot clear {}: {}", self.dir.display(), e),
            )
        })
    }

    fn init_record(&mut self, package: &Package, _opts: &InstallerOptions) -> Result<(), InstallError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            InstallError::BackupInitFailed(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.dir.join(RECORD_FILE))
            .map_err(|e| InstallError::BackupInitFailed(e.to_string()))?;
        self.record = Some(file);
        self.saved = 0;

        self.append(&format!("VERSION {} {}", package.version, package.description))
            .map_err(InstallError::BackupInitFailed)
    }

    fn record_installed(&mut self, path: &Path) -> Result<(), String> {
        if self.record.is_none() {
            return Ok(());
        }
        self.append(&format!("INSTALL {}", path.display()))
    }

    fn backup_file(&mut self, path: &Path) -> Result<(), String> {
        if self.record.is_none() {
            return Err("backup record has not been initialized".to_string());
        }

        self.saved += 1;
        let saved = self.dir.join(self.saved.to_string());
        if fs::rename(path, &saved).is_err() {
            // Rename fails across filesystems; fall back to copy and remove.
            fs::copy(path, &saved)
                .and_then(|_| fs::remove_file(path))
                .map_err(|e| format!("Cannot back up {}: {}", path.display(), e))?;
        }
        self.append(&format!("BACKUP {} {}", path.display(), saved.display()))
    }
}
