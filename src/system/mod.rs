//! System module: collaborator interfaces and their default implementations.
//!
//! The installation pipeline reaches the machine only through the traits
//! declared here, so every stage can be driven by recording test doubles.
//!
//! - `probes`: environment checks (X server, loaded modules, TLS, IPC)
//! - `gpu`: GPU enumeration and the legacy-GPU advisory table
//! - `commands`: operation list building and execution
//! - `backup`: backup record and previous-driver removal
//! - `hooks`: distribution-provided hook scripts
//! - `dkms`: DKMS registration
//! - `xconfig`: X configuration tool
//! - `verification`: post-install file checks

pub mod backup;
pub mod commands;
pub mod dkms;
pub mod gpu;
pub mod hooks;
pub mod probes;
pub mod verification;
pub mod xconfig;

use crate::config::{Distro, InstallerOptions};
use crate::error::InstallError;
use crate::models::Package;
use crate::ui::UserInterface;
use commands::OperationList;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Logging macros for convenient access
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::info!("{}", msg);
    }}
}

#[macro_export]
macro_rules! log_parsed {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        // Use target="parsed" for high-level events
        log::info!(target: "parsed", "{}", msg);
    }}
}

/// Read-only view of the machine, plus module unloading.
pub trait EnvironmentProbe {
    /// Lock file of a running X server, if any.
    fn x_server_lock(&self) -> Option<PathBuf>;

    /// Names of currently loaded kernel modules.
    fn loaded_modules(&self) -> Vec<String>;

    fn unload_module(&mut self, name: &str) -> Result<(), String>;

    /// Name of an active alternate driver that blocks installation.
    fn conflicting_driver(&self) -> Option<String>;

    /// Version string of a previously installed driver.
    fn installed_driver_version(&self) -> Option<String>;

    /// PCI device ids of every NVIDIA GPU present.
    fn nvidia_device_ids(&self) -> Vec<u16>;

    /// Whether the C runtime supports the new TLS flavour.
    fn new_tls_supported(&self) -> bool;

    /// Machine architecture, as `uname -m` prints it.
    fn machine_arch(&self) -> String;

    fn distro(&self) -> Distro;

    fn check_sysv_ipc(&self) -> Result<(), String>;

    /// Confirm the dynamic linker resolves the installed libraries.
    fn check_runtime_configuration(&self, package: &Package) -> Result<(), String>;

    /// Problems with the installed files; empty when everything checks out.
    fn check_installed_files(&self, package: &Package) -> Vec<String>;
}

/// Builds and runs the list of filesystem operations for a package.
pub trait OperationPlanner {
    fn build(&self, package: &Package, opts: &InstallerOptions)
        -> Result<OperationList, InstallError>;

    fn execute(
        &mut self,
        list: &OperationList,
        backup: &mut dyn BackupEngine,
        ui: &mut dyn UserInterface,
    ) -> Result<(), InstallError>;
}

/// Keeps enough state to undo an installation.
pub trait BackupEngine {
    /// Remove a previously installed driver, restoring what it replaced.
    fn uninstall_existing_driver(
        &mut self,
        opts: &InstallerOptions,
        ui: &mut dyn UserInterface,
    ) -> Result<(), InstallError>;

    /// Open a fresh record for this installation.
    fn init_record(&mut self, package: &Package, opts: &InstallerOptions)
        -> Result<(), InstallError>;

    /// Note that `path` was created by this installation.
    fn record_installed(&mut self, path: &Path) -> Result<(), String>;

    /// Move `path` out of the way, keeping a copy for restoration.
    fn backup_file(&mut self, path: &Path) -> Result<(), String>;
}

/// Distribution hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroHook {
    PreInstall,
    PostInstall,
    FailedInstall,
}

impl DistroHook {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistroHook::PreInstall => "pre-install",
            DistroHook::PostInstall => "post-install",
            DistroHook::FailedInstall => "failed-install",
        }
    }
}

/// Runs distribution-provided hook scripts.
pub trait HookRunner {
    /// A missing hook succeeds.
    fn run_hook(&mut self, hook: DistroHook) -> Result<(), InstallError>;
}

/// Registers kernel module sources with DKMS.
pub trait DkmsAdapter {
    fn available(&self) -> bool;

    fn register(&mut self, package: &Package, opts: &InstallerOptions)
        -> Result<(), InstallError>;
}

/// Writes the X server configuration.
pub trait XConfigTool {
    /// `Ok(true)` when the configuration file was updated.
    fn run(&mut self, opts: &InstallerOptions) -> Result<bool, String>;
}

/// Locate `name` on PATH.
pub fn find_program(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Run a program with arguments, returning stdout.
///
/// Output is logged; a non-zero exit is an error carrying stderr.
pub fn run_command(program: &str, args: &[&str]) -> Result<String, String> {
    run_command_in(program, args, None)
}

/// `run_command` with an explicit working directory.
pub fn run_command_in(program: &str, args: &[&str], dir: Option<&Path>) -> Result<String, String> {
    log::debug!("[System] Running: {} {}", program, args.join(" "));

    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    let output = command
        .output()
        .map_err(|e| format!("Failed to execute {}: {}", program, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        log::debug!("[{}] stdout: {}", program, stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        log::debug!("[{}] stderr: {}", program, stderr.trim_end());
    }

    if output.status.success() {
        Ok(stdout)
    } else {
        Err(format!(
            "{} exited with status {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        ))
    }
}

/// Run a command line through `/bin/sh -c`.
pub fn run_shell(command: &str) -> Result<String, String> {
    run_shell_in(command, None)
}

/// Run a command line through `/bin/sh -c` inside `dir`.
pub fn run_shell_in(command: &str, dir: Option<&Path>) -> Result<String, String> {
    run_command_in("/bin/sh", &["-c", command], dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_names() {
        assert_eq!(DistroHook::PreInstall.as_str(), "pre-install");
        assert_eq!(DistroHook::FailedInstall.as_str(), "failed-install");
    }

    #[test]
    fn test_run_shell_captures_stdout() {
        assert_eq!(run_shell("echo hello").unwrap().trim(), "hello");
    }

    #[test]
    fn test_run_shell_reports_failure() {
        let err = run_shell("echo oops >&2; exit 3").unwrap_err();
        assert!(err.contains("oops"));
    }

    #[test]
    fn test_run_shell_in_directory() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker"), b"").unwrap();
        let out = run_shell_in("ls", Some(temp.path())).unwrap();
        assert_eq!(out.trim(), "marker");
    }

    #[test]
    fn test_find_program_missing() {
        assert!(find_program("definitely-not-a-real-program-xyz").is_none());
    }
}
