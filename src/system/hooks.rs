//! Distribution-provided hook scripts.

use crate::error::InstallError;
use crate::system::{run_command, DistroHook, HookRunner};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Default directory searched for hook scripts.
pub const DEFAULT_HOOK_DIR: &str = "/usr/lib/nvidia";

/// Runs `<dir>/<hook-name>` when it exists and is executable.
#[derive(Debug, Clone)]
pub struct ScriptHookRunner {
    dir: PathBuf,
}

impl ScriptHookRunner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ScriptHookRunner { dir: dir.into() }
    }
}

impl Default for ScriptHookRunner {
    fn default() -> Self {
        ScriptHookRunner::new(DEFAULT_HOOK_DIR)
    }
}

impl HookRunner for ScriptHookRunner {
    fn run_hook(&mut self, hook: DistroHook) -> Result<(), InstallError> {
        let script = self.dir.join(hook.as_str());

        let executable = std::fs::metadata(&script)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if !executable {
            log::debug!("[Hooks] No {} hook at {}", hook.as_str(), script.display());
            return Ok(());
        }

        log::info!("[Hooks] Running {} hook {}", hook.as_str(), script.display());
        let program = script.to_string_lossy();
        run_command(&program, &[])
            .map(|_| ())
            .map_err(|reason| InstallError::HookFailed {
                hook: hook.as_str().to_string(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, name: &str, body: &str) {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_missing_hook_succeeds() {
        let dir = TempDir::new().unwrap();
        let mut runner = ScriptHookRunner::new(dir.path());
        assert!(runner.run_hook(DistroHook::PostInstall).is_ok());
    }

    #[test]
    fn test_failing_hook_reports_name() {
        let dir = TempDir::new().unwrap();
        write_script(&dir, "pre-install", "exit 1");
        let mut runner = ScriptHookRunner::new(dir.path());
        match runner.run_hook(DistroHook::PreInstall) {
            Err(InstallError::HookFailed { hook, .. }) => assert_eq!(hook, "pre-install"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_successful_hook() {
        let dir = TempDir::new().unwrap();
        write_script(&dir, "post-install", "exit 0");
        let mut runner = ScriptHookRunner::new(dir.path());
        assert!(runner.run_hook(DistroHook::PostInstall).is_ok());
    }
}
