//! Install State Management and Phase Tracking
//!
//! This module provides the state carried through the installation pipeline
//! and the control values each stage returns.
//!
//! **Architecture**:
//! - `InstallPhase`: Enum representing discrete pipeline phases
//! - `PipelineState`: Struct tracking current phase, effective options, and hook status
//! - `Halt`: early-exit value threaded through stages with `?`

use crate::config::InstallerOptions;
use crate::error::InstallError;
use std::path::Path;
use std::time::SystemTime;
use tempfile::TempDir;

/// Install phase enumeration - discrete states in the pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallPhase {
    /// Manifest parsing and environment preconditions
    Preparation,

    /// Kernel module acquisition or DKMS deferral
    KernelModule,

    /// Package trimming, rewriting and destination assignment
    FileSet,

    /// Operation list planning and approval
    Planning,

    /// Backup record, operation list execution, DKMS registration
    Installation,

    /// Hooks, sanity checks and completion message
    PostInstall,

    Completed,

    Failed,
}

impl InstallPhase {
    /// Get the human-readable name for this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallPhase::Preparation => "preparation",
            InstallPhase::KernelModule => "kernel-module",
            InstallPhase::FileSet => "file-set",
            InstallPhase::Planning => "planning",
            InstallPhase::Installation => "installation",
            InstallPhase::PostInstall => "post-install",
            InstallPhase::Completed => "completed",
            InstallPhase::Failed => "failed",
        }
    }
}

/// How an installation attempt ended.
#[derive(Debug)]
pub enum InstallOutcome {
    Success,
    /// The operator said no; nothing went wrong.
    Declined,
    Failed(InstallError),
}

impl InstallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstallOutcome::Success)
    }
}

/// Why a stage stopped the pipeline early.
#[derive(Debug)]
pub enum Halt {
    Declined,
    Failed(InstallError),
}

impl From<InstallError> for Halt {
    fn from(err: InstallError) -> Self {
        Halt::Failed(err)
    }
}

impl From<crate::error::ManifestError> for Halt {
    fn from(err: crate::error::ManifestError) -> Self {
        Halt::Failed(err.into())
    }
}

/// Result of one pipeline stage.
pub type StageResult<T> = std::result::Result<T, Halt>;

/// State threaded through a single installation.
#[derive(Debug)]
pub struct PipelineState {
    pub phase: InstallPhase,

    /// Set once the pre-install hook has been tried, whatever its result.
    pub hook_attempted: bool,

    /// Options as adjusted by earlier stages.
    pub options: InstallerOptions,

    /// Module sources were handed to DKMS instead of being built inline.
    pub dkms_deferred: bool,

    pub start_time: SystemTime,

    scratch: Option<TempDir>,
}

impl PipelineState {
    pub fn new(options: InstallerOptions) -> Self {
        PipelineState {
            phase: InstallPhase::Preparation,
            hook_attempted: false,
            options,
            dkms_deferred: false,
            start_time: SystemTime::now(),
            scratch: None,
        }
    }

    /// Move to `next`, logging the transition.
    pub fn enter(&mut self, next: InstallPhase) {
        log::debug!(
            "[Pipeline] Phase transition: {} -> {}",
            self.phase.as_str(),
            next.as_str()
        );
        self.phase = next;
    }

    /// Directory for derived files, created on first use.
    ///
    /// Lives until the state is dropped, so files written here stay valid
    /// through operation list execution.
    pub fn scratch_dir(&mut self) -> Result<&Path, InstallError> {
        if self.scratch.is_none() {
            let dir = match &self.options.tmpdir {
                Some(base) => TempDir::new_in(base),
                None => TempDir::new(),
            }
            .map_err(|e| {
                InstallError::stage("Scratch directory", format!("cannot create: {}", e))
            })?;
            log::debug!("[Pipeline] Scratch directory: {}", dir.path().display());
            self.scratch = Some(dir);
        }

        match &self.scratch {
            Some(dir) => Ok(dir.path()),
            None => Err(InstallError::stage("Scratch directory", "unavailable")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_in_preparation() {
        let state = PipelineState::new(InstallerOptions::default());
        assert_eq!(state.phase, InstallPhase::Preparation);
        assert!(!state.hook_attempted);
        assert!(!state.dkms_deferred);
    }

    #[test]
    fn test_scratch_dir_is_stable() {
        let mut state = PipelineState::new(InstallerOptions::default());
        let first = state.scratch_dir().unwrap().to_path_buf();
        let second = state.scratch_dir().unwrap().to_path_buf();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn test_install_error_becomes_failed_halt() {
        let halt: Halt = InstallError::PreconditionFailed("x".into()).into();
        assert!(matches!(halt, Halt::Failed(InstallError::PreconditionFailed(_))));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(InstallPhase::KernelModule.as_str(), "kernel-module");
        assert_eq!(InstallPhase::Failed.as_str(), "failed");
    }
}
