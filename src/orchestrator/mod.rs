//! Installation Orchestration: staged driver installation pipeline
//! (Preparation -> Kernel module -> File set -> Installation -> Post-install).
//!
//! Every stage returns `StageResult`, so `?` carries an operator decline or a
//! failure straight back to `install`, which reports it, runs the
//! failed-install hook when the pre-install hook was attempted, and releases
//! the package on every path.

pub mod phases;
pub mod state;

pub use state::{Halt, InstallOutcome, InstallPhase, PipelineState, StageResult};

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::kernel::{precompiled, KernelToolchain};
use crate::log_parsed;
use crate::manifest::{parse_manifest, FileSource};
use crate::models::Package;
use crate::system::{
    BackupEngine, DistroHook, DkmsAdapter, EnvironmentProbe, HookRunner, OperationPlanner,
    XConfigTool,
};
use crate::ui::UserInterface;
use phases::prep;
use std::path::PathBuf;

const README_ADVICE: &str = "You may find suggestions on fixing installation problems in the \
     README available on the Linux driver download page at www.nvidia.com.";

const ADD_KERNEL_INTERFACE_FAILED: &str =
    "Unable to add a precompiled kernel interface for the running kernel.";

/// Every external collaborator the pipeline talks to.
pub struct Collaborators<'a> {
    pub ui: &'a mut dyn UserInterface,
    pub probe: &'a mut dyn EnvironmentProbe,
    pub planner: &'a mut dyn OperationPlanner,
    pub backup: &'a mut dyn BackupEngine,
    pub toolchain: &'a mut dyn KernelToolchain,
    pub hooks: &'a mut dyn HookRunner,
    pub dkms: &'a mut dyn DkmsAdapter,
    pub xconfig: &'a mut dyn XConfigTool,
}

/// Operator-facing text for a failed installation.
pub fn failure_message(opts: &InstallerOptions, err: &InstallError) -> String {
    let summary = if opts.logging {
        format!(
            "Installation has failed.  Please see the file '{}' for details.  {}",
            opts.log_file_name.display(),
            README_ADVICE
        )
    } else {
        format!("Installation has failed.  {}", README_ADVICE)
    };
    format!("{}\n\n{}", err.user_message(), summary)
}

/// Install the package found in `opts.package_root`.
pub fn install(opts: InstallerOptions, c: &mut Collaborators<'_>) -> InstallOutcome {
    let mut state = PipelineState::new(opts);
    let mut package: Option<Package> = None;

    let result = run_pipeline(&mut state, &mut package, c);

    let outcome = match result {
        Ok(()) => {
            log_parsed!("Installation complete");
            InstallOutcome::Success
        }
        Err(Halt::Declined) => {
            log_parsed!("Installation declined in phase {}", state.phase.as_str());
            InstallOutcome::Declined
        }
        Err(Halt::Failed(err)) => {
            log_parsed!("Installation failed in phase {}: {}", state.phase.as_str(), err);
            state.enter(InstallPhase::Failed);
            c.ui.error(&failure_message(&state.options, &err));

            if state.hook_attempted {
                if let Err(e) = c.hooks.run_hook(DistroHook::FailedInstall) {
                    log::warn!("[Orchestrator] {}", e);
                }
            }
            InstallOutcome::Failed(err)
        }
    };

    if let Some(package) = package {
        package.release();
    }
    outcome
}

/// `true` when the installation succeeded.
pub fn install_from_package(opts: InstallerOptions, c: &mut Collaborators<'_>) -> bool {
    install(opts, c).is_success()
}

fn run_pipeline(
    state: &mut PipelineState,
    slot: &mut Option<Package>,
    c: &mut Collaborators<'_>,
) -> StageResult<()> {
    let package = slot.insert(prep::load_package(state, c)?);

    prep::warn_about_gpus(package, c);
    prep::check_for_running_x(state, c)?;
    prep::check_for_unloaded_kernel_module(state, package, c)?;
    prep::get_license_acceptance(state, package, c)?;
    c.ui.log(&format!("Installing NVIDIA driver version {}.", package.version));
    prep::check_for_existing_driver(package, c)?;
    prep::run_pre_install_hook(state, c)?;
    prep::check_for_conflicting_driver(c)?;

    state.enter(InstallPhase::KernelModule);
    let kernel = phases::kernel_module_stage(&state.options, package, c)?;
    state.options = kernel.options;
    state.dkms_deferred = kernel.dkms_deferred;

    state.enter(InstallPhase::FileSet);
    phases::transform_file_set(state, package, c)?;

    let list = phases::plan_installation(state, package, c)?;
    phases::execute_installation(state, package, &list, c)?;
    phases::verify_installation(state, package, c)?;
    phases::report_completion(state, package, c);

    state.enter(InstallPhase::Completed);
    Ok(())
}

/// Build a precompiled interface for the running kernel and add it to the package.
pub fn add_kernel_interface(
    opts: &InstallerOptions,
    toolchain: &mut dyn KernelToolchain,
    ui: &mut dyn UserInterface,
) -> bool {
    let mut package: Option<Package> = None;

    let ok = match pack_running_kernel_interface(opts, &mut package, toolchain) {
        Ok(bundle) => {
            ui.message(&format!(
                "Added precompiled kernel interface '{}'.",
                bundle.display()
            ));
            true
        }
        Err(err) => {
            ui.error(&format!("{}\n\n{}", err.user_message(), ADD_KERNEL_INTERFACE_FAILED));
            false
        }
    };

    if let Some(package) = package {
        package.release();
    }
    ok
}

fn pack_running_kernel_interface(
    opts: &InstallerOptions,
    slot: &mut Option<Package>,
    toolchain: &mut dyn KernelToolchain,
) -> Result<PathBuf, InstallError> {
    let root = &opts.package_root;
    let package = slot.insert(parse_manifest(&FileSource::in_package(root), root)?);

    let source = toolchain.kernel_source_path(opts)?;
    let payload = toolchain.build_interface(package, &source)?;
    let signature = toolchain.running_kernel_signature().ok_or_else(|| {
        InstallError::PreconditionFailed(
            "Unable to determine the version string of the running kernel.".to_string(),
        )
    })?;

    precompiled::pack_to_dir(
        &package.precompiled_directory(),
        &package.version,
        &signature,
        &package.description,
        &payload,
    )
    .map_err(|e| InstallError::stage("Packing the kernel interface", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_mentions_log_file() {
        let opts = InstallerOptions::default();
        let msg = failure_message(&opts, &InstallError::PreconditionFailed("X running".into()));
        assert!(msg.starts_with("X running"));
        assert!(msg.contains("Please see the file '/var/log/nvidia-installer.log'"));
    }

    #[test]
    fn test_failure_message_without_logging() {
        let opts = InstallerOptions {
            logging: false,
            ..Default::default()
        };
        let msg = failure_message(&opts, &InstallError::TestFailed("insmod".into()));
        assert!(msg.contains("Installation has failed.  You may find suggestions"));
        assert!(!msg.contains("Please see the file"));
    }
}
