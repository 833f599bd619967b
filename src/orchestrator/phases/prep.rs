//! Phase 1: Preparation - manifest parsing and environment preconditions.
//!
//! This module handles everything that must hold before the package is touched:
//! - The manifest parses and the session is titled after the package
//! - No X server is running and no stale kernel module is loaded
//! - The license is accepted and an existing driver may be replaced
//! - The distribution pre-install hook ran (or the operator chose to go on)
//! - No conflicting driver is active

use crate::error::InstallError;
use crate::log_info;
use crate::manifest::{parse_manifest, FileSource};
use crate::models::Package;
use crate::orchestrator::state::{Halt, PipelineState, StageResult};
use crate::orchestrator::Collaborators;
use crate::system::{gpu, DistroHook};
use std::fs;

/// File in the package root holding the license text.
pub const LICENSE_FILE_NAME: &str = "LICENSE";

/// Parse the package manifest and title the session after it.
pub fn load_package(state: &PipelineState, c: &mut Collaborators<'_>) -> StageResult<Package> {
    let root = &state.options.package_root;
    let package = parse_manifest(&FileSource::in_package(root), root)?;

    c.ui.set_title(&format!("{} ({})", package.description, package.version));
    log_info!(
        "[Prep] Parsed manifest: {} entries, kernel module '{}'",
        package.len(),
        package.kernel_module_name
    );
    Ok(package)
}

/// Warn about legacy or unsupported GPUs. Never stops the pipeline.
pub fn warn_about_gpus(package: &Package, c: &mut Collaborators<'_>) {
    let ids = c.probe.nvidia_device_ids();
    for warning in gpu::advisory_warnings(&ids, &package.version) {
        c.ui.warn(&warning);
    }
}

fn skip_running_kernel_checks(state: &PipelineState) -> bool {
    state.options.kernel_module_only && state.options.targets_other_kernel()
}

/// Fail if an X server appears to be running.
pub fn check_for_running_x(state: &PipelineState, c: &mut Collaborators<'_>) -> StageResult<()> {
    if skip_running_kernel_checks(state) {
        c.ui.log(
            "Only installing a kernel module for a non-running kernel; skipping the \
             \"is an X server running?\" test.",
        );
        return Ok(());
    }

    if let Some(lock) = c.probe.x_server_lock() {
        c.ui.log(&format!(
            "The file '{}' exists... an X server appears to be running",
            lock.display()
        ));
        return Err(Halt::Failed(InstallError::PreconditionFailed(
            "You appear to be running an X server; please exit X before installing.  \
             For further details, please see the section INSTALLING THE NVIDIA DRIVER in \
             the README available on the Linux driver download page at www.nvidia.com."
                .to_string(),
        )));
    }
    Ok(())
}

/// Unload any loaded copy of the module; fail if one stays loaded.
pub fn check_for_unloaded_kernel_module(
    state: &PipelineState,
    package: &Package,
    c: &mut Collaborators<'_>,
) -> StageResult<()> {
    if skip_running_kernel_checks(state) {
        c.ui.log(
            "Only installing a kernel module for a non-running kernel; skipping the \
             \"is an NVIDIA kernel module loaded?\" test.",
        );
        return Ok(());
    }
    if state.options.no_kernel_module {
        c.ui.log(
            "Not installing a kernel module; skipping the \"is an NVIDIA kernel module \
             loaded?\" test.",
        );
        return Ok(());
    }

    let mut candidates: Vec<&str> = vec![package.kernel_module_name.as_str()];
    for name in &package.bad_modules {
        if !candidates.contains(&name.as_str()) {
            candidates.push(name);
        }
    }

    let loaded = c.probe.loaded_modules();
    for name in candidates.into_iter().filter(|n| !n.is_empty()) {
        if !loaded.iter().any(|m| m == name) {
            continue;
        }

        if let Err(e) = c.probe.unload_module(name) {
            log::warn!("[Prep] Unloading '{}' failed: {}", name, e);
        }

        if c.probe.loaded_modules().iter().any(|m| m == name) {
            return Err(Halt::Failed(InstallError::PreconditionFailed(format!(
                "An NVIDIA kernel module '{}' appears to already be loaded in your kernel.  \
                 This may be because it is in use (for example, by the X server), but may \
                 also happen if your kernel was configured without support for module \
                 unloading.  Please be sure you have exited X before attempting to upgrade \
                 your driver.  If you have exited X, know that your kernel supports module \
                 unloading, and still receive this message, then an error may have occurred \
                 that has corrupted the NVIDIA kernel module's usage count; the simplest \
                 remedy is to reboot your computer.",
                name
            ))));
        }
        log_info!("[Prep] Unloaded kernel module '{}'", name);
    }
    Ok(())
}

/// Show the license unless it was accepted up front.
pub fn get_license_acceptance(
    state: &PipelineState,
    package: &Package,
    c: &mut Collaborators<'_>,
) -> StageResult<()> {
    if state.options.accept_license {
        c.ui.log("License accepted by command line option.");
        return Ok(());
    }

    let path = package.resolve(LICENSE_FILE_NAME);
    let text = fs::read_to_string(&path).map_err(|e| {
        InstallError::PreconditionFailed(format!(
            "Unable to open License file '{}' ({}).",
            path.display(),
            e
        ))
    })?;

    if c.ui.display_license(&text) {
        c.ui.log("License accepted.");
        Ok(())
    } else {
        c.ui.message("License not accepted.  Aborting installation.");
        Err(Halt::Declined)
    }
}

/// Confirm replacing a previously installed driver.
pub fn check_for_existing_driver(package: &Package, c: &mut Collaborators<'_>) -> StageResult<()> {
    let Some(installed) = c.probe.installed_driver_version() else {
        return Ok(());
    };

    let proceed = c.ui.yes_no(
        true,
        &format!(
            "There appears to already be a driver installed on your system (version: {}).  \
             As part of installing this driver (version: {}), the existing driver will be \
             uninstalled.  Are you sure you want to continue? ('no' will abort installation)",
            installed, package.version
        ),
    );

    if proceed {
        Ok(())
    } else {
        c.ui.log("Installation aborted.");
        Err(Halt::Declined)
    }
}

/// Run the pre-install hook, letting the operator continue past a failure.
pub fn run_pre_install_hook(state: &mut PipelineState, c: &mut Collaborators<'_>) -> StageResult<()> {
    let result = c.hooks.run_hook(DistroHook::PreInstall);
    state.hook_attempted = true;

    let Err(err) = result else {
        return Ok(());
    };

    log::warn!("[Prep] {}", err);
    if c.ui.yes_no(
        true,
        "The distribution-provided pre-install script failed!  Continue installation anyway?",
    ) {
        Ok(())
    } else {
        Err(Halt::Failed(err))
    }
}

/// Fail if an alternate driver is bound to the hardware.
pub fn check_for_conflicting_driver(c: &mut Collaborators<'_>) -> StageResult<()> {
    match c.probe.conflicting_driver() {
        None => Ok(()),
        Some(driver) => Err(Halt::Failed(InstallError::PreconditionFailed(format!(
            "The Nouveau kernel driver is currently in use by your system ('{}' is loaded).  \
             This driver is incompatible with the NVIDIA driver, and must be disabled before \
             proceeding.",
            driver
        )))),
    }
}
