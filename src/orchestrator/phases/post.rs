//! Phase 5: Post-install - hooks, sanity checks and the completion message.

use crate::config::Distro;
use crate::error::InstallError;
use crate::models::Package;
use crate::orchestrator::state::{InstallPhase, PipelineState, StageResult};
use crate::orchestrator::Collaborators;
use crate::system::DistroHook;

const EDIT_YOUR_X_CONFIG: &str = "Please update your XF86Config or xorg.conf file as \
     appropriate; see the file /usr/share/doc/NVIDIA_GLX-1.0/README.txt for details.";

const SUSE_EDIT_YOUR_X_CONFIG: &str =
    "On SuSE Linux/United Linux please use SaX2 now to enable the NVIDIA driver.";

/// Advice printed when the X configuration was not updated automatically.
pub fn x_config_advice(distro: Distro) -> &'static str {
    match distro {
        Distro::Suse | Distro::UnitedLinux => SUSE_EDIT_YOUR_X_CONFIG,
        Distro::Other => EDIT_YOUR_X_CONFIG,
    }
}

/// Post-install hook and sanity checks.
pub fn verify_installation(
    state: &mut PipelineState,
    package: &Package,
    c: &mut Collaborators<'_>,
) -> StageResult<()> {
    state.enter(InstallPhase::PostInstall);

    if let Err(e) = c.hooks.run_hook(DistroHook::PostInstall) {
        c.ui.warn(&e.user_message());
    }

    let problems = c.probe.check_installed_files(package);
    for problem in &problems {
        c.ui.warn(problem);
    }
    c.ui.log(&format!(
        "Post-install sanity check {}.",
        if problems.is_empty() { "passed" } else { "failed" }
    ));

    c.probe
        .check_sysv_ipc()
        .map_err(InstallError::PreconditionFailed)?;
    c.probe
        .check_runtime_configuration(package)
        .map_err(|reason| InstallError::stage("Runtime configuration check", reason))?;
    Ok(())
}

/// Offer the X configuration tool and report completion.
pub fn report_completion(state: &PipelineState, package: &Package, c: &mut Collaborators<'_>) {
    let opts = &state.options;

    if opts.kernel_module_only || opts.no_xconfig_question {
        c.ui.message(&format!(
            "Installation of the kernel module for the {} (version {}) is now complete.",
            package.description, package.version
        ));
        return;
    }

    let wanted = c.ui.yes_no(
        opts.run_xconfig,
        "Would you like to run the nvidia-xconfig utility to automatically update your X \
         configuration file so that the NVIDIA X driver will be used when you restart X?  \
         Any pre-existing X configuration file will be backed up.",
    );

    let updated = wanted
        && match c.xconfig.run(opts) {
            Ok(updated) => updated,
            Err(e) => {
                c.ui.warn(&format!("Failed to run nvidia-xconfig: {}", e));
                false
            }
        };

    if updated {
        c.ui.message(&format!(
            "Your X configuration file has been successfully updated.  Installation of the {} \
             (version: {}) is now complete.",
            package.description, package.version
        ));
    } else {
        let distro = match opts.distro {
            Distro::Other => c.probe.distro(),
            configured => configured,
        };
        c.ui.message(&format!(
            "Installation of the {} (version: {}) is now complete.  {}",
            package.description,
            package.version,
            x_config_advice(distro)
        ));
    }
}
