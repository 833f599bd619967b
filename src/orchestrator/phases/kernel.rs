//! Phase 2: Kernel module - build inline, defer to DKMS, or skip.

use crate::config::InstallerOptions;
use crate::kernel::acquire_kernel_module;
use crate::log_info;
use crate::models::Package;
use crate::orchestrator::state::StageResult;
use crate::orchestrator::Collaborators;

/// Outcome of the kernel module phase.
#[derive(Debug)]
pub struct KernelStage {
    pub options: InstallerOptions,
    /// Module sources go to DKMS after the files are installed.
    pub dkms_deferred: bool,
}

/// Decide how the kernel module is provided and acquire it when needed.
///
/// Returns the options as adjusted by this phase.
pub fn kernel_module_stage(
    opts: &InstallerOptions,
    package: &mut Package,
    c: &mut Collaborators<'_>,
) -> StageResult<KernelStage> {
    let mut opts = opts.clone();

    if opts.no_kernel_module {
        c.ui.warn(
            "You specified the '--no-kernel-module' command line option, nvidia-installer \
             will not install a kernel module as part of this driver installation, and it \
             will not remove existing NVIDIA kernel modules not part of an earlier NVIDIA \
             driver installation.  Please ensure that an NVIDIA kernel module matching this \
             driver version is installed separately.",
        );
        if opts.dkms {
            c.ui.warn(
                "You have specified both the '--no-kernel-module' and the '--dkms' command \
                 line options. The '--dkms' option will be ignored.",
            );
            opts.dkms = false;
        }
        return Ok(KernelStage {
            options: opts,
            dkms_deferred: false,
        });
    }

    if c.dkms.available() && !opts.no_kernel_module_source {
        opts.dkms = c.ui.yes_no(
            opts.dkms,
            "Would you like to register the kernel module sources with DKMS? This will allow \
             DKMS to automatically build a new module, if you install a different kernel later.",
        );
    } else if opts.dkms {
        log::warn!("[Kernel] DKMS requested but unavailable; building the module inline");
        opts.dkms = false;
    }

    if opts.dkms {
        log_info!("[Kernel] Deferring kernel module build to DKMS");
        opts.no_kernel_module = true;
        return Ok(KernelStage {
            options: opts,
            dkms_deferred: true,
        });
    }

    let install_path = acquire_kernel_module(package, &opts, &mut *c.toolchain, &mut *c.ui)?;
    opts.kernel_module_installation_path = Some(install_path);
    Ok(KernelStage {
        options: opts,
        dkms_deferred: false,
    })
}
