//! Kernel module acquisition.
//!
//! Produces a loadable kernel module in the package's build directory, either
//! by linking a matching precompiled interface or by compiling from source,
//! then registers it as a package entry.

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::kernel::precompiled;
use crate::kernel::toolchain::{KernelToolchain, PRECOMPILED_INTERFACE_FILE_NAME};
use crate::log_info;
use crate::models::{EntryExtras, FileType, Package, PackageEntry};
use crate::ui::UserInterface;
use std::path::{Path, PathBuf};

/// Permission bits given to the installed kernel module.
pub const KERNEL_MODULE_MODE: u32 = 0o644;

/// How the module was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleSource {
    Precompiled,
    Compiled,
}

/// Acquire the kernel module and add it to `package`.
///
/// Returns the directory the module will be installed into.
pub fn acquire_kernel_module(
    package: &mut Package,
    opts: &InstallerOptions,
    toolchain: &mut dyn KernelToolchain,
    ui: &mut dyn UserInterface,
) -> Result<PathBuf, InstallError> {
    package.kernel_module_filename = format!("{}.ko", package.kernel_module_name);

    let install_path = toolchain.module_install_path(opts, ui)?;
    toolchain.check_modprobe_path()?;

    let source = match find_precompiled_interface(package, opts, toolchain, ui)? {
        Some(interface) => {
            toolchain.link_module(package, &interface)?;
            ModuleSource::Precompiled
        }
        None => {
            compile_module(package, opts, toolchain, ui)?;
            ModuleSource::Compiled
        }
    };

    toolchain.test_module(package, opts)?;
    register_kernel_module(package)?;

    log_info!(
        "[Acquisition] Kernel module {} ready ({:?}), installing to {}",
        package.kernel_module_filename,
        source,
        install_path.display()
    );
    Ok(install_path)
}

/// Unpack a precompiled interface matching the running kernel, if one exists.
fn find_precompiled_interface(
    package: &Package,
    opts: &InstallerOptions,
    toolchain: &dyn KernelToolchain,
    ui: &mut dyn UserInterface,
) -> Result<Option<PathBuf>, InstallError> {
    if opts.no_precompiled_interface {
        log::debug!("[Acquisition] Precompiled interfaces disabled");
        return Ok(None);
    }

    let Some(signature) = toolchain.running_kernel_signature() else {
        ui.log("Unable to determine the running kernel; not using a precompiled interface.");
        return Ok(None);
    };

    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(extra) = &opts.precompiled_search_path {
        dirs.push(extra.clone());
    }
    dirs.push(package.precompiled_directory());

    let Some((bundle, info)) = precompiled::find_matching(
        dirs.iter().map(PathBuf::as_path),
        &signature,
        &package.version,
    ) else {
        ui.log("No precompiled kernel interface was found to match your kernel.");
        return Ok(None);
    };

    if opts.expert
        && !ui.yes_no(
            true,
            &format!(
                "A precompiled kernel interface for the kernel '{}' has been found ('{}').  \
                 Would you like to use this precompiled kernel interface?",
                info.description,
                bundle.display()
            ),
        )
    {
        ui.log("Not using the precompiled kernel interface; compiling the module instead.");
        return Ok(None);
    }

    let output = package.build_directory().join(PRECOMPILED_INTERFACE_FILE_NAME);
    precompiled::unpack_to_file(&bundle, &output).map_err(|e| {
        InstallError::LinkFailed(format!(
            "Unable to unpack the precompiled kernel interface '{}': {}",
            bundle.display(),
            e
        ))
    })?;

    ui.log(&format!(
        "Found precompiled kernel interface '{}' ({}).",
        bundle.display(),
        info.description
    ));
    Ok(Some(output))
}

fn compile_module(
    package: &Package,
    opts: &InstallerOptions,
    toolchain: &mut dyn KernelToolchain,
    ui: &mut dyn UserInterface,
) -> Result<(), InstallError> {
    toolchain.check_development_tools()?;

    if opts.ignore_cc_version_check {
        toolchain.allow_cc_mismatch();
    } else if let Err(mismatch) = toolchain.check_cc_version(opts) {
        let abort = ui.yes_no(
            true,
            &format!(
                "The CC version check failed:\n\n{}\n\nIf you know what you are doing and \
                 want to ignore the gcc version check, select \"No\" to continue installation.  \
                 Otherwise, select \"Yes\" to abort installation, set the CC environment \
                 variable to the name of the compiler used to compile your kernel, and restart \
                 installation.  Abort now?",
                mismatch
            ),
        );
        if abort {
            return Err(InstallError::ToolingIncompatible(mismatch));
        }
        toolchain.allow_cc_mismatch();
    }

    let source = toolchain.kernel_source_path(opts)?;
    toolchain.build_module(package, &source)
}

/// Add the built module as a `KernelModule` entry.
fn register_kernel_module(package: &mut Package) -> Result<(), InstallError> {
    let file = Path::new(&package.kernel_module_build_directory)
        .join(&package.kernel_module_filename)
        .to_string_lossy()
        .into_owned();

    let entry = PackageEntry::new(
        file,
        KERNEL_MODULE_MODE,
        FileType::KernelModule,
        EntryExtras::default(),
    )
    .map_err(|e| InstallError::stage("Kernel module registration", e.to_string()))?;

    package.append(entry);
    Ok(())
}
