//! Kernel module toolchain: install path, compiler checks, build, link, test.
//!
//! `SystemToolchain` shells out to `make`, `ld`, `insmod` and `rmmod`. The
//! acquisition stage drives it through the `KernelToolchain` trait.

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::log_info;
use crate::models::Package;
use crate::system::{find_program, run_command};
use crate::ui::UserInterface;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Object file holding the binary-only portion of the module.
pub const KERNEL_CORE_OBJECT: &str = "nv-kernel.o";

/// Name given to an unpacked precompiled interface inside the build directory.
pub const PRECOMPILED_INTERFACE_FILE_NAME: &str = "precompiled-nv-linux.o";

/// Tools required to compile the kernel interface.
pub const DEVELOPMENT_TOOLS: [&str; 3] = ["cc", "make", "ld"];

static PROC_VERSION_GCC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"gcc(?: version|-\d+ \([^)]*\)) (\d+)\.(\d+)").expect("Invalid gcc version regex")
});

static CC_VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?:\.(\d+))?").expect("Invalid cc version regex"));

/// Compile, link and load-test operations for the kernel module.
pub trait KernelToolchain {
    /// Directory the module is installed into; created if missing.
    fn module_install_path(
        &mut self,
        opts: &InstallerOptions,
        ui: &mut dyn UserInterface,
    ) -> Result<PathBuf, InstallError>;

    /// Confirm the kernel's module loader path names an existing program.
    fn check_modprobe_path(&self) -> Result<(), InstallError>;

    /// Full `/proc/version` line of the running kernel.
    fn running_kernel_signature(&self) -> Option<String>;

    /// Link `interface` with the binary core into the kernel module.
    fn link_module(&mut self, package: &Package, interface: &Path) -> Result<(), InstallError>;

    fn check_development_tools(&self) -> Result<(), InstallError>;

    /// `Err` carries a description of the compiler mismatch.
    fn check_cc_version(&self, opts: &InstallerOptions) -> Result<(), String>;

    /// Build with the compiler mismatch check disabled from now on.
    fn allow_cc_mismatch(&mut self);

    fn kernel_source_path(&self, opts: &InstallerOptions) -> Result<PathBuf, InstallError>;

    /// Compile the module in the package's build directory.
    fn build_module(&mut self, package: &Package, source: &Path) -> Result<(), InstallError>;

    /// Compile only the kernel interface object and return its contents.
    fn build_interface(&mut self, package: &Package, source: &Path)
        -> Result<Vec<u8>, InstallError>;

    /// Load and unload the freshly built module.
    fn test_module(&mut self, package: &Package, opts: &InstallerOptions)
        -> Result<(), InstallError>;
}

/// Name of the kernel being targeted: the configured one, else `uname -r`.
pub fn target_kernel_name(opts: &InstallerOptions) -> Option<String> {
    if let Some(name) = &opts.kernel_name {
        return Some(name.clone());
    }
    nix::sys::utsname::uname()
        .ok()
        .map(|u| u.release().to_string_lossy().into_owned())
}

/// `<modules>/<kernel>/kernel/drivers/video` on a modern layout, else `<modules>/<kernel>/video`.
pub fn default_module_install_path(modules_root: &Path, kernel: &str) -> PathBuf {
    let base = modules_root.join(kernel);
    if base.join("kernel").is_dir() {
        base.join("kernel/drivers/video")
    } else {
        base.join("video")
    }
}

/// Candidate kernel source trees for `kernel`, most specific first.
pub fn kernel_source_candidates(kernel: &str) -> Vec<PathBuf> {
    vec![
        PathBuf::from(format!("/lib/modules/{}/source", kernel)),
        PathBuf::from(format!("/lib/modules/{}/build", kernel)),
        PathBuf::from(format!("/usr/src/linux-{}", kernel)),
        PathBuf::from("/usr/src/linux"),
    ]
}

/// Major and minor compiler version from a `/proc/version` line.
pub fn kernel_gcc_version(proc_version: &str) -> Option<(u32, u32)> {
    let caps = PROC_VERSION_GCC_REGEX.captures(proc_version)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Major and minor version from `cc -dumpversion` output.
pub fn cc_dump_version(output: &str) -> Option<(u32, u32)> {
    let caps = CC_VERSION_REGEX.captures(output.trim())?;
    let major = caps[1].parse().ok()?;
    let minor = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Copy the regular files and subdirectories of `src` into `dst`.
pub fn copy_directory_contents(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_directory_contents(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Toolchain backed by the host's build tools.
#[derive(Debug, Clone)]
pub struct SystemToolchain {
    modules_root: PathBuf,
    proc_version: PathBuf,
    proc_modprobe: PathBuf,
    jobs: usize,
    ignore_cc_mismatch: bool,
}

impl Default for SystemToolchain {
    fn default() -> Self {
        SystemToolchain {
            modules_root: PathBuf::from("/lib/modules"),
            proc_version: PathBuf::from("/proc/version"),
            proc_modprobe: PathBuf::from("/proc/sys/kernel/modprobe"),
            jobs: num_cpus::get(),
            ignore_cc_mismatch: false,
        }
    }
}

impl SystemToolchain {
    pub fn new() -> Self {
        SystemToolchain::default()
    }

    /// Use alternate /lib/modules and /proc locations.
    pub fn with_paths(
        modules_root: impl Into<PathBuf>,
        proc_version: impl Into<PathBuf>,
        proc_modprobe: impl Into<PathBuf>,
    ) -> Self {
        SystemToolchain {
            modules_root: modules_root.into(),
            proc_version: proc_version.into(),
            proc_modprobe: proc_modprobe.into(),
            ..SystemToolchain::default()
        }
    }

    fn make(&self, dir: &Path, args: &[String]) -> Result<(), String> {
        log::debug!("[Toolchain] make {} (in {})", args.join(" "), dir.display());

        let mut command = Command::new("make");
        command.args(args).current_dir(dir);
        if self.ignore_cc_mismatch {
            command.env("IGNORE_CC_MISMATCH", "1");
        }

        let output = command
            .output()
            .map_err(|e| format!("Failed to execute make: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            log::debug!("[make] {}", line);
        }

        if output.status.success() {
            Ok(())
        } else {
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            Err(format!(
                "make exited with status {:?}: {}",
                output.status.code(),
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            ))
        }
    }
}

impl KernelToolchain for SystemToolchain {
    fn module_install_path(
        &mut self,
        opts: &InstallerOptions,
        ui: &mut dyn UserInterface,
    ) -> Result<PathBuf, InstallError> {
        let mut path = match &opts.kernel_module_installation_path {
            Some(path) => path.clone(),
            None => {
                let kernel = target_kernel_name(opts).ok_or_else(|| {
                    InstallError::stage(
                        "Kernel module installation path",
                        "unable to determine the kernel name",
                    )
                })?;
                default_module_install_path(&self.modules_root, &kernel)
            }
        };

        if opts.expert {
            let answer = ui.get_input(&path.to_string_lossy(), "Kernel module installation path");
            path = PathBuf::from(answer.trim());
        }

        fs::create_dir_all(&path).map_err(|e| {
            InstallError::stage(
                "Kernel module installation path",
                format!("unable to create '{}': {}", path.display(), e),
            )
        })?;

        ui.log(&format!("Kernel module installation path: {}", path.display()));
        Ok(path)
    }

    fn check_modprobe_path(&self) -> Result<(), InstallError> {
        let Ok(content) = fs::read_to_string(&self.proc_modprobe) else {
            return Ok(());
        };
        let configured = content.trim();
        if configured.is_empty() || Path::new(configured).exists() {
            return Ok(());
        }

        Err(InstallError::PreconditionFailed(format!(
            "The kernel's module loader path '{}' (from '{}') does not exist; \
             please correct it before installing.",
            configured,
            self.proc_modprobe.display()
        )))
    }

    fn running_kernel_signature(&self) -> Option<String> {
        fs::read_to_string(&self.proc_version)
            .ok()
            .map(|s| s.trim_end().to_string())
            .filter(|s| !s.is_empty())
    }

    fn link_module(&mut self, package: &Package, interface: &Path) -> Result<(), InstallError> {
        let build = package.build_directory();
        let output = build.join(&package.kernel_module_filename);
        let output_str = output.to_string_lossy();
        let interface_str = interface.to_string_lossy();
        let core = build.join(KERNEL_CORE_OBJECT);
        let core_str = core.to_string_lossy();

        log_info!("[Toolchain] Linking {} from {}", output.display(), interface.display());
        run_command("ld", &["-r", "-o", &output_str, &interface_str, &core_str])
            .map_err(InstallError::LinkFailed)?;

        if !output.is_file() {
            return Err(InstallError::LinkFailed(format!(
                "'{}' was not created",
                output.display()
            )));
        }
        Ok(())
    }

    fn check_development_tools(&self) -> Result<(), InstallError> {
        let missing: Vec<&str> = DEVELOPMENT_TOOLS
            .iter()
            .copied()
            .filter(|tool| find_program(tool).is_none())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(InstallError::ToolingMissing(format!(
                "{}; please install them before building the kernel module",
                missing.join(", ")
            )))
        }
    }

    fn check_cc_version(&self, opts: &InstallerOptions) -> Result<(), String> {
        if opts.ignore_cc_version_check || opts.kernel_name.is_some() {
            return Ok(());
        }

        let Some(kernel_cc) = self
            .running_kernel_signature()
            .as_deref()
            .and_then(kernel_gcc_version)
        else {
            log::debug!("[Toolchain] Kernel compiler version unknown; skipping cc check");
            return Ok(());
        };

        let output = run_command("cc", &["-dumpfullversion", "-dumpversion"])?;
        let local_cc = cc_dump_version(&output)
            .ok_or_else(|| format!("unrecognized compiler version '{}'", output.trim()))?;

        if local_cc == kernel_cc {
            Ok(())
        } else {
            Err(format!(
                "The kernel was built with gcc {}.{}, but the current compiler is version {}.{}.",
                kernel_cc.0, kernel_cc.1, local_cc.0, local_cc.1
            ))
        }
    }

    fn allow_cc_mismatch(&mut self) {
        self.ignore_cc_mismatch = true;
    }

    fn kernel_source_path(&self, opts: &InstallerOptions) -> Result<PathBuf, InstallError> {
        let explicit = opts
            .kernel_source_path
            .clone()
            .or_else(|| std::env::var_os("SYSSRC").map(PathBuf::from));

        let path = match explicit {
            Some(path) => path,
            None => {
                let kernel = target_kernel_name(opts).unwrap_or_default();
                kernel_source_candidates(&kernel)
                    .into_iter()
                    .find(|p| p.is_dir())
                    .ok_or_else(|| {
                        InstallError::ToolingMissing(
                            "Unable to find the kernel source tree for the currently running \
                             kernel.  Please make sure you have installed the kernel source \
                             files for your kernel."
                                .to_string(),
                        )
                    })?
            }
        };

        if !path.join("Makefile").is_file() {
            return Err(InstallError::ToolingMissing(format!(
                "The kernel source path '{}' does not appear to be a configured kernel tree.",
                path.display()
            )));
        }

        log_info!("[Toolchain] Kernel source path: {}", path.display());
        Ok(path)
    }

    fn build_module(&mut self, package: &Package, source: &Path) -> Result<(), InstallError> {
        let build = package.build_directory();
        log_info!("[Toolchain] Building kernel module in {} ({} jobs)", build.display(), self.jobs);

        self.make(&build, &["clean".to_string()])
            .map_err(InstallError::BuildFailed)?;
        self.make(
            &build,
            &[
                format!("-j{}", self.jobs),
                "module".to_string(),
                format!("SYSSRC={}", source.display()),
            ],
        )
        .map_err(InstallError::BuildFailed)?;

        let module = build.join(&package.kernel_module_filename);
        if !module.is_file() {
            return Err(InstallError::BuildFailed(format!(
                "'{}' was not created",
                module.display()
            )));
        }
        log_info!("[Toolchain] Kernel module compilation complete");
        Ok(())
    }

    fn build_interface(
        &mut self,
        package: &Package,
        source: &Path,
    ) -> Result<Vec<u8>, InstallError> {
        let scratch = tempfile::TempDir::new().map_err(|e| {
            InstallError::BuildFailed(format!("Unable to create a temporary build directory: {}", e))
        })?;

        copy_directory_contents(&package.build_directory(), scratch.path()).map_err(
            |e| {
                InstallError::BuildFailed(format!(
                    "Unable to copy the kernel module sources to '{}': {}",
                    scratch.path().display(),
                    e
                ))
            },
        )?;

        self.make(
            scratch.path(),
            &[
                package.kernel_interface_filename.clone(),
                format!("SYSSRC={}", source.display()),
            ],
        )
        .map_err(InstallError::BuildFailed)?;

        let built = scratch.path().join(&package.kernel_interface_filename);
        fs::read(&built).map_err(|e| {
            InstallError::BuildFailed(format!("The kernel module interface was not created: {}", e))
        })
    }

    fn test_module(
        &mut self,
        package: &Package,
        opts: &InstallerOptions,
    ) -> Result<(), InstallError> {
        if opts.kernel_name.is_some() {
            log::debug!("[Toolchain] Not load-testing a module built for another kernel");
            return Ok(());
        }

        let module = package.build_directory().join(&package.kernel_module_filename);
        let module_str = module.to_string_lossy();

        run_command("insmod", &[&module_str]).map_err(InstallError::TestFailed)?;
        run_command("rmmod", &[&package.kernel_module_name]).map_err(InstallError::TestFailed)?;
        log_info!("[Toolchain] Kernel module load test passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_install_path_layouts() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            default_module_install_path(temp.path(), "2.4.20"),
            temp.path().join("2.4.20/video")
        );

        fs::create_dir_all(temp.path().join("6.1.0/kernel")).unwrap();
        assert_eq!(
            default_module_install_path(temp.path(), "6.1.0"),
            temp.path().join("6.1.0/kernel/drivers/video")
        );
    }

    #[test]
    fn test_kernel_gcc_version() {
        let line = "Linux version 6.1.0-18-amd64 (debian-kernel@lists.debian.org) \
                    (gcc-12 (Debian 12.2.0-14) 12.2.0, GNU ld (GNU Binutils for Debian) 2.40)";
        assert_eq!(kernel_gcc_version(line), Some((12, 2)));

        let old = "Linux version 2.6.9 (root@host) (gcc version 3.4.2 20041017) #1";
        assert_eq!(kernel_gcc_version(old), Some((3, 4)));

        assert_eq!(kernel_gcc_version("Linux version 6.8.0 (clang version 17)"), None);
    }

    #[test]
    fn test_cc_dump_version() {
        assert_eq!(cc_dump_version("12.2.0\n"), Some((12, 2)));
        assert_eq!(cc_dump_version("13"), Some((13, 0)));
        assert_eq!(cc_dump_version("garbage"), None);
    }

    #[test]
    fn test_modprobe_path_check() {
        let temp = TempDir::new().unwrap();
        let proc_file = temp.path().join("modprobe");
        let toolchain =
            SystemToolchain::with_paths(temp.path(), temp.path().join("version"), &proc_file);

        // Missing /proc entry is not an error
        assert!(toolchain.check_modprobe_path().is_ok());

        fs::write(&proc_file, format!("{}\n", proc_file.display())).unwrap();
        assert!(toolchain.check_modprobe_path().is_ok());

        fs::write(&proc_file, "/nonexistent/sbin/modprobe\n").unwrap();
        assert!(matches!(
            toolchain.check_modprobe_path(),
            Err(InstallError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn test_running_kernel_signature() {
        let temp = TempDir::new().unwrap();
        let version = temp.path().join("version");
        let toolchain = SystemToolchain::with_paths(temp.path(), &version, temp.path().join("m"));
        assert_eq!(toolchain.running_kernel_signature(), None);

        fs::write(&version, "Linux version 6.1.0 (gcc version 12.2.0) #1 SMP\n").unwrap();
        assert_eq!(
            toolchain.running_kernel_signature().as_deref(),
            Some("Linux version 6.1.0 (gcc version 12.2.0) #1 SMP")
        );
    }

    #[test]
    fn test_explicit_source_path_needs_makefile() {
        let temp = TempDir::new().unwrap();
        let toolchain = SystemToolchain::new();
        let mut opts = InstallerOptions::default();
        opts.kernel_source_path = Some(temp.path().to_path_buf());

        assert!(matches!(
            toolchain.kernel_source_path(&opts),
            Err(InstallError::ToolingMissing(_))
        ));

        fs::write(temp.path().join("Makefile"), "all:\n").unwrap();
        assert_eq!(toolchain.kernel_source_path(&opts).unwrap(), temp.path());
    }

    #[test]
    fn test_copy_directory_contents() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("Makefile"), "x").unwrap();
        fs::write(src.path().join("sub/nv.c"), "y").unwrap();

        copy_directory_contents(src.path(), &dst.path().join("copy")).unwrap();
        assert!(dst.path().join("copy/Makefile").is_file());
        assert!(dst.path().join("copy/sub/nv.c").is_file());
    }

    #[test]
    fn test_cc_check_skipped_for_other_kernel() {
        let toolchain = SystemToolchain::new();
        let mut opts = InstallerOptions::default();
        opts.kernel_name = Some("5.10.0".to_string());
        assert!(toolchain.check_cc_version(&opts).is_ok());
    }
}
