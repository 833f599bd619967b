//! Environment probes for the running machine.

use crate::config::Distro;
use crate::models::{FileArch, FileIdentity, FileType, Package};
use crate::system::{backup, gpu, run_command, verification, EnvironmentProbe};
use std::fs;
use std::path::{Path, PathBuf};

/// Alternate open-source driver that must not be active during install.
const CONFLICTING_DRIVER: &str = "nouveau";

/// X servers write `/tmp/.X<n>-lock`; the first eight displays are checked.
const X_LOCK_DISPLAYS: u32 = 8;

/// Probe backed by /proc, /tmp, /etc and a few system utilities.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    lock_dir: PathBuf,
    proc_modules: PathBuf,
    os_release_root: PathBuf,
    backup_dir: PathBuf,
}

impl Default for SystemProbe {
    fn default() -> Self {
        SystemProbe {
            lock_dir: PathBuf::from("/tmp"),
            proc_modules: PathBuf::from("/proc/modules"),
            os_release_root: PathBuf::from("/etc"),
            backup_dir: PathBuf::from(backup::DEFAULT_BACKUP_DIR),
        }
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        SystemProbe::default()
    }

    /// Use alternate locations, for running against a fake root.
    pub fn with_paths(
        lock_dir: impl Into<PathBuf>,
        proc_modules: impl Into<PathBuf>,
        os_release_root: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        SystemProbe {
            lock_dir: lock_dir.into(),
            proc_modules: proc_modules.into(),
            os_release_root: os_release_root.into(),
            backup_dir: backup_dir.into(),
        }
    }
}

/// Module names from /proc/modules content.
pub fn parse_proc_modules(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Distribution family from the files under `etc`.
pub fn detect_distro(etc: &Path) -> Distro {
    if etc.join("SuSE-release").exists() {
        return Distro::Suse;
    }
    if etc.join("UnitedLinux-release").exists() {
        return Distro::UnitedLinux;
    }

    let Ok(content) = fs::read_to_string(etc.join("os-release")) else {
        return Distro::Other;
    };
    for line in content.lines() {
        let Some(value) = line.strip_prefix("ID=") else { continue };
        let id = value.trim_matches('"').to_ascii_lowercase();
        if id.contains("suse") || id == "sles" {
            return Distro::Suse;
        }
        if id == "unitedlinux" {
            return Distro::UnitedLinux;
        }
    }
    Distro::Other
}

/// Whether a `getconf GNU_LIBC_VERSION` string reports glibc 2.3 or later.
pub fn glibc_supports_new_tls(version_line: &str) -> bool {
    let Some(version) = version_line.split_whitespace().last() else {
        return false;
    };
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    (major, minor) >= (2, 3)
}

/// Create, attach, detach, and remove one SysV shared memory segment.
pub fn sysv_ipc_roundtrip() -> Result<(), String> {
    // SAFETY: plain libc calls on a private segment that is removed before returning.
    unsafe {
        let id = libc::shmget(libc::IPC_PRIVATE, 4096, libc::IPC_CREAT | 0o600);
        if id == -1 {
            return Err(format!(
                "shmget failed: {}",
                std::io::Error::last_os_error()
            ));
        }

        let addr = libc::shmat(id, std::ptr::null(), 0);
        let attach_error = if addr as isize == -1 {
            Some(std::io::Error::last_os_error())
        } else {
            libc::shmdt(addr);
            None
        };

        libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut());

        match attach_error {
            Some(e) => Err(format!("shmat failed: {}", e)),
            None => Ok(()),
        }
    }
}

impl EnvironmentProbe for SystemProbe {
    fn x_server_lock(&self) -> Option<PathBuf> {
        (0..X_LOCK_DISPLAYS)
            .map(|n| self.lock_dir.join(format!(".X{}-lock", n)))
            .find(|lock| lock.exists())
    }

    fn loaded_modules(&self) -> Vec<String> {
        fs::read_to_string(&self.proc_modules)
            .map(|content| parse_proc_modules(&content))
            .unwrap_or_default()
    }

    fn unload_module(&mut self, name: &str) -> Result<(), String> {
        run_command("rmmod", &[name]).map(|_| ())
    }

    fn conflicting_driver(&self) -> Option<String> {
        self.loaded_modules()
            .into_iter()
            .find(|m| m == CONFLICTING_DRIVER)
    }

    fn installed_driver_version(&self) -> Option<String> {
        backup::recorded_version(&self.backup_dir)
    }

    fn nvidia_device_ids(&self) -> Vec<u16> {
        gpu::detect_nvidia_device_ids()
    }

    fn new_tls_supported(&self) -> bool {
        match run_command("getconf", &["GNU_LIBC_VERSION"]) {
            Ok(out) => glibc_supports_new_tls(out.trim()),
            Err(e) => {
                log::debug!("[Probe] Cannot query libc version ({}); assuming new TLS", e);
                true
            }
        }
    }

    fn machine_arch(&self) -> String {
        nix::sys::utsname::uname()
            .map(|u| u.machine().to_string_lossy().into_owned())
            .unwrap_or_else(|_| std::env::consts::ARCH.to_string())
    }

    fn distro(&self) -> Distro {
        detect_distro(&self.os_release_root)
    }

    fn check_sysv_ipc(&self) -> Result<(), String> {
        sysv_ipc_roundtrip().map_err(|e| {
            format!(
                "Your kernel does not appear to support System V IPC ({}). \
                 The OpenGL libraries need it to function properly.",
                e
            )
        })
    }

    fn check_runtime_configuration(&self, package: &Package) -> Result<(), String> {
        let cache = match run_command("ldconfig", &["-p"]) {
            Ok(cache) => cache,
            Err(e) => {
                log::warn!(
                    "[Probe] Unable to query the runtime linker cache ({}); skipping the check",
                    e
                );
                return Ok(());
            }
        };

        let problems = runtime_linker_problems(package, &cache, cfg!(target_pointer_width = "64"));
        if problems.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "The runtime linker does not resolve the installed libraries: {}. \
                 Please check your runtime linker configuration.",
                problems.join("; ")
            ))
        }
    }

    fn check_installed_files(&self, package: &Package) -> Vec<String> {
        verification::check_installed_files(package)
    }
}

/// Runtime linker name of a library file: `libGL.so.1.0.9631` becomes `libGL.so.1`.
pub fn soname_of(name: &str) -> &str {
    let Some(idx) = name.find(".so.") else {
        return name;
    };
    let major_start = idx + ".so.".len();
    match name[major_start..].find('.') {
        Some(end) => &name[..major_start + end],
        None => name,
    }
}

/// One `ldconfig -p` line: `libGL.so.1 (libc6,x86-64) => /usr/lib/libGL.so.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub soname: String,
    pub is_64bit: bool,
    pub path: PathBuf,
}

pub fn parse_ldconfig_cache(output: &str) -> Vec<CacheEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (left, path) = line.split_once(" => ")?;
            let left = left.trim();
            let (soname, tag) = match left.split_once(' ') {
                Some((soname, tag)) => (soname, tag),
                None => (left, ""),
            };
            Some(CacheEntry {
                soname: soname.to_string(),
                is_64bit: tag.contains("64"),
                path: PathBuf::from(path.trim()),
            })
        })
        .collect()
}

/// OpenGL libraries the cache resolves to something other than the installed file.
///
/// Native entries match cache lines of the host word size; compat32 entries
/// match 32-bit lines. Entries without a destination are skipped.
pub fn runtime_linker_problems(package: &Package, cache: &str, host_is_64bit: bool) -> Vec<String> {
    let cache = parse_ldconfig_cache(cache);
    let mut problems = Vec::new();

    for entry in package.entries_of_type(FileType::OpenGlLib) {
        let Some(dst) = entry.dst() else { continue };
        let soname = soname_of(entry.name());
        let want_64bit = host_is_64bit && entry.arch() != Some(FileArch::Compat32);

        let resolved = cache
            .iter()
            .find(|c| c.soname == soname && c.is_64bit == want_64bit);

        match resolved {
            None => problems.push(format!("{} is not in the linker cache", soname)),
            Some(c) => {
                if !FileIdentity::probe(&c.path).same_file(&FileIdentity::probe(dst)) {
                    problems.push(format!(
                        "{} resolves to {}, not {}",
                        soname,
                        c.path.display(),
                        dst.display()
                    ));
                }
            }
        }
    }
    problems
}
