//! Operation list: the concrete filesystem steps of an installation.
//!
//! `DefaultPlanner::build` turns a fully prepared `Package` into an ordered
//! list: conflicting files are backed up (or deleted), installable files are
//! copied, symlinks created, package commands run, and finally the dynamic
//! linker cache and module dependency map are refreshed.

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::models::{FileIdentity, Package};
use crate::system::{run_shell_in, BackupEngine, OperationPlanner};
use crate::ui::UserInterface;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// One filesystem step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Move a conflicting file aside through the backup engine.
    Backup { path: PathBuf },
    /// Remove a conflicting file outright.
    Delete { path: PathBuf },
    /// Copy `src` to `dst` with permission bits `mode`.
    Install { src: PathBuf, dst: PathBuf, mode: u32 },
    /// Create `link` pointing at `target`.
    Symlink { link: PathBuf, target: String },
    /// Run a shell command line, inside `dir` when given.
    Run { command: String, dir: Option<PathBuf> },
}

impl Operation {
    pub fn describe(&self) -> String {
        match self {
            Operation::Backup { path } => format!("Backup {}", path.display()),
            Operation::Delete { path } => format!("Delete {}", path.display()),
            Operation::Install { src, dst, mode } => {
                format!("Install {} -> {} ({:04o})", src.display(), dst.display(), mode)
            }
            Operation::Symlink { link, target } => {
                format!("Symlink {} -> {}", link.display(), target)
            }
            Operation::Run { command, dir: None } => format!("Run `{}`", command),
            Operation::Run {
                command,
                dir: Some(dir),
            } => format!("Run `{}` in {}", command, dir.display()),
        }
    }
}

/// Ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationList {
    ops: Vec<Operation>,
}

impl OperationList {
    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn describe(&self) -> Vec<String> {
        self.ops.iter().map(Operation::describe).collect()
    }
}

/// Default planner and executor working on the real filesystem.
#[derive(Debug, Default)]
pub struct DefaultPlanner {
    running_kernel: Option<String>,
}

impl DefaultPlanner {
    pub fn new() -> Self {
        DefaultPlanner {
            running_kernel: nix::sys::utsname::uname()
                .ok()
                .map(|u| u.release().to_string_lossy().into_owned()),
        }
    }

    /// Directories where a stale copy of the kernel module may live.
    fn module_prefixes(&self, opts: &InstallerOptions) -> Vec<PathBuf> {
        let mut prefixes = Vec::new();
        if let Some(path) = &opts.kernel_module_installation_path {
            prefixes.push(path.clone());
        }
        if let Some(kernel) = opts.kernel_name.as_ref().or(self.running_kernel.as_ref()) {
            let base = Path::new("/lib/modules").join(kernel);
            prefixes.push(base.join("kernel/drivers/video"));
            prefixes.push(base.join("kernel/drivers/char"));
            prefixes.push(base.join("video"));
        }
        prefixes
    }
}

/// Files that must be moved out of the way before installing.
fn find_conflicts(package: &Package, module_prefixes: &[PathBuf]) -> Vec<PathBuf> {
    let mut conflicts: Vec<PathBuf> = Vec::new();
    let mut add = |path: PathBuf| {
        if !conflicts.contains(&path) {
            conflicts.push(path);
        }
    };

    for prefix in module_prefixes {
        for name in &package.bad_module_filenames {
            let candidate = prefix.join(name);
            if candidate.symlink_metadata().is_ok() {
                add(candidate);
            }
        }
    }

    for entry in package.entries() {
        let ft = entry.file_type();
        if ft.is_command() {
            continue;
        }
        let Some(dst) = entry.dst() else { continue };
        if dst.symlink_metadata().is_err() {
            continue;
        }
        if FileIdentity::probe(dst).same_file(&entry.identity()) {
            continue;
        }
        add(dst.to_path_buf());
    }

    conflicts
}

impl OperationPlanner for DefaultPlanner {
    fn build(
        &self,
        package: &Package,
        opts: &InstallerOptions,
    ) -> Result<OperationList, InstallError> {
        let mut list = OperationList::default();

        let remove_by_deleting = opts.no_backup || opts.kernel_module_only;
        for path in find_conflicts(package, &self.module_prefixes(opts)) {
            list.push(if remove_by_deleting {
                Operation::Delete { path }
            } else {
                Operation::Backup { path }
            });
        }

        for entry in package.entries() {
            if !entry.file_type().is_installable() {
                continue;
            }
            let dst = entry.dst().ok_or_else(|| {
                InstallError::stage(
                    "Operation list",
                    format!("no destination computed for '{}'", entry.file()),
                )
            })?;
            let src = package.resolve(entry.file());
            if FileIdentity::probe(dst).same_file(&entry.identity()) {
                log::debug!("[Commands] {} is already in place", dst.display());
                continue;
            }
            list.push(Operation::Install {
                src,
                dst: dst.to_path_buf(),
                mode: entry.mode(),
            });
        }

        for entry in package.entries() {
            if !entry.file_type().is_symlink() {
                continue;
            }
            let (Some(dst), Some(target)) = (entry.dst(), entry.target()) else {
                return Err(InstallError::stage(
                    "Operation list",
                    format!("symlink '{}' lacks a destination or target", entry.file()),
                ));
            };
            list.push(Operation::Symlink {
                link: dst.to_path_buf(),
                target: target.to_string(),
            });
        }

        for entry in package.entries() {
            if entry.file_type().is_command() {
                list.push(Operation::Run {
                    command: entry.file().to_string(),
                    dir: Some(package.root().to_path_buf()),
                });
            }
        }

        list.push(Operation::Run {
            command: "ldconfig".to_string(),
            dir: None,
        });
        let depmod = match &opts.kernel_name {
            Some(kernel) if !kernel.is_empty() => format!("depmod -aq {}", kernel),
            _ => "depmod -aq".to_string(),
        };
        list.push(Operation::Run {
            command: depmod,
            dir: None,
        });

        log::info!("[Commands] Built operation list with {} steps", list.len());
        Ok(list)
    }

    fn execute(
        &mut self,
        list: &OperationList,
        backup: &mut dyn BackupEngine,
        ui: &mut dyn UserInterface,
    ) -> Result<(), InstallError> {
        for op in list.operations() {
            ui.log(&op.describe());
            let result = match op {
                Operation::Backup { path } => backup.backup_file(path),
                Operation::Delete { path } => {
                    fs::remove_file(path).map_err(|e| format!("Cannot delete: {}", e))
                }
                Operation::Install { src, dst, mode } => install_file(src, dst, *mode)
                    .and_then(|_| backup.record_installed(dst)),
                Operation::Symlink { link, target } => create_symlink(link, target)
                    .and_then(|_| backup.record_installed(link)),
                Operation::Run { command, dir } => {
                    run_shell_in(command, dir.as_deref()).map(|_| ())
                }
            };

            if let Err(reason) = result {
                let message = format!("{} failed: {}", op.describe(), reason);
                ui.error(&message);
                if !ui.yes_no(false, "Continue installation anyway?") {
                    return Err(InstallError::OperationExecutionFailed(message));
                }
            }
        }

        Ok(())
    }
}

/// Copy `src` to `dst`, creating parent directories and applying `mode`.
pub fn install_file(src: &Path, dst: &Path, mode: u32) -> Result<(), String> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Cannot create {}: {}", parent.display(), e))?;
    }
    // Replace rather than write through an existing link.
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst).map_err(|e| format!("Cannot replace {}: {}", dst.display(), e))?;
    }
    fs::copy(src, dst).map_err(|e| format!("Cannot copy {}: {}", src.display(), e))?;
    fs::set_permissions(dst, fs::Permissions::from_mode(mode))
        .map_err(|e| format!("Cannot set mode on {}: {}", dst.display(), e))
}

/// Create `link -> target`, replacing any existing entry at `link`.
pub fn create_symlink(link: &Path, target: &str) -> Result<(), String> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Cannot create {}: {}", parent.display(), e))?;
    }
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link).map_err(|e| format!("Cannot replace {}: {}", link.display(), e))?;
    }
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| format!("Cannot create symlink {}: {}", link.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryExtras, FileType, PackageEntry};
    use tempfile::TempDir;

    fn planner() -> DefaultPlanner {
        DefaultPlanner {
            running_kernel: None,
        }
    }

    fn package_with(root: &Path, dst_root: &Path) -> Package {
        let mut pkg = Package::new(root);
        pkg.append(
            PackageEntry::new("libfoo.so.1", 0o755, FileType::XlibSharedLib, EntryExtras::default())
                .unwrap(),
        );
        pkg.append(
            PackageEntry::new(
                "libfoo.so",
                0o777,
                FileType::XlibSymlink,
                EntryExtras {
                    target: Some("libfoo.so.1".into()),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        pkg.append(
            PackageEntry::new("echo built", 0o644, FileType::KernelModuleCmd, EntryExtras::default())
                .unwrap(),
        );
        for entry in pkg.entries_mut() {
            if !entry.file_type().is_command() {
                let dst = dst_root.join(entry.name());
                entry.set_dst(dst);
            }
        }
        pkg
    }

    #[test]
    fn test_build_orders_operations() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(dst.path().join("libfoo.so.1"), b"old").unwrap();
        let pkg = package_with(src.path(), dst.path());

        let list = planner().build(&pkg, &InstallerOptions::default()).unwrap();
        let ops = list.operations();

        assert!(matches!(&ops[0], Operation::Backup { path } if path.ends_with("libfoo.so.1")));
        assert!(matches!(&ops[1], Operation::Install { mode: 0o755, .. }));
        assert!(matches!(&ops[2], Operation::Symlink { target, .. } if target == "libfoo.so.1"));
        assert_eq!(
            ops[3],
            Operation::Run {
                command: "echo built".into(),
                dir: Some(src.path().to_path_buf()),
            }
        );
        assert_eq!(
            ops[4],
            Operation::Run {
                command: "ldconfig".into(),
                dir: None,
            }
        );
        assert_eq!(
            ops[5],
            Operation::Run {
                command: "depmod -aq".into(),
                dir: None,
            }
        );
    }

    #[test]
    fn test_no_backup_deletes_and_depmod_names_kernel() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(dst.path().join("libfoo.so"), b"stale").unwrap();
        let pkg = package_with(src.path(), dst.path());

        let mut opts = InstallerOptions::default();
        opts.no_backup = true;
        opts.kernel_name = Some("5.10.0-test".into());
        let list = planner().build(&pkg, &opts).unwrap();

        assert!(matches!(&list.operations()[0], Operation::Delete { .. }));
        assert_eq!(
            list.operations().last(),
            Some(&Operation::Run {
                command: "depmod -aq 5.10.0-test".into(),
                dir: None,
            })
        );
    }

    #[test]
    fn test_stale_module_files_are_conflicts() {
        let src = TempDir::new().unwrap();
        let modules = TempDir::new().unwrap();
        std::fs::write(modules.path().join("nvidia.o"), b"old module").unwrap();

        let mut pkg = Package::new(src.path());
        pkg.bad_module_filenames = vec!["nvidia.o".into(), "absent.o".into()];

        let mut opts = InstallerOptions::default();
        opts.kernel_module_installation_path = Some(modules.path().to_path_buf());
        let list = planner().build(&pkg, &opts).unwrap();

        let backups: Vec<_> = list
            .operations()
            .iter()
            .filter(|op| matches!(op, Operation::Backup { .. }))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    /// Package commands run from the package root, not the installer's cwd.
    #[test]
    fn test_package_commands_run_in_package_root() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("make-module.sh"), "echo built > done.txt\n").unwrap();

        let mut pkg = Package::new(root.path());
        pkg.append(
            PackageEntry::new(
                "sh make-module.sh",
                0o644,
                FileType::KernelModuleCmd,
                EntryExtras::default(),
            )
            .unwrap(),
        );

        let list = planner().build(&pkg, &InstallerOptions::default()).unwrap();
        let run = OperationList {
            ops: vec![list.operations()[0].clone()],
        };
        assert!(list.operations()[0].describe().contains(&root.path().display().to_string()));

        let mut backup = crate::system::backup::DirectoryBackup::new(root.path().join("backup"));
        let mut ui = crate::ui::StreamUi::new(true, false);
        planner().execute(&run, &mut backup, &mut ui).unwrap();

        assert_eq!(
            std::fs::read_to_string(root.path().join("done.txt")).unwrap().trim(),
            "built"
        );
    }

    #[test]
    fn test_install_file_and_symlink() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        std::fs::write(&src, b"payload").unwrap();
        let dst = temp.path().join("out/bin/tool");

        install_file(&src, &dst, 0o700).unwrap();
        let mode = std::fs::metadata(&dst).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o700);

        let link = temp.path().join("out/bin/tool-link");
        create_symlink(&link, "tool").unwrap();
        create_symlink(&link, "tool").unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("tool"));
    }
}
