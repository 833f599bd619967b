//! DKMS registration of the kernel module sources.

use crate::config::InstallerOptions;
use crate::error::InstallError;
use crate::models::Package;
use crate::system::{find_program, run_command, DkmsAdapter};

/// Drives the `dkms` command line tool.
#[derive(Debug, Default)]
pub struct DkmsCli;

/// Arguments for each `dkms` invocation, in order.
pub fn dkms_invocations(module: &str, version: &str, kernel: Option<&str>) -> Vec<Vec<String>> {
    ["add", "build", "install"]
        .iter()
        .map(|action| {
            let mut args = vec![
                action.to_string(),
                "-m".to_string(),
                module.to_string(),
                "-v".to_string(),
                version.to_string(),
            ];
            if let Some(kernel) = kernel {
                args.push("-k".to_string());
                args.push(kernel.to_string());
            }
            args
        })
        .collect()
}

impl DkmsAdapter for DkmsCli {
    fn available(&self) -> bool {
        find_program("dkms").is_some()
    }

    fn register(&mut self, package: &Package, opts: &InstallerOptions) -> Result<(), InstallError> {
        log::info!(
            "[DKMS] Registering {} {} with DKMS",
            package.kernel_module_name,
            package.version
        );

        for args in dkms_invocations(
            &package.kernel_module_name,
            &package.version,
            opts.kernel_name.as_deref(),
        ) {
            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            run_command("dkms", &argv).map_err(|reason| {
                InstallError::stage("DKMS registration", format!("dkms {}: {}", args[0], reason))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocations_without_kernel() {
        let calls = dkms_invocations("nvidia", "1.0-9631", None);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], vec!["add", "-m", "nvidia", "-v", "1.0-9631"]);
        assert_eq!(calls[2][0], "install");
    }

    #[test]
    fn test_invocations_name_kernel() {
        let calls = dkms_invocations("nvidia", "1.0", Some("5.15.0"));
        assert!(calls.iter().all(|c| c.ends_with(&["-k".to_string(), "5.15.0".to_string()])));
    }
}
