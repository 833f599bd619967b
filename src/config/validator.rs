//! Options validation and conflicting-flag reconciliation.

use crate::config::InstallerOptions;
use crate::error::ConfigError;
use std::path::Path;

/// Validate that an installation prefix is an absolute path.
pub fn validate_prefix(label: &str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(format!(
            "The {} cannot be empty",
            label
        )));
    }

    if !path.is_absolute() {
        return Err(ConfigError::ValidationFailed(format!(
            "The {} '{}' is not an absolute path",
            label,
            path.display()
        )));
    }

    Ok(())
}

/// Validate every installation prefix.
pub fn validate_prefixes(options: &InstallerOptions) -> Result<(), ConfigError> {
    for (label, path) in options.prefixes() {
        validate_prefix(label, path)?;
    }
    Ok(())
}

/// Reconcile flags that cannot hold together.
///
/// Returns the adjusted options plus one note per adjustment. Combinations
/// that cannot be reconciled are a `ConflictDetected` error.
pub fn reconcile(options: &InstallerOptions) -> Result<(InstallerOptions, Vec<String>), ConfigError> {
    let mut opts = options.clone();
    let mut notes = Vec::new();

    if opts.kernel_module_only && opts.no_kernel_module {
        return Err(ConfigError::ConflictDetected(
            "kernel_module_only and no_kernel_module request opposite things".to_string(),
        ));
    }

    if opts.kernel_module_only && opts.no_opengl_files {
        // Kernel-module-only already removes every non-module entry.
        opts.no_opengl_files = false;
    }

    if opts.targets_other_kernel() && !opts.no_precompiled_interface {
        opts.no_precompiled_interface = true;
        notes.push(
            "Precompiled kernel interfaces are only matched against the running kernel; \
             disabling them for an explicitly named kernel."
                .to_string(),
        );
    }

    if opts.dkms && opts.no_kernel_module_source {
        opts.dkms = false;
        notes.push(
            "DKMS registration needs the kernel module sources; disabling DKMS because \
             source installation was turned off."
                .to_string(),
        );
    }

    if opts.run_xconfig && opts.no_xconfig_question {
        opts.run_xconfig = false;
        notes.push("X configuration disabled by no_xconfig_question.".to_string());
    }

    if opts.no_questions && opts.expert {
        notes.push("Expert mode prompts will be answered with their defaults.".to_string());
    }

    for note in &notes {
        log::debug!("[Config] {}", note);
    }

    Ok((opts, notes))
}

/// Full check: reconcile, then validate prefixes of the result.
pub fn validate_options(options: &InstallerOptions) -> Result<(InstallerOptions, Vec<String>), ConfigError> {
    let (opts, notes) = reconcile(options)?;
    validate_prefixes(&opts)?;
    Ok((opts, notes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_prefix_absolute() {
        assert!(validate_prefix("prefix", Path::new("/usr")).is_ok());
        assert!(validate_prefix("prefix", Path::new("usr")).is_err());
        assert!(validate_prefix("prefix", Path::new("")).is_err());
    }

    #[test]
    fn test_default_options_validate() {
        let (opts, notes) = validate_options(&InstallerOptions::default()).unwrap();
        assert_eq!(opts, InstallerOptions::default());
        assert!(notes.is_empty());
    }

    #[test]
    fn test_relative_x_module_path_rejected() {
        let mut opts = InstallerOptions::default();
        opts.x_module_path = Some(PathBuf::from("lib/modules"));
        assert!(validate_options(&opts).is_err());
    }

    #[test]
    fn test_kernel_name_disables_precompiled() {
        let mut opts = InstallerOptions::default();
        opts.kernel_name = Some("5.15.0-other".into());
        let (opts, notes) = reconcile(&opts).unwrap();
        assert!(opts.no_precompiled_interface);
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn test_dkms_without_sources() {
        let mut opts = InstallerOptions::default();
        opts.dkms = true;
        opts.no_kernel_module_source = true;
        let (opts, _) = reconcile(&opts).unwrap();
        assert!(!opts.dkms);
    }

    #[test]
    fn test_opposite_kernel_flags_conflict() {
        let mut opts = InstallerOptions::default();
        opts.kernel_module_only = true;
        opts.no_kernel_module = true;
        assert!(matches!(reconcile(&opts), Err(ConfigError::ConflictDetected(_))));
    }
}
