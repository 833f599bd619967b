//! Integration tests for the config module
//!
//! Covers the loader and validator working together:
//! - loader: TOML file I/O, partial files falling back to defaults
//! - validator: absolute prefixes and flag reconciliation
//!
//! Test Organization:
//! - Configuration Loading (2 tests)
//! - Configuration Saving (2 tests)
//! - Configuration Validation (3 tests)

use driver_installer::config::{loader, validator, Distro, InstallerOptions, TlsOverride};
use driver_installer::error::ConfigError;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

// =========================================================================
// CONFIGURATION LOADING
// =========================================================================

#[test]
fn test_load_partial_file_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("installer.toml");
    fs::write(
        &path,
        r#"
accept_license = true
which_tls = "classic"
distro = "suse"
opengl_prefix = "/opt/gl"
"#,
    )
    .unwrap();

    let opts = loader::load_options_from_file(&path).unwrap();

    assert!(opts.accept_license);
    assert_eq!(opts.which_tls, TlsOverride::Classic);
    assert_eq!(opts.distro, Distro::Suse);
    assert_eq!(opts.opengl_prefix, PathBuf::from("/opt/gl"));
    // Untouched fields come from the defaults
    assert_eq!(opts.x_prefix, PathBuf::from("/usr/X11R6"));
    assert!(opts.logging);
}

#[test]
fn test_load_invalid_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "accept_license = [not toml").unwrap();

    let result = loader::load_options_from_file(&path);
    assert!(matches!(result, Err(ConfigError::InvalidToml(_))));
}

// =========================================================================
// CONFIGURATION SAVING
// =========================================================================

#[test]
fn test_save_then_load_preserves_options() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/installer.toml");

    let opts = InstallerOptions {
        expert: true,
        kernel_name: Some("6.1.0-custom".to_string()),
        x_module_path: Some(PathBuf::from("/usr/lib/xorg/modules")),
        ..Default::default()
    };
    loader::save_options_to_file(&opts, &path).unwrap();

    assert_eq!(loader::load_options_from_file(&path).unwrap(), opts);
}

#[test]
fn test_save_rejects_wrong_extension() {
    let dir = TempDir::new().unwrap();
    let result = loader::save_options_to_file(
        &InstallerOptions::default(),
        &dir.path().join("installer.json"),
    );
    assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
}

// =========================================================================
// CONFIGURATION VALIDATION
// =========================================================================

#[test]
fn test_relative_prefix_from_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("installer.toml");
    fs::write(&path, "utility_prefix = \"usr/local\"\n").unwrap();

    let opts = loader::load_options_from_file(&path).unwrap();
    let err = validator::validate_options(&opts).unwrap_err();
    assert!(err.to_string().contains("utility installation prefix"));
}

#[test]
fn test_reconcile_notes_each_adjustment() {
    let opts = InstallerOptions {
        kernel_name: Some("6.1.0-custom".to_string()),
        dkms: true,
        no_kernel_module_source: true,
        run_xconfig: true,
        no_xconfig_question: true,
        ..Default::default()
    };

    let (opts, notes) = validator::validate_options(&opts).unwrap();

    assert!(opts.no_precompiled_interface);
    assert!(!opts.dkms);
    assert!(!opts.run_xconfig);
    assert_eq!(notes.len(), 3);
}

#[test]
fn test_conflicting_kernel_flags() {
    let opts = InstallerOptions {
        kernel_module_only: true,
        no_kernel_module: true,
        ..Default::default()
    };
    assert!(matches!(
        validator::validate_options(&opts),
        Err(ConfigError::ConflictDetected(_))
    ));
}
