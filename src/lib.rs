//! Driver Installer Backend
//!
//! This crate installs a vendor driver package onto a running machine: it
//! validates the package manifest, acquires a kernel module (linking a
//! precompiled interface or compiling from source), stages file installation,
//! and executes it with interactive checkpoints and a backup record.
//!
//! **Architecture**: The pipeline in `orchestrator` reaches the machine and the
//! operator only through collaborator traits, each with a default implementation.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Package and package entry model
//! - **manifest**: Manifest parser
//! - **kernel**: Kernel module toolchain, precompiled bundles and acquisition
//! - **system**: Environment probes, operation lists, backup, hooks, DKMS, X config
//! - **config**: Installer options, TOML loading and validation
//! - **ui**: Operator interaction
//! - **orchestrator**: The staged installation pipeline

// Core foundational modules
pub mod error;
pub mod models;
pub mod manifest;

// System abstraction module (collaborator traits and defaults)
pub mod system;

// Configuration management module
pub mod config;

// Operator interaction
pub mod ui;

// Robust, decoupled logging system
pub mod log_collector;

// Kernel module acquisition
pub mod kernel;

// Installation orchestration and pipeline state
pub mod orchestrator;

// Re-export the log crate for macro usage
pub use log;

// Re-export log collector for use throughout the system
pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

// Re-export error types for easy access
pub use error::{ConfigError, EntryError, InstallError, ManifestError, PrecompiledError, Result};

// Re-export model types for easy access
pub use models::{EntryExtras, FileArch, FileIdentity, FileType, Package, PackageEntry, TlsClass};

pub use manifest::{parse_manifest, FileSource, ManifestLines, ManifestSource};

pub use config::{Distro, InstallerOptions, TlsOverride};

pub use kernel::{acquire_kernel_module, KernelToolchain, PrecompiledInfo, SystemToolchain};

pub use orchestrator::{
    add_kernel_interface, install, install_from_package, Collaborators, Halt, InstallOutcome,
    PipelineState, StageResult,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
