//! Unified error type hierarchy for the driver installer
//!
//! Provides structured error handling with ManifestError, ConfigError,
//! PrecompiledError, and the pipeline-level InstallError.

use std::io;
use thiserror::Error;

/// Manifest loading and grammar errors.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("No package found for installation: {0}")]
    NotFound(String),

    #[error("Failure opening package's manifest file: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid manifest file; error on line {line}")]
    Malformed { line: usize },
}

impl ManifestError {
    /// Line number of the grammar violation, if this is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            ManifestError::Malformed { line } => Some(*line),
            _ => None,
        }
    }
}

/// Package entry construction errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("Entry '{file}' of type {file_type} has mismatched optional fields: {detail}")]
    FieldMismatch {
        file: String,
        file_type: &'static str,
        detail: String,
    },
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflicting settings detected: {0}")]
    ConflictDetected(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Precompiled kernel interface bundle errors.
#[derive(Error, Debug)]
pub enum PrecompiledError {
    #[error("Not a precompiled interface bundle: {0}")]
    BadHeader(String),

    #[error("Invalid bundle header: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Checksum mismatch (expected {expected:#010x}, found {found:#010x})")]
    CrcMismatch { expected: u32, found: u32 },

    #[error("IO error during bundle operations: {0}")]
    IoError(#[from] io::Error),
}

/// Pipeline-level failure taxonomy.
///
/// Every variant here terminates the install with the Failed outcome. Declining
/// a prompt is not an error and never reaches this type.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Required tooling missing: {0}")]
    ToolingMissing(String),

    #[error("Tooling incompatible with target kernel: {0}")]
    ToolingIncompatible(String),

    #[error("Kernel module build failed: {0}")]
    BuildFailed(String),

    #[error("Kernel module link failed: {0}")]
    LinkFailed(String),

    #[error("Kernel module test failed: {0}")]
    TestFailed(String),

    #[error("Unable to initialize backup record: {0}")]
    BackupInitFailed(String),

    #[error("Operation list execution failed: {0}")]
    OperationExecutionFailed(String),

    #[error("Hook '{hook}' failed: {reason}")]
    HookFailed { hook: String, reason: String },

    #[error("{stage} failed: {reason}")]
    Stage { stage: &'static str, reason: String },
}

impl InstallError {
    /// Shorthand for a failure inside a named pipeline stage.
    pub fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        InstallError::Stage {
            stage,
            reason: reason.into(),
        }
    }

    /// Get a user-facing error message suitable for UI display
    pub fn user_message(&self) -> String {
        match self {
            InstallError::Manifest(e) => e.to_string(),
            InstallError::PreconditionFailed(msg) => msg.clone(),
            InstallError::ToolingMissing(msg) => {
                format!("A required tool could not be found: {}", msg)
            }
            InstallError::ToolingIncompatible(msg) => {
                format!("The installed toolchain does not match the kernel: {}", msg)
            }
            InstallError::BuildFailed(msg) => format!("Unable to build the kernel module: {}", msg),
            InstallError::LinkFailed(msg) => format!("Unable to link the kernel module: {}", msg),
            InstallError::TestFailed(msg) => format!("Unable to load the kernel module: {}", msg),
            InstallError::BackupInitFailed(msg) => format!("Unable to create a backup record: {}", msg),
            InstallError::OperationExecutionFailed(msg) => format!("Installation step failed: {}", msg),
            InstallError::HookFailed { hook, reason } => {
                format!("The distribution-provided {} script failed: {}", hook, reason)
            }
            InstallError::Stage { stage, reason } => format!("{}: {}", stage, reason),
        }
    }
}

/// Top-level result type for pipeline operations.
pub type Result<T> = std::result::Result<T, InstallError>;
