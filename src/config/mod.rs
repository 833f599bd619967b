//! Installer configuration.
//!
//! `InstallerOptions` is the single value every pipeline stage reads. It is
//! built from defaults, an optional TOML file (`loader`), and command-line
//! overrides applied in `main.rs`, then checked by `validator`.
//!
//! # Module Structure
//!
//! - `loader`: Reads and writes option files
//! - `validator`: Absolute-prefix checks and conflicting-flag reconciliation

pub mod loader;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the installation log.
pub const DEFAULT_LOG_FILE_NAME: &str = "/var/log/nvidia-installer.log";

/// Forced TLS flavour, overriding the runtime probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TlsOverride {
    #[default]
    Auto,
    Classic,
    New,
}

/// Distribution family, as far as the installer cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    Suse,
    UnitedLinux,
    #[default]
    Other,
}

impl Distro {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distro::Suse => "suse",
            Distro::UnitedLinux => "unitedlinux",
            Distro::Other => "other",
        }
    }
}

/// Every flag and path the installation pipeline consults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerOptions {
    // Interaction
    pub accept_license: bool,
    pub expert: bool,
    pub no_questions: bool,

    // Kernel module
    pub no_kernel_module: bool,
    pub no_kernel_module_source: bool,
    pub kernel_module_only: bool,
    pub dkms: bool,
    pub no_precompiled_interface: bool,
    pub ignore_cc_version_check: bool,
    pub kernel_name: Option<String>,
    pub kernel_source_path: Option<PathBuf>,
    pub kernel_module_installation_path: Option<PathBuf>,
    pub precompiled_search_path: Option<PathBuf>,

    // File set
    pub no_opengl_files: bool,
    pub opengl_headers: bool,
    pub which_tls: TlsOverride,
    pub no_backup: bool,

    // X configuration
    pub no_xconfig_question: bool,
    pub run_xconfig: bool,

    // Prefixes
    pub x_prefix: PathBuf,
    pub x_module_path: Option<PathBuf>,
    pub opengl_prefix: PathBuf,
    pub utility_prefix: PathBuf,
    pub documentation_prefix: PathBuf,
    pub kernel_module_src_prefix: PathBuf,
    pub x_libdir: String,
    pub opengl_libdir: String,
    pub compat32_libdir: String,
    pub utility_libdir: String,

    // Logging and environment
    pub logging: bool,
    pub log_file_name: PathBuf,
    pub distro: Distro,
    pub package_root: PathBuf,
    pub tmpdir: Option<PathBuf>,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        InstallerOptions {
            accept_license: false,
            expert: false,
            no_questions: false,
            no_kernel_module: false,
            no_kernel_module_source: false,
            kernel_module_only: false,
            dkms: false,
            no_precompiled_interface: false,
            ignore_cc_version_check: false,
            kernel_name: None,
            kernel_source_path: None,
            kernel_module_installation_path: None,
            precompiled_search_path: None,
            no_opengl_files: false,
            opengl_headers: false,
            which_tls: TlsOverride::Auto,
            no_backup: false,
            no_xconfig_question: false,
            run_xconfig: false,
            x_prefix: PathBuf::from("/usr/X11R6"),
            x_module_path: None,
            opengl_prefix: PathBuf::from("/usr"),
            utility_prefix: PathBuf::from("/usr"),
            documentation_prefix: PathBuf::from("/usr"),
            kernel_module_src_prefix: PathBuf::from("/usr/src"),
            x_libdir: "lib".to_string(),
            opengl_libdir: "lib".to_string(),
            compat32_libdir: "lib32".to_string(),
            utility_libdir: "lib".to_string(),
            logging: true,
            log_file_name: PathBuf::from(DEFAULT_LOG_FILE_NAME),
            distro: Distro::Other,
            package_root: PathBuf::from("."),
            tmpdir: None,
        }
    }
}

impl InstallerOptions {
    /// Directory holding X server modules.
    pub fn x_module_dir(&self) -> PathBuf {
        match &self.x_module_path {
            Some(path) => path.clone(),
            None => self.x_prefix.join(&self.x_libdir).join("modules"),
        }
    }

    /// True when installing for a kernel other than the running one.
    pub fn targets_other_kernel(&self) -> bool {
        self.kernel_name.is_some()
    }

    /// Prefix settings that must be absolute, with their display names.
    pub fn prefixes(&self) -> Vec<(&'static str, &Path)> {
        let mut list = vec![
            ("X installation prefix", self.x_prefix.as_path()),
            ("OpenGL installation prefix", self.opengl_prefix.as_path()),
            ("utility installation prefix", self.utility_prefix.as_path()),
            ("documentation prefix", self.documentation_prefix.as_path()),
            ("kernel module source prefix", self.kernel_module_src_prefix.as_path()),
        ];
        if let Some(path) = &self.x_module_path {
            list.push(("X module path", path.as_path()));
        }
        list
    }

    /// Lines written at the top of the install log.
    pub fn status_lines(&self) -> Vec<String> {
        let flag = |b: bool| if b { "true" } else { "false" };
        let opt = |p: &Option<PathBuf>| match p {
            Some(p) => p.display().to_string(),
            None => "(not specified)".to_string(),
        };
        vec![
            "option status:".to_string(),
            format!("  license pre-accepted     : {}", flag(self.accept_license)),
            format!("  expert                   : {}", flag(self.expert)),
            format!("  no questions             : {}", flag(self.no_questions)),
            format!("  kernel module only       : {}", flag(self.kernel_module_only)),
            format!("  no kernel module         : {}", flag(self.no_kernel_module)),
            format!("  dkms                     : {}", flag(self.dkms)),
            format!("  no precompiled interface : {}", flag(self.no_precompiled_interface)),
            format!("  no backup                : {}", flag(self.no_backup)),
            format!("  no opengl files          : {}", flag(self.no_opengl_files)),
            format!(
                "  kernel name              : {}",
                self.kernel_name.as_deref().unwrap_or("(running kernel)")
            ),
            format!("  X install prefix         : {}", self.x_prefix.display()),
            format!("  OpenGL install prefix    : {}", self.opengl_prefix.display()),
            format!("  utility install prefix   : {}", self.utility_prefix.display()),
            format!("  kernel source path       : {}", opt(&self.kernel_source_path)),
            format!(
                "  kernel install path      : {}",
                opt(&self.kernel_module_installation_path)
            ),
            format!("  precompiled search path  : {}", opt(&self.precompiled_search_path)),
            format!("  distro                   : {}", self.distro.as_str()),
        ]
    }
}
