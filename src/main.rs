use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use driver_installer::config::{loader, validator, InstallerOptions, TlsOverride};
use driver_installer::kernel::SystemToolchain;
use driver_installer::system::backup::DirectoryBackup;
use driver_installer::system::commands::DefaultPlanner;
use driver_installer::system::dkms::DkmsCli;
use driver_installer::system::hooks::ScriptHookRunner;
use driver_installer::system::probes::SystemProbe;
use driver_installer::system::xconfig::NvidiaXConfig;
use driver_installer::ui::{StreamUi, UserInterface};
use driver_installer::{add_kernel_interface, install_from_package, Collaborators, LogCollector};

#[derive(Parser, Debug)]
#[command(name = "driver-installer", version, about = "Install a driver package onto this machine")]
struct Cli {
    /// Installer options file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    flags: Flags,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Install the package in the package directory (default)
    Install,
    /// Build a precompiled kernel interface for the running kernel and add it to the package
    AddKernelInterface,
}

/// Command-line overrides for the options file.
#[derive(Args, Debug, Default)]
struct Flags {
    #[arg(short = 'a', long)]
    accept_license: bool,

    #[arg(short = 'e', long)]
    expert: bool,

    /// Answer every question with its default
    #[arg(short = 'q', long)]
    no_questions: bool,

    #[arg(long)]
    no_kernel_module: bool,

    #[arg(long)]
    no_kernel_module_source: bool,

    #[arg(short = 'K', long)]
    kernel_module_only: bool,

    /// Register the kernel module sources with DKMS
    #[arg(long)]
    dkms: bool,

    #[arg(short = 'n', long)]
    no_precompiled_interface: bool,

    #[arg(long = "no-cc-version-check")]
    ignore_cc_version_check: bool,

    #[arg(long)]
    no_opengl_files: bool,

    #[arg(long)]
    opengl_headers: bool,

    #[arg(long)]
    no_backup: bool,

    #[arg(long)]
    no_nvidia_xconfig_question: bool,

    #[arg(long)]
    run_nvidia_xconfig: bool,

    #[arg(long, value_enum)]
    force_tls: Option<TlsOverride>,

    /// Build and install for this kernel instead of the running one
    #[arg(short = 'k', long, value_name = "KERNEL")]
    kernel_name: Option<String>,

    #[arg(long, value_name = "DIR")]
    kernel_source_path: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    kernel_install_path: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    precompiled_kernel_interfaces_path: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    x_prefix: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    x_module_path: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    opengl_prefix: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    utility_prefix: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    documentation_prefix: Option<PathBuf>,

    #[arg(short = 'l', long, value_name = "FILE")]
    log_file_name: Option<PathBuf>,

    /// Directory holding the package and its .manifest
    #[arg(long, value_name = "DIR")]
    package_root: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    tmpdir: Option<PathBuf>,
}

impl Flags {
    /// Layer the flags that were given on top of `opts`.
    fn apply(self, mut opts: InstallerOptions) -> InstallerOptions {
        opts.accept_license |= self.accept_license;
        opts.expert |= self.expert;
        opts.no_questions |= self.no_questions;
        opts.no_kernel_module |= self.no_kernel_module;
        opts.no_kernel_module_source |= self.no_kernel_module_source;
        opts.kernel_module_only |= self.kernel_module_only;
        opts.dkms |= self.dkms;
        opts.no_precompiled_interface |= self.no_precompiled_interface;
        opts.ignore_cc_version_check |= self.ignore_cc_version_check;
        opts.no_opengl_files |= self.no_opengl_files;
        opts.opengl_headers |= self.opengl_headers;
        opts.no_backup |= self.no_backup;
        opts.no_xconfig_question |= self.no_nvidia_xconfig_question;
        opts.run_xconfig |= self.run_nvidia_xconfig;

        if let Some(tls) = self.force_tls {
            opts.which_tls = tls;
        }
        if self.kernel_name.is_some() {
            opts.kernel_name = self.kernel_name;
        }
        if self.kernel_source_path.is_some() {
            opts.kernel_source_path = self.kernel_source_path;
        }
        if self.kernel_install_path.is_some() {
            opts.kernel_module_installation_path = self.kernel_install_path;
        }
        if self.precompiled_kernel_interfaces_path.is_some() {
            opts.precompiled_search_path = self.precompiled_kernel_interfaces_path;
        }
        if self.x_module_path.is_some() {
            opts.x_module_path = self.x_module_path;
        }
        if self.tmpdir.is_some() {
            opts.tmpdir = self.tmpdir;
        }
        if let Some(path) = self.x_prefix {
            opts.x_prefix = path;
        }
        if let Some(path) = self.opengl_prefix {
            opts.opengl_prefix = path;
        }
        if let Some(path) = self.utility_prefix {
            opts.utility_prefix = path;
        }
        if let Some(path) = self.documentation_prefix {
            opts.documentation_prefix = path;
        }
        if let Some(path) = self.log_file_name {
            opts.log_file_name = path;
        }
        if let Some(path) = self.package_root {
            opts.package_root = path;
        }
        opts
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Install);

    let base = loader::load_or_default(cli.config.as_deref())
        .context("Failed to load installer options")?;
    let (mut opts, notes) = validator::validate_options(&cli.flags.apply(base))
        .context("Invalid installer options")?;

    if command == Command::Install && !nix::unistd::Uid::effective().is_root() {
        bail!("driver-installer must be run as root");
    }

    let mut ui = StreamUi::new(opts.no_questions, opts.expert);

    // =========================================================================
    // LOG COLLECTOR - INSTALL LOG FILE
    // =========================================================================
    let collector = if opts.logging {
        match LogCollector::new(&opts.log_file_name, &opts.status_lines()) {
            Ok(collector) => {
                if let Err(e) = collector.install_global() {
                    eprintln!("[Main] WARNING: {}", e);
                }
                Some(collector)
            }
            Err(e) => {
                ui.warn(&format!("Logging disabled: {}", e));
                opts.logging = false;
                None
            }
        }
    } else {
        None
    };

    for note in &notes {
        ui.log(note);
    }

    let ok = match command {
        Command::Install => {
            let mut probe = SystemProbe::new();
            let mut planner = DefaultPlanner::new();
            let mut backup = DirectoryBackup::default();
            let mut toolchain = SystemToolchain::new();
            let mut hooks = ScriptHookRunner::default();
            let mut dkms = DkmsCli;
            let mut xconfig = NvidiaXConfig;

            let mut collaborators = Collaborators {
                ui: &mut ui,
                probe: &mut probe,
                planner: &mut planner,
                backup: &mut backup,
                toolchain: &mut toolchain,
                hooks: &mut hooks,
                dkms: &mut dkms,
                xconfig: &mut xconfig,
            };
            install_from_package(opts, &mut collaborators)
        }
        Command::AddKernelInterface => {
            let mut toolchain = SystemToolchain::new();
            add_kernel_interface(&opts, &mut toolchain, &mut ui)
        }
    };

    // Wait for the writer thread before the process exits
    if let Some(collector) = collector {
        if let Err(e) = collector.wait_for_empty() {
            eprintln!("[Main] WARNING: Failed to flush the install log: {}", e);
        }
    }

    Ok(ok)
}
