//! Phase 3: File set - trim, rewrite and place the package's entries.
//!
//! Everything here mutates the `Package` in place or returns adjusted options;
//! nothing touches the installed system.

use crate::config::validator::validate_prefix;
use crate::config::{InstallerOptions, TlsOverride};
use crate::error::InstallError;
use crate::log_info;
use crate::models::{EntryExtras, FileArch, FileType, Package, PackageEntry, TlsClass};
use crate::orchestrator::state::{PipelineState, StageResult};
use crate::orchestrator::Collaborators;
use crate::ui::UserInterface;
use std::fs;
use std::path::{Path, PathBuf};

/// Machine architecture that carries 32-bit compatibility libraries.
pub const COMPAT32_HOST_ARCH: &str = "x86_64";

/// Run the whole file-set phase.
pub fn transform_file_set(
    state: &mut PipelineState,
    package: &mut Package,
    c: &mut Collaborators<'_>,
) -> StageResult<()> {
    if state.options.kernel_module_only {
        let removed = package.strip_non_kernel_module_entries();
        log_info!("[Files] Kernel module only: removed {} entries", removed);
    } else {
        state.options = get_prefixes(&state.options, c)?;
        state.options = should_install_opengl_headers(&state.options, package, c);
        select_tls_class(&state.options, package, c);

        let scratch = state.scratch_dir()?.to_path_buf();
        process_libgl_la_files(&state.options, package, &scratch)?;
        process_dot_desktop_files(&state.options, package, &scratch)?;

        if c.probe.machine_arch() == COMPAT32_HOST_ARCH {
            should_install_compat32_files(package, c);
        }
    }

    if state.options.no_opengl_files {
        let removed = package.strip_opengl_entries();
        log_info!("[Files] Not installing OpenGL files: removed {} entries", removed);
    }

    if state.options.no_kernel_module_source {
        package.retain_entries(|e| e.file_type() != FileType::KernelModuleSrc);
    }

    set_destinations(&state.options, package)?;
    Ok(())
}

fn ask(ui: &mut dyn UserInterface, current: &Path, prompt: &str) -> PathBuf {
    PathBuf::from(ui.get_input(&current.to_string_lossy(), prompt).trim())
}

/// Expert mode asks for each installation prefix; all must be absolute.
pub fn get_prefixes(
    opts: &InstallerOptions,
    c: &mut Collaborators<'_>,
) -> StageResult<InstallerOptions> {
    let mut opts = opts.clone();

    if opts.expert {
        opts.x_prefix = ask(
            &mut *c.ui,
            &opts.x_prefix,
            "X installation prefix (only under rare circumstances should this be changed \
             from the default)",
        );
        opts.opengl_prefix = ask(
            &mut *c.ui,
            &opts.opengl_prefix,
            "OpenGL installation prefix (only under rare circumstances should this be \
             changed from the default)",
        );
        opts.utility_prefix = ask(
            &mut *c.ui,
            &opts.utility_prefix,
            "Installation prefix for the installer and the NVIDIA utilities (only under rare \
             circumstances should this be changed from the default)",
        );
    }

    for (label, path) in opts.prefixes() {
        validate_prefix(label, path)
            .map_err(|e| InstallError::stage("Installation prefixes", e.to_string()))?;
    }

    c.ui.log(&format!("X installation prefix is: '{}'", opts.x_prefix.display()));
    c.ui.log(&format!("OpenGL installation prefix is: '{}'", opts.opengl_prefix.display()));
    c.ui.log(&format!("Utility installation prefix is: '{}'", opts.utility_prefix.display()));
    Ok(opts)
}

/// Expert mode asks about header files; declined headers are removed.
pub fn should_install_opengl_headers(
    opts: &InstallerOptions,
    package: &mut Package,
    c: &mut Collaborators<'_>,
) -> InstallerOptions {
    let mut opts = opts.clone();
    if !package.has_entries_of_type(FileType::OpenGlHeader) {
        return opts;
    }

    if opts.expert {
        opts.opengl_headers = c
            .ui
            .yes_no(opts.opengl_headers, "Install NVIDIA's OpenGL header files?");
        c.ui.log(&format!(
            "Installation {} install the OpenGL header files.",
            if opts.opengl_headers { "will" } else { "will not" }
        ));
    }

    if !opts.opengl_headers {
        package.retain_entries(|e| e.file_type() != FileType::OpenGlHeader);
    }
    opts
}

/// Keep the TLS library flavour the C runtime supports.
pub fn select_tls_class(opts: &InstallerOptions, package: &mut Package, c: &mut Collaborators<'_>) {
    let keep = match opts.which_tls {
        TlsOverride::Classic => TlsClass::Classic,
        TlsOverride::New => TlsClass::New,
        TlsOverride::Auto => {
            if c.probe.new_tls_supported() {
                TlsClass::New
            } else {
                TlsClass::Classic
            }
        }
    };

    let removed = package.retain_entries(|e| match e.class() {
        Some(class) => class == keep,
        None => true,
    });
    c.ui.log(&format!(
        "Using {} TLS libraries ({} entries of the other class removed).",
        keep.as_str(),
        removed
    ));
}

/// Placeholder substitution in one text file.
pub fn substitute_placeholders(content: &str, replacements: &[(&str, String)]) -> String {
    replacements
        .iter()
        .fold(content.to_string(), |text, (from, to)| text.replace(from, to))
}

/// Write rewritten copies of every entry of `file_type` into `scratch` and
/// move them to the end of the entry list in place of the originals.
fn rewrite_entries<F>(
    package: &mut Package,
    file_type: FileType,
    scratch: &Path,
    mut replacements_for: F,
) -> Result<usize, InstallError>
where
    F: FnMut(&PackageEntry) -> Vec<(&'static str, String)>,
{
    let originals: Vec<PackageEntry> = package.entries_of_type(file_type).cloned().collect();
    if originals.is_empty() {
        return Ok(0);
    }

    let mut rewritten = Vec::with_capacity(originals.len());
    for (index, entry) in originals.iter().enumerate() {
        let src = package.resolve(entry.file());
        let content = fs::read_to_string(&src).map_err(|e| {
            InstallError::stage(
                "File rewriting",
                format!("unable to read '{}': {}", src.display(), e),
            )
        })?;

        let dir = scratch.join(format!("{}-{}", file_type.as_str(), index));
        let out = dir.join(entry.name());
        fs::create_dir_all(&dir)
            .and_then(|_| {
                fs::write(
                    &out,
                    substitute_placeholders(&content, &replacements_for(entry)),
                )
            })
            .map_err(|e| {
                InstallError::stage(
                    "File rewriting",
                    format!("unable to write '{}': {}", out.display(), e),
                )
            })?;

        let extras = EntryExtras {
            arch: entry.arch(),
            class: entry.class(),
            path: entry.path().map(str::to_string),
            target: entry.target().map(str::to_string),
        };
        let replacement =
            PackageEntry::new(out.to_string_lossy(), entry.mode(), file_type, extras)
                .map_err(|e| InstallError::stage("File rewriting", e.to_string()))?;
        rewritten.push(replacement);
    }

    package.retain_entries(|e| e.file_type() != file_type);
    let count = rewritten.len();
    for entry in rewritten {
        package.append(entry);
    }
    Ok(count)
}

fn opengl_libdir(opts: &InstallerOptions, arch: Option<FileArch>) -> PathBuf {
    match arch {
        Some(FileArch::Compat32) => opts.opengl_prefix.join(&opts.compat32_libdir),
        _ => opts.opengl_prefix.join(&opts.opengl_libdir),
    }
}

/// Point `libGL.la` files at the library directory they are installed into.
pub fn process_libgl_la_files(
    opts: &InstallerOptions,
    package: &mut Package,
    scratch: &Path,
) -> Result<usize, InstallError> {
    let count = rewrite_entries(package, FileType::LibGlLa, scratch, |entry| {
        vec![
            ("__GENERATED_BY__", "nvidia-installer".to_string()),
            (
                "__LIBGL_PATH__",
                opengl_libdir(opts, entry.arch()).display().to_string(),
            ),
        ]
    })?;
    if count > 0 {
        log_info!("[Files] Rewrote {} libGL.la files", count);
    }
    Ok(count)
}

/// Point `.desktop` files at the installed utilities.
pub fn process_dot_desktop_files(
    opts: &InstallerOptions,
    package: &mut Package,
    scratch: &Path,
) -> Result<usize, InstallError> {
    let bin = opts.utility_prefix.join("bin").display().to_string();
    let pixmaps = opts
        .utility_prefix
        .join("share/pixmaps")
        .display()
        .to_string();
    let count = rewrite_entries(package, FileType::DotDesktop, scratch, |_| {
        vec![
            ("__UTILS_PATH__", bin.clone()),
            ("__PIXMAP_PATH__", pixmaps.clone()),
        ]
    })?;
    if count > 0 {
        log_info!("[Files] Rewrote {} .desktop files", count);
    }
    Ok(count)
}

/// Ask whether to keep the 32-bit compatibility libraries.
pub fn should_install_compat32_files(package: &mut Package, c: &mut Collaborators<'_>) {
    if !package.has_compat32_entries() {
        return;
    }
    if !c
        .ui
        .yes_no(true, "Install NVIDIA's 32bit compatibility OpenGL libraries?")
    {
        let removed = package.retain_entries(|e| !e.is_compat32());
        log_info!("[Files] Removed {} 32-bit compatibility entries", removed);
    }
}

fn join_opt(base: PathBuf, sub: Option<&str>) -> PathBuf {
    match sub {
        Some(sub) if !sub.is_empty() => base.join(sub),
        _ => base,
    }
}

/// Directory an entry is installed into, or `None` for commands.
pub fn destination_dir(
    opts: &InstallerOptions,
    package: &Package,
    entry: &PackageEntry,
) -> Result<Option<PathBuf>, InstallError> {
    let path = entry.path();
    let dir = match entry.file_type() {
        FileType::KernelModuleCmd => return Ok(None),

        FileType::KernelModuleSrc => opts
            .kernel_module_src_prefix
            .join(format!("{}-{}", package.kernel_module_name, package.version)),

        FileType::KernelModule => opts.kernel_module_installation_path.clone().ok_or_else(|| {
            InstallError::stage(
                "Destination assignment",
                "no kernel module installation path was determined",
            )
        })?,

        FileType::OpenGlHeader | FileType::CudaIcd => join_opt(opts.opengl_prefix.clone(), path),

        FileType::OpenGlLib
        | FileType::CudaLib
        | FileType::LibGlLa
        | FileType::OpenGlSymlink
        | FileType::CudaSymlink
        | FileType::NvcuvidLib
        | FileType::NvcuvidSymlink => opengl_libdir(opts, entry.arch()),

        FileType::TlsLib | FileType::TlsSymlink | FileType::VdpauLib | FileType::VdpauSymlink => {
            join_opt(opengl_libdir(opts, entry.arch()), path)
        }

        FileType::XlibStaticLib | FileType::XlibSharedLib | FileType::XlibSymlink => {
            opts.x_prefix.join(&opts.x_libdir)
        }

        FileType::XModuleSharedLib
        | FileType::XModuleSymlink
        | FileType::XModuleNewSym
        | FileType::GlxModuleSharedLib
        | FileType::GlxModuleSymlink => join_opt(opts.x_module_dir(), path),

        FileType::UtilityLib | FileType::UtilityLibSymlink => {
            join_opt(opts.utility_prefix.join(&opts.utility_libdir), path)
        }

        FileType::Documentation | FileType::Manpage => {
            join_opt(opts.documentation_prefix.clone(), path)
        }

        FileType::ExplicitPath => PathBuf::from(path.unwrap_or_default()),

        FileType::InstallerBinary | FileType::UtilityBinary | FileType::UtilityBinSymlink => {
            opts.utility_prefix.join("bin")
        }

        FileType::DotDesktop => opts.utility_prefix.join("share/applications"),
    };

    if !dir.is_absolute() {
        return Err(InstallError::stage(
            "Destination assignment",
            format!(
                "destination directory '{}' for '{}' is not absolute",
                dir.display(),
                entry.file()
            ),
        ));
    }
    Ok(Some(dir))
}

/// Compute the destination of every entry except commands.
pub fn set_destinations(opts: &InstallerOptions, package: &mut Package) -> Result<(), InstallError> {
    let mut placed = Vec::with_capacity(package.len());
    for entry in package.entries() {
        let dst = destination_dir(opts, package, entry)?.map(|dir| dir.join(entry.name()));
        placed.push(dst);
    }

    for (entry, dst) in package.entries_mut().zip(placed) {
        if let Some(dst) = dst {
            entry.set_dst(dst);
        }
    }
    log::debug!("[Files] Destinations assigned for {} entries", package.len());
    Ok(())
}
