//! Core data types for the driver installer.
//!
//! `Package` is one parsed installable unit; `PackageEntry` is one file or
//! symlink it places. The optional per-entry fields (arch, class, path, target)
//! are dictated by the entry's `FileType`, and the constructor refuses any
//! combination that disagrees with the type's field set.

use crate::error::EntryError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Which optional tokens a file type carries in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeFields {
    pub arch: bool,
    pub class: bool,
    pub path: bool,
    pub target: bool,
}

impl TypeFields {
    const NONE: TypeFields = TypeFields {
        arch: false,
        class: false,
        path: false,
        target: false,
    };

    const fn with_arch(mut self) -> Self {
        self.arch = true;
        self
    }

    const fn with_class(mut self) -> Self {
        self.class = true;
        self
    }

    const fn with_path(mut self) -> Self {
        self.path = true;
        self
    }

    const fn with_target(mut self) -> Self {
        self.target = true;
        self
    }
}

/// Role of a package entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    KernelModuleSrc,
    KernelModuleCmd,
    /// Built or linked module registered by kernel module acquisition; never
    /// appears in a manifest.
    KernelModule,
    OpenGlHeader,
    CudaIcd,
    OpenGlLib,
    CudaLib,
    LibGlLa,
    XlibStaticLib,
    XlibSharedLib,
    TlsLib,
    UtilityLib,
    Documentation,
    Manpage,
    ExplicitPath,
    OpenGlSymlink,
    CudaSymlink,
    XlibSymlink,
    TlsSymlink,
    UtilityLibSymlink,
    InstallerBinary,
    UtilityBinary,
    UtilityBinSymlink,
    DotDesktop,
    XModuleSharedLib,
    XModuleSymlink,
    GlxModuleSharedLib,
    GlxModuleSymlink,
    XModuleNewSym,
    VdpauLib,
    VdpauSymlink,
    NvcuvidLib,
    NvcuvidSymlink,
}

static KEYWORD_TABLE: Lazy<HashMap<&'static str, FileType>> = Lazy::new(|| {
    FileType::PARSEABLE
        .iter()
        .filter_map(|t| t.keyword().map(|k| (k, *t)))
        .collect()
});

impl FileType {
    /// Every variant that may appear in a manifest.
    pub const PARSEABLE: [FileType; 32] = [
        FileType::KernelModuleSrc,
        FileType::KernelModuleCmd,
        FileType::OpenGlHeader,
        FileType::CudaIcd,
        FileType::OpenGlLib,
        FileType::CudaLib,
        FileType::LibGlLa,
        FileType::XlibStaticLib,
        FileType::XlibSharedLib,
        FileType::TlsLib,
        FileType::UtilityLib,
        FileType::Documentation,
        FileType::Manpage,
        FileType::ExplicitPath,
        FileType::OpenGlSymlink,
        FileType::CudaSymlink,
        FileType::XlibSymlink,
        FileType::TlsSymlink,
        FileType::UtilityLibSymlink,
        FileType::InstallerBinary,
        FileType::UtilityBinary,
        FileType::UtilityBinSymlink,
        FileType::DotDesktop,
        FileType::XModuleSharedLib,
        FileType::XModuleSymlink,
        FileType::GlxModuleSharedLib,
        FileType::GlxModuleSymlink,
        FileType::XModuleNewSym,
        FileType::VdpauLib,
        FileType::VdpauSymlink,
        FileType::NvcuvidLib,
        FileType::NvcuvidSymlink,
    ];

    /// Manifest keyword, or `None` for derived-only types.
    pub fn keyword(self) -> Option<&'static str> {
        let kw = match self {
            FileType::KernelModuleSrc => "KERNEL_MODULE_SRC",
            FileType::KernelModuleCmd => "KERNEL_MODULE_CMD",
            FileType::KernelModule => return None,
            FileType::OpenGlHeader => "OPENGL_HEADER",
            FileType::CudaIcd => "CUDA_ICD",
            FileType::OpenGlLib => "OPENGL_LIB",
            FileType::CudaLib => "CUDA_LIB",
            FileType::LibGlLa => "LIBGL_LA",
            FileType::XlibStaticLib => "XLIB_STATIC_LIB",
            FileType::XlibSharedLib => "XLIB_SHARED_LIB",
            FileType::TlsLib => "TLS_LIB",
            FileType::UtilityLib => "UTILITY_LIB",
            FileType::Documentation => "DOCUMENTATION",
            FileType::Manpage => "MANPAGE",
            FileType::ExplicitPath => "EXPLICIT_PATH",
            FileType::OpenGlSymlink => "OPENGL_SYMLINK",
            FileType::CudaSymlink => "CUDA_SYMLINK",
            FileType::XlibSymlink => "XLIB_SYMLINK",
            FileType::TlsSymlink => "TLS_SYMLINK",
            FileType::UtilityLibSymlink => "UTILITY_LIB_SYMLINK",
            FileType::InstallerBinary => "INSTALLER_BINARY",
            FileType::UtilityBinary => "UTILITY_BINARY",
            FileType::UtilityBinSymlink => "UTILITY_BIN_SYMLINK",
            FileType::DotDesktop => "DOT_DESKTOP",
            FileType::XModuleSharedLib => "XMODULE_SHARED_LIB",
            FileType::XModuleSymlink => "XMODULE_SYMLINK",
            FileType::GlxModuleSharedLib => "GLX_MODULE_SHARED_LIB",
            FileType::GlxModuleSymlink => "GLX_MODULE_SYMLINK",
            FileType::XModuleNewSym => "XMODULE_NEWSYM",
            FileType::VdpauLib => "VDPAU_LIB",
            FileType::VdpauSymlink => "VDPAU_SYMLINK",
            FileType::NvcuvidLib => "NVCUVID_LIB",
            FileType::NvcuvidSymlink => "NVCUVID_LIB_SYMLINK",
        };
        Some(kw)
    }

    /// Look up a manifest keyword.
    pub fn from_keyword(keyword: &str) -> Option<FileType> {
        KEYWORD_TABLE.get(keyword).copied()
    }

    /// Human-readable name.
    pub fn as_str(self) -> &'static str {
        self.keyword().unwrap_or("KERNEL_MODULE")
    }

    /// Optional tokens this type reads from the manifest.
    pub const fn fields(self) -> TypeFields {
        let none = TypeFields::NONE;
        match self {
            FileType::KernelModuleSrc
            | FileType::KernelModuleCmd
            | FileType::KernelModule
            | FileType::XlibStaticLib
            | FileType::XlibSharedLib
            | FileType::InstallerBinary
            | FileType::UtilityBinary
            | FileType::DotDesktop => none,

            FileType::OpenGlHeader
            | FileType::CudaIcd
            | FileType::UtilityLib
            | FileType::Documentation
            | FileType::Manpage
            | FileType::ExplicitPath
            | FileType::XModuleSharedLib
            | FileType::GlxModuleSharedLib => none.with_path(),

            FileType::OpenGlLib | FileType::CudaLib | FileType::LibGlLa | FileType::NvcuvidLib => {
                none.with_arch()
            }

            FileType::TlsLib => none.with_arch().with_class().with_path(),

            FileType::OpenGlSymlink | FileType::CudaSymlink | FileType::NvcuvidSymlink => {
                none.with_arch().with_target()
            }

            FileType::XlibSymlink | FileType::UtilityBinSymlink => none.with_target(),

            FileType::TlsSymlink => none.with_arch().with_class().with_path().with_target(),

            FileType::UtilityLibSymlink
            | FileType::XModuleSymlink
            | FileType::GlxModuleSymlink
            | FileType::XModuleNewSym => none.with_path().with_target(),

            FileType::VdpauLib => none.with_arch().with_path(),
            FileType::VdpauSymlink => none.with_arch().with_path().with_target(),
        }
    }

    pub fn is_symlink(self) -> bool {
        matches!(
            self,
            FileType::OpenGlSymlink
                | FileType::CudaSymlink
                | FileType::XlibSymlink
                | FileType::TlsSymlink
                | FileType::UtilityLibSymlink
                | FileType::UtilityBinSymlink
                | FileType::XModuleSymlink
                | FileType::GlxModuleSymlink
                | FileType::XModuleNewSym
                | FileType::VdpauSymlink
                | FileType::NvcuvidSymlink
        )
    }

    pub fn is_command(self) -> bool {
        matches!(self, FileType::KernelModuleCmd)
    }

    /// Regular files copied into place.
    pub fn is_installable(self) -> bool {
        !self.is_symlink() && !self.is_command()
    }

    pub fn is_kernel_module_related(self) -> bool {
        matches!(
            self,
            FileType::KernelModuleSrc | FileType::KernelModuleCmd | FileType::KernelModule
        )
    }

    pub fn is_opengl(self) -> bool {
        matches!(
            self,
            FileType::OpenGlHeader
                | FileType::OpenGlLib
                | FileType::OpenGlSymlink
                | FileType::LibGlLa
                | FileType::TlsLib
                | FileType::TlsSymlink
                | FileType::GlxModuleSharedLib
                | FileType::GlxModuleSymlink
        )
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library architecture class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileArch {
    Compat32,
    Native,
}

impl FileArch {
    pub fn from_keyword(keyword: &str) -> Option<FileArch> {
        match keyword {
            "COMPAT32" => Some(FileArch::Compat32),
            "NATIVE" => Some(FileArch::Native),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileArch::Compat32 => "COMPAT32",
            FileArch::Native => "NATIVE",
        }
    }
}

/// Thread-local-storage flavour of a TLS library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsClass {
    Classic,
    New,
}

impl TlsClass {
    pub fn from_keyword(keyword: &str) -> Option<TlsClass> {
        match keyword {
            "CLASSIC" => Some(TlsClass::Classic),
            "NEW" => Some(TlsClass::New),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TlsClass::Classic => "CLASSIC",
            TlsClass::New => "NEW",
        }
    }
}

/// Filesystem identity of an entry's source file.
///
/// `Unknown` is a distinct state rather than a zero device/inode pair, so a
/// file that could not be stat'ed can never be mistaken for another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileIdentity {
    Known { device: u64, inode: u64 },
    Unknown,
}

impl FileIdentity {
    /// Stat `path`. Failure yields `Unknown`.
    pub fn probe(path: &Path) -> FileIdentity {
        match std::fs::metadata(path) {
            Ok(meta) => FileIdentity::Known {
                device: meta.dev(),
                inode: meta.ino(),
            },
            Err(_) => FileIdentity::Unknown,
        }
    }

    /// True only when both identities are known and equal.
    pub fn same_file(&self, other: &FileIdentity) -> bool {
        match (self, other) {
            (
                FileIdentity::Known { device: d1, inode: i1 },
                FileIdentity::Known { device: d2, inode: i2 },
            ) => d1 == d2 && i1 == i2,
            _ => false,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, FileIdentity::Known { .. })
    }
}

/// Optional fields supplied alongside an entry's type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryExtras {
    pub arch: Option<FileArch>,
    pub class: Option<TlsClass>,
    pub path: Option<String>,
    pub target: Option<String>,
}

/// One file or symlink the package will install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    file: String,
    path: Option<String>,
    target: Option<String>,
    dst: Option<PathBuf>,
    file_type: FileType,
    arch: Option<FileArch>,
    class: Option<TlsClass>,
    mode: u32,
    identity: FileIdentity,
}

impl PackageEntry {
    /// Build an entry, checking the optional fields against the type's field set.
    ///
    /// Identity starts `Unknown`; `Package::append` snapshots it.
    pub fn new(
        file: impl Into<String>,
        mode: u32,
        file_type: FileType,
        extras: EntryExtras,
    ) -> Result<Self, EntryError> {
        let file = file.into();
        let fields = file_type.fields();

        let mut mismatches = Vec::new();
        if fields.arch != extras.arch.is_some() {
            mismatches.push("arch");
        }
        if fields.class != extras.class.is_some() {
            mismatches.push("class");
        }
        if fields.path != extras.path.is_some() {
            mismatches.push("path");
        }
        if fields.target != extras.target.is_some() {
            mismatches.push("target");
        }
        if !mismatches.is_empty() {
            return Err(EntryError::FieldMismatch {
                file,
                file_type: file_type.as_str(),
                detail: mismatches.join(", "),
            });
        }

        Ok(PackageEntry {
            file,
            path: extras.path,
            target: extras.target,
            dst: None,
            file_type,
            arch: extras.arch,
            class: extras.class,
            mode,
            identity: FileIdentity::Unknown,
        })
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Basename of `file`: everything after the last '/'.
    pub fn name(&self) -> &str {
        match self.file.rsplit_once('/') {
            Some((_, base)) => base,
            None => &self.file,
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn dst(&self) -> Option<&Path> {
        self.dst.as_deref()
    }

    pub fn set_dst(&mut self, dst: PathBuf) {
        self.dst = Some(dst);
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn arch(&self) -> Option<FileArch> {
        self.arch
    }

    pub fn class(&self) -> Option<TlsClass> {
        self.class
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn is_compat32(&self) -> bool {
        self.arch == Some(FileArch::Compat32)
    }
}

/// One parsed installable unit.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub description: String,
    pub version: String,
    pub kernel_module_filename: String,
    pub kernel_interface_filename: String,
    pub kernel_module_name: String,
    pub bad_modules: Vec<String>,
    pub bad_module_filenames: Vec<String>,
    pub kernel_module_build_directory: String,
    pub precompiled_kernel_interface_directory: String,
    root: PathBuf,
    entries: Vec<PackageEntry>,
}

impl Package {
    /// Empty package whose relative entry files resolve against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Package {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a package-relative path lives on disk.
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Kernel module sources, resolved against the package root.
    pub fn build_directory(&self) -> PathBuf {
        self.resolve(&self.kernel_module_build_directory)
    }

    /// Directory of precompiled interface bundles, resolved against the package root.
    pub fn precompiled_directory(&self) -> PathBuf {
        self.resolve(&self.precompiled_kernel_interface_directory)
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    /// Mutable access for in-place updates such as destination assignment.
    pub fn entries_mut(&mut self) -> std::slice::IterMut<'_, PackageEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one entry at the end, snapshotting its filesystem identity.
    pub fn append(&mut self, mut entry: PackageEntry) {
        entry.identity = FileIdentity::probe(&self.resolve(&entry.file));
        self.entries.push(entry);
    }

    /// Keep only the entries matching `keep`; returns how many were removed.
    pub fn retain_entries<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&PackageEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(keep);
        before - self.entries.len()
    }

    /// Drop everything that is not part of the kernel module.
    pub fn strip_non_kernel_module_entries(&mut self) -> usize {
        self.retain_entries(|e| e.file_type.is_kernel_module_related())
    }

    /// Drop every OpenGL-related entry.
    pub fn strip_opengl_entries(&mut self) -> usize {
        self.retain_entries(|e| !e.file_type.is_opengl())
    }

    pub fn entries_of_type(&self, file_type: FileType) -> impl Iterator<Item = &PackageEntry> {
        self.entries.iter().filter(move |e| e.file_type == file_type)
    }

    pub fn has_entries_of_type(&self, file_type: FileType) -> bool {
        self.entries_of_type(file_type).next().is_some()
    }

    pub fn has_compat32_entries(&self) -> bool {
        self.entries.iter().any(|e| e.is_compat32())
    }

    /// Consume the package.
    ///
    /// Ownership frees every field; this exists so each pipeline exit path
    /// ends the package's life at a visible point, and works on packages where
    /// only some header fields were ever set.
    pub fn release(self) {
        log::debug!(
            "[Package] Releasing package '{}' ({} entries, {} bad modules)",
            self.description,
            self.entries.len(),
            self.bad_modules.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file: &str, t: FileType, extras: EntryExtras) -> PackageEntry {
        PackageEntry::new(file, 0o644, t, extras).unwrap()
    }

    #[test]
    fn test_keyword_table_round_trips_every_parseable_type() {
        for t in FileType::PARSEABLE {
            let kw = t.keyword().unwrap();
            assert_eq!(FileType::from_keyword(kw), Some(t));
        }
        assert_eq!(FileType::from_keyword("KERNEL_MODULE"), None);
        assert_eq!(FileType::from_keyword("opengl_lib"), None);
    }

    #[test]
    fn test_name_is_basename_of_file() {
        let e = entry("usr/lib/libGL.so.1", FileType::XlibSharedLib, EntryExtras::default());
        assert_eq!(e.name(), "libGL.so.1");

        let e = entry("README", FileType::XlibSharedLib, EntryExtras::default());
        assert_eq!(e.name(), "README");

        let e = entry("dir/", FileType::XlibSharedLib, EntryExtras::default());
        assert_eq!(e.name(), "");
    }

    #[test]
    fn test_constructor_rejects_missing_path() {
        let err = PackageEntry::new("doc", 0o644, FileType::Documentation, EntryExtras::default())
            .unwrap_err();
        match err {
            EntryError::FieldMismatch { detail, .. } => assert_eq!(detail, "path"),
        }
    }

    #[test]
    fn test_constructor_rejects_unexpected_target() {
        let extras = EntryExtras {
            target: Some("libfoo.so".into()),
            ..Default::default()
        };
        assert!(PackageEntry::new("libfoo", 0o755, FileType::XlibSharedLib, extras).is_err());
    }

    #[test]
    fn test_tls_symlink_needs_all_fields() {
        let extras = EntryExtras {
            arch: Some(FileArch::Native),
            class: Some(TlsClass::New),
            path: Some("tls".into()),
            target: Some("libnvidia-tls.so.1".into()),
        };
        let e = entry("libnvidia-tls.so", FileType::TlsSymlink, extras);
        assert_eq!(e.class(), Some(TlsClass::New));
        assert_eq!(e.path(), Some("tls"));
    }

    #[test]
    fn test_symlink_and_command_classes() {
        assert!(FileType::XModuleNewSym.is_symlink());
        assert!(!FileType::XModuleNewSym.is_installable());
        assert!(FileType::KernelModuleCmd.is_command());
        assert!(FileType::KernelModule.is_installable());
        assert!(FileType::LibGlLa.is_opengl());
        assert!(!FileType::CudaLib.is_opengl());
    }

    #[test]
    fn test_append_is_strictly_additive() {
        let mut p = Package::new("/nonexistent-root");
        p.append(entry("a", FileType::XlibSharedLib, EntryExtras::default()));
        p.append(entry("b", FileType::KernelModuleSrc, EntryExtras::default()));
        let before: Vec<PackageEntry> = p.entries().to_vec();

        p.append(entry("c", FileType::InstallerBinary, EntryExtras::default()));

        assert_eq!(p.len(), before.len() + 1);
        assert_eq!(&p.entries()[..before.len()], &before[..]);
        assert_eq!(p.entries()[2].file(), "c");
        assert_eq!(p.entries()[2].identity(), FileIdentity::Unknown);
    }

    #[test]
    fn test_append_snapshots_existing_file_identity() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libfoo.so"), b"x").unwrap();
        let mut p = Package::new(dir.path());
        p.append(entry("libfoo.so", FileType::XlibSharedLib, EntryExtras::default()));
        assert!(p.entries()[0].identity().is_known());
    }

    #[test]
    fn test_unknown_identity_never_matches() {
        let known = FileIdentity::Known { device: 0, inode: 0 };
        assert!(!FileIdentity::Unknown.same_file(&FileIdentity::Unknown));
        assert!(!known.same_file(&FileIdentity::Unknown));
        assert!(known.same_file(&FileIdentity::Known { device: 0, inode: 0 }));
    }

    #[test]
    fn test_strip_helpers() {
        let mut p = Package::new(".");
        p.append(entry("nv.c", FileType::KernelModuleSrc, EntryExtras::default()));
        p.append(entry(
            "libGL.so",
            FileType::OpenGlLib,
            EntryExtras {
                arch: Some(FileArch::Native),
                ..Default::default()
            },
        ));
        p.append(entry("nvidia-settings", FileType::UtilityBinary, EntryExtras::default()));

        let mut gl = p.clone();
        assert_eq!(gl.strip_opengl_entries(), 1);
        assert_eq!(gl.len(), 2);

        assert_eq!(p.strip_non_kernel_module_entries(), 2);
        assert_eq!(p.entries()[0].file(), "nv.c");
    }

    #[test]
    fn test_release_partial_package() {
        let mut p = Package::default();
        p.description = "Driver".into();
        p.version = "1.0".into();
        p.kernel_interface_filename = "nv-linux.o".into();
        p.release();
    }
}
