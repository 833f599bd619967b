//! Manifest parser for driver packages.
//!
//! A manifest is a line-oriented text file at the package root. The first
//! eight lines form a fixed header:
//! - description
//! - version
//! - kernel interface filename
//! - kernel module name
//! - modules to unload before install (whitespace separated, may be empty)
//! - module files to remove before install (whitespace separated, may be empty)
//! - kernel module build directory
//! - precompiled kernel interface directory
//!
//! Every following line is one file entry, until a blank line or end of input:
//! `file mode TYPE [ARCH] [CLASS] [path] [target]`, where the bracketed tokens
//! are present exactly when the type declares them.

use crate::error::ManifestError;
use crate::models::{EntryExtras, FileArch, FileType, Package, PackageEntry, TlsClass};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Name of the manifest file inside a package root.
pub const MANIFEST_FILE_NAME: &str = ".manifest";

/// Largest accepted permission value.
const MAX_MODE: u32 = 0o7777;

/// Provider of raw manifest bytes.
pub trait ManifestSource {
    fn read_bytes(&self) -> Result<Cow<'_, [u8]>, ManifestError>;
}

/// Manifest stored on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }

    /// The manifest inside `root`.
    pub fn in_package(root: &Path) -> Self {
        FileSource::new(root.join(MANIFEST_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestSource for FileSource {
    fn read_bytes(&self) -> Result<Cow<'_, [u8]>, ManifestError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Cow::Owned(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ManifestError::NotFound(self.path.display().to_string()))
            }
            Err(e) => Err(ManifestError::Io(e)),
        }
    }
}

impl ManifestSource for [u8] {
    fn read_bytes(&self) -> Result<Cow<'_, [u8]>, ManifestError> {
        Ok(Cow::Borrowed(self))
    }
}

impl ManifestSource for Vec<u8> {
    fn read_bytes(&self) -> Result<Cow<'_, [u8]>, ManifestError> {
        Ok(Cow::Borrowed(self.as_slice()))
    }
}

impl ManifestSource for str {
    fn read_bytes(&self) -> Result<Cow<'_, [u8]>, ManifestError> {
        Ok(Cow::Borrowed(self.as_bytes()))
    }
}

/// Lazy line iterator over an immutable byte buffer.
///
/// Splits on `\n`, drops one trailing `\r` per line, and yields nothing after
/// a final newline. Cloning or calling `restart` rewinds without copying.
#[derive(Debug, Clone)]
pub struct ManifestLines<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ManifestLines<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ManifestLines { buf, pos: 0 }
    }

    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl<'a> Iterator for ManifestLines<'a> {
    type Item = Cow<'a, str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }

        let rest = &self.buf[self.pos..];
        let (mut line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;

        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        Some(String::from_utf8_lossy(line))
    }
}

/// Parse a manifest into a `Package` rooted at `root`.
///
/// # Arguments
///
/// * `source` - Where the manifest bytes come from
/// * `root` - Package root; entry identities are probed at `root.join(file)`
///
/// # Returns
///
/// The parsed package, or `ManifestError::Malformed` carrying the 1-based
/// line number of the first problem.
pub fn parse_manifest<S>(source: &S, root: &Path) -> Result<Package, ManifestError>
where
    S: ManifestSource + ?Sized,
{
    let bytes = source.read_bytes()?;
    let mut lines = ManifestLines::new(&bytes);
    let mut package = Package::new(root);
    let mut line_no = 0usize;

    let mut header = |lines: &mut ManifestLines<'_>| -> Result<String, ManifestError> {
        line_no += 1;
        lines
            .next()
            .map(Cow::into_owned)
            .ok_or(ManifestError::Malformed { line: line_no })
    };

    package.description = header(&mut lines)?;
    package.version = header(&mut lines)?;
    package.kernel_interface_filename = header(&mut lines)?;
    package.kernel_module_name = header(&mut lines)?;
    package.bad_modules = split_words(&header(&mut lines)?);
    package.bad_module_filenames = split_words(&header(&mut lines)?);
    package.kernel_module_build_directory = remove_trailing_slashes(&header(&mut lines)?);
    package.precompiled_kernel_interface_directory =
        remove_trailing_slashes(&header(&mut lines)?);

    for (offset, line) in lines.enumerate() {
        if line.is_empty() {
            break;
        }
        let entry = parse_entry(&line, line_no + 1 + offset)?;
        package.append(entry);
    }

    log::debug!(
        "[Manifest] Parsed '{}' version {} with {} entries",
        package.description,
        package.version,
        package.len()
    );

    Ok(package)
}

/// Parse one entry record.
fn parse_entry(line: &str, line_no: usize) -> Result<PackageEntry, ManifestError> {
    let malformed = || ManifestError::Malformed { line: line_no };
    let mut tokens = line.split_whitespace();

    let file = tokens.next().ok_or_else(malformed)?;
    let mode = tokens.next().and_then(parse_mode).ok_or_else(malformed)?;
    let file_type = tokens
        .next()
        .and_then(FileType::from_keyword)
        .ok_or_else(malformed)?;

    let fields = file_type.fields();
    let mut extras = EntryExtras::default();

    if fields.arch {
        extras.arch = Some(
            tokens
                .next()
                .and_then(FileArch::from_keyword)
                .ok_or_else(malformed)?,
        );
    }
    if fields.class {
        extras.class = Some(
            tokens
                .next()
                .and_then(TlsClass::from_keyword)
                .ok_or_else(malformed)?,
        );
    }
    if fields.path {
        extras.path = Some(tokens.next().ok_or_else(malformed)?.to_string());
    }
    if fields.target {
        extras.target = Some(tokens.next().ok_or_else(malformed)?.to_string());
    }

    PackageEntry::new(file, mode, file_type, extras).map_err(|e| {
        log::warn!("[Manifest] line {}: {}", line_no, e);
        malformed()
    })
}

/// Octal permission token, at most `0o7777`.
pub fn parse_mode(token: &str) -> Option<u32> {
    if token.is_empty() || !token.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return None;
    }
    u32::from_str_radix(token, 8)
        .ok()
        .filter(|mode| *mode <= MAX_MODE)
}

fn split_words(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Strip trailing '/' characters, keeping a lone "/" intact.
pub fn remove_trailing_slashes(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileIdentity;

    const HEADER: &str = "NVIDIA Accelerated Graphics Driver\n\
                          1.0-9631\n\
                          nv-linux.o\n\
                          nvidia\n\
                          nv nvidia_drv\n\
                          nv.o\n\
                          usr/src/nv/\n\
                          usr/src/nv/precompiled//\n";

    fn parse(text: &str) -> Result<Package, ManifestError> {
        parse_manifest(text, Path::new("/nonexistent-package-root"))
    }

    // ======= Test 1: Header fields and trailing slash normalization
    #[test]
    fn test_parse_header_only() {
        let pkg = parse(HEADER).unwrap();
        assert_eq!(pkg.description, "NVIDIA Accelerated Graphics Driver");
        assert_eq!(pkg.version, "1.0-9631");
        assert_eq!(pkg.kernel_interface_filename, "nv-linux.o");
        assert_eq!(pkg.kernel_module_name, "nvidia");
        assert_eq!(pkg.bad_modules, vec!["nv", "nvidia_drv"]);
        assert_eq!(pkg.bad_module_filenames, vec!["nv.o"]);
        assert_eq!(pkg.kernel_module_build_directory, "usr/src/nv");
        assert_eq!(pkg.precompiled_kernel_interface_directory, "usr/src/nv/precompiled");
        assert!(pkg.is_empty());
    }

    // ======= Test 2: Truncated header reports the missing line
    #[test]
    fn test_truncated_header_reports_line_8() {
        let text: String = HEADER.lines().take(7).map(|l| format!("{}\n", l)).collect();
        let err = parse(&text).unwrap_err();
        assert_eq!(err.line(), Some(8));
    }

    // ======= Test 3: Empty input fails on line 1
    #[test]
    fn test_empty_manifest() {
        assert_eq!(parse("").unwrap_err().line(), Some(1));
    }

    // ======= Test 4: Entries with per-type optional tokens
    #[test]
    fn test_parse_entries() {
        let text = format!(
            "{}libGL.so.1.0 0755 OPENGL_LIB NATIVE\n\
             libGL.so 0777 OPENGL_SYMLINK COMPAT32 libGL.so.1\n\
             libnvidia-tls.so.1 0644 TLS_LIB NATIVE NEW tls\n\
             nvidia_drv.o 0644 XMODULE_SHARED_LIB drivers/\n",
            HEADER
        );
        let pkg = parse(&text).unwrap();
        assert_eq!(pkg.len(), 4);

        let gl = &pkg.entries()[0];
        assert_eq!(gl.file_type(), FileType::OpenGlLib);
        assert_eq!(gl.mode(), 0o755);
        assert_eq!(gl.arch(), Some(FileArch::Native));
        assert_eq!(gl.path(), None);

        let link = &pkg.entries()[1];
        assert!(link.is_compat32());
        assert_eq!(link.target(), Some("libGL.so.1"));

        let tls = &pkg.entries()[2];
        assert_eq!(tls.class(), Some(TlsClass::New));
        assert_eq!(tls.path(), Some("tls"));

        assert_eq!(pkg.entries()[3].path(), Some("drivers/"));
    }

    // ======= Test 5: Unknown keyword reports the record's own line
    #[test]
    fn test_unknown_keyword_line_number() {
        let text = format!(
            "{}a 0644 XLIB_SHARED_LIB\nb 0644 XLIB_SHARED_LIB\nc 0644 BOGUS_TYPE\n",
            HEADER
        );
        assert_eq!(parse(&text).unwrap_err().line(), Some(11));
    }

    // ======= Test 6: Missing required tokens
    #[test]
    fn test_missing_tokens_are_malformed() {
        for record in [
            "only-a-file",
            "f 0644",
            "f 0644 OPENGL_LIB",
            "f 0644 OPENGL_LIB WIDE",
            "f 0644 TLS_LIB NATIVE",
            "f 0644 TLS_LIB NATIVE OLD tls",
            "f 0644 XLIB_SYMLINK",
        ] {
            let text = format!("{}{}\n", HEADER, record);
            assert_eq!(parse(&text).unwrap_err().line(), Some(9), "record: {}", record);
        }
    }

    // ======= Test 7: Mode tokens must be octal and within range
    #[test]
    fn test_mode_parsing() {
        assert_eq!(parse_mode("0644"), Some(0o644));
        assert_eq!(parse_mode("7777"), Some(0o7777));
        assert_eq!(parse_mode("10000"), None);
        assert_eq!(parse_mode("0648"), None);
        assert_eq!(parse_mode("-644"), None);
        assert_eq!(parse_mode(""), None);

        let text = format!("{}f 0x644 XLIB_SHARED_LIB\n", HEADER);
        assert_eq!(parse(&text).unwrap_err().line(), Some(9));
    }

    // ======= Test 8: Blank line ends the entry section
    #[test]
    fn test_blank_line_terminates_entries() {
        let text = format!(
            "{}a 0644 XLIB_SHARED_LIB\n\nthis is not parsed at all\n",
            HEADER
        );
        let pkg = parse(&text).unwrap();
        assert_eq!(pkg.len(), 1);
    }

    // ======= Test 9: CRLF line endings and missing final newline
    #[test]
    fn test_crlf_and_no_final_newline() {
        let text = HEADER.replace('\n', "\r\n") + "a 0644 XLIB_SHARED_LIB";
        let pkg = parse(&text).unwrap();
        assert_eq!(pkg.version, "1.0-9631");
        assert_eq!(pkg.entries()[0].file(), "a");
    }

    // ======= Test 10: Blank header lines become empty values
    #[test]
    fn test_empty_module_lists() {
        let text = "desc\n1.0\nnv.o\nnvidia\n\n\nbuild\n/\n";
        let pkg = parse(text).unwrap();
        assert!(pkg.bad_modules.is_empty());
        assert!(pkg.bad_module_filenames.is_empty());
        assert_eq!(pkg.precompiled_kernel_interface_directory, "/");
    }

    // ======= Test 11: Line iterator never yields a phantom trailing line
    #[test]
    fn test_line_iterator() {
        let mut lines = ManifestLines::new(b"a\r\nb\n");
        assert_eq!(lines.clone().count(), 2);
        assert_eq!(lines.next().as_deref(), Some("a"));
        lines.restart();
        let all: Vec<String> = lines.map(Cow::into_owned).collect();
        assert_eq!(all, vec!["a", "b"]);

        assert_eq!(ManifestLines::new(b"").count(), 0);
        assert_eq!(ManifestLines::new(b"\n").count(), 1);
    }

    // ======= Test 12: Identity probed relative to the package root
    #[test]
    fn test_identity_probe_uses_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.so"), b"elf").unwrap();
        let text = format!(
            "{}present.so 0644 XLIB_SHARED_LIB\nmissing.so 0644 XLIB_SHARED_LIB\n",
            HEADER
        );
        let pkg = parse_manifest(text.as_str(), dir.path()).unwrap();
        assert!(pkg.entries()[0].identity().is_known());
        assert_eq!(pkg.entries()[1].identity(), FileIdentity::Unknown);
    }

    // ======= Test 13: Missing manifest file
    #[test]
    fn test_file_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::in_package(dir.path());
        match parse_manifest(&source, dir.path()) {
            Err(ManifestError::NotFound(path)) => assert!(path.ends_with(".manifest")),
            other => panic!("unexpected result: {:?}", other.map(|p| p.len())),
        }
    }

    // ======= Test 14: Trailing slash helper
    #[test]
    fn test_remove_trailing_slashes() {
        assert_eq!(remove_trailing_slashes("a/b///"), "a/b");
        assert_eq!(remove_trailing_slashes("///"), "/");
        assert_eq!(remove_trailing_slashes(""), "");
        assert_eq!(remove_trailing_slashes("a"), "a");
    }
}
