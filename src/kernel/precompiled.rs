//! Precompiled kernel interface bundles.
//!
//! A bundle is one JSON header line describing the kernel it was built for,
//! followed by the gzip-compressed interface object. The header's `crc` is the
//! CRC-32 of the uncompressed object.

use crate::error::PrecompiledError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Longest header line accepted; anything past it is not a bundle.
const MAX_HEADER_LEN: u64 = 64 * 1024;

/// Header describing a packed interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecompiledInfo {
    /// Driver package version the interface belongs to.
    pub version: String,
    /// `/proc/version` of the kernel the interface was built against.
    pub kernel_signature: String,
    pub description: String,
    pub crc: u32,
}

impl PrecompiledInfo {
    pub fn matches(&self, kernel_signature: &str, version: &str) -> bool {
        self.kernel_signature == kernel_signature && self.version == version
    }
}

/// File name used for a bundle built against `kernel_signature`.
pub fn bundle_file_name(kernel_signature: &str) -> String {
    format!("precompiled-{:08x}", crc32fast::hash(kernel_signature.as_bytes()))
}

/// Write a bundle for `payload` to `writer`, returning its header.
pub fn pack<W: Write>(
    writer: W,
    version: &str,
    kernel_signature: &str,
    description: &str,
    payload: &[u8],
) -> Result<PrecompiledInfo, PrecompiledError> {
    let info = PrecompiledInfo {
        version: version.to_string(),
        kernel_signature: kernel_signature.to_string(),
        description: description.to_string(),
        crc: crc32fast::hash(payload),
    };

    let mut writer = writer;
    serde_json::to_writer(&mut writer, &info)?;
    writer.write_all(b"\n")?;

    let mut encoder = GzEncoder::new(writer, Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()?.flush()?;

    Ok(info)
}

/// Write a bundle into `dir`, creating it if needed.
pub fn pack_to_dir(
    dir: &Path,
    version: &str,
    kernel_signature: &str,
    description: &str,
    payload: &[u8],
) -> Result<PathBuf, PrecompiledError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(bundle_file_name(kernel_signature));
    let file = File::create(&path)?;
    let info = pack(file, version, kernel_signature, description, payload)?;
    log::info!(
        "[Precompiled] Packed {} bytes for '{}' into {} (crc {:08x})",
        payload.len(),
        info.kernel_signature,
        path.display(),
        info.crc
    );
    Ok(path)
}

fn read_header<R: BufRead>(reader: &mut R) -> Result<PrecompiledInfo, PrecompiledError> {
    let mut line = String::new();
    reader.by_ref().take(MAX_HEADER_LEN).read_line(&mut line)?;
    if !line.ends_with('\n') {
        return Err(PrecompiledError::BadHeader(
            "missing header terminator".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Read only the header of the bundle at `path`.
pub fn read_info(path: &Path) -> Result<PrecompiledInfo, PrecompiledError> {
    let mut reader = BufReader::new(File::open(path)?);
    read_header(&mut reader)
}

/// Decode a bundle, verifying the payload checksum.
pub fn unpack<R: Read>(reader: R) -> Result<(PrecompiledInfo, Vec<u8>), PrecompiledError> {
    let mut reader = BufReader::new(reader);
    let info = read_header(&mut reader)?;

    let mut payload = Vec::new();
    GzDecoder::new(reader).read_to_end(&mut payload)?;

    let found = crc32fast::hash(&payload);
    if found != info.crc {
        return Err(PrecompiledError::CrcMismatch {
            expected: info.crc,
            found,
        });
    }
    Ok((info, payload))
}

/// Unpack the bundle at `bundle` and write its interface object to `output`.
pub fn unpack_to_file(bundle: &Path, output: &Path) -> Result<PrecompiledInfo, PrecompiledError> {
    let (info, payload) = unpack(File::open(bundle)?)?;
    fs::write(output, payload)?;
    Ok(info)
}

/// First bundle in `dirs` built for exactly `kernel_signature` and `version`.
///
/// Unreadable directories and files that are not bundles are skipped.
pub fn find_matching<'a, I>(
    dirs: I,
    kernel_signature: &str,
    version: &str,
) -> Option<(PathBuf, PrecompiledInfo)>
where
    I: IntoIterator<Item = &'a Path>,
{
    for dir in dirs {
        let Ok(read_dir) = fs::read_dir(dir) else {
            log::debug!("[Precompiled] Cannot scan {}", dir.display());
            continue;
        };

        let mut candidates: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        candidates.sort();

        for path in candidates {
            match read_info(&path) {
                Ok(info) if info.matches(kernel_signature, version) => {
                    log::info!("[Precompiled] Found matching interface {}", path.display());
                    return Some((path, info));
                }
                Ok(_) => {}
                Err(e) => log::debug!("[Precompiled] Skipping {}: {}", path.display(), e),
            }
        }
    }
    None
}
