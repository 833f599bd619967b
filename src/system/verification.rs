//! Post-install file verification.
//!
//! Confirms every installed file exists with the permission bits the manifest
//! asked for and every symlink points where it should. Problems are reported,
//! never fatal.

use crate::models::{Package, PackageEntry};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Outcome of checking one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCheck {
    Ok,
    Missing,
    WrongMode { expected: u32, found: u32 },
    NotASymlink,
    WrongTarget { expected: String, found: String },
}

impl FileCheck {
    pub fn is_ok(&self) -> bool {
        matches!(self, FileCheck::Ok)
    }
}

/// Check one entry against its destination.
pub fn check_entry(entry: &PackageEntry) -> Option<FileCheck> {
    let dst = entry.dst()?;
    let ft = entry.file_type();

    if ft.is_symlink() {
        let expected = entry.target()?;
        return Some(check_symlink(dst, expected));
    }
    if ft.is_installable() {
        return Some(check_file(dst, entry.mode()));
    }
    None
}

fn check_symlink(link: &Path, expected: &str) -> FileCheck {
    match fs::symlink_metadata(link) {
        Err(_) => FileCheck::Missing,
        Ok(meta) if !meta.file_type().is_symlink() => FileCheck::NotASymlink,
        Ok(_) => match fs::read_link(link) {
            Ok(found) if found == Path::new(expected) => FileCheck::Ok,
            Ok(found) => FileCheck::WrongTarget {
                expected: expected.to_string(),
                found: found.display().to_string(),
            },
            Err(_) => FileCheck::Missing,
        },
    }
}

fn check_file(path: &Path, expected: u32) -> FileCheck {
    match fs::metadata(path) {
        Err(_) => FileCheck::Missing,
        Ok(meta) => {
            let found = meta.permissions().mode() & 0o7777;
            if found == expected {
                FileCheck::Ok
            } else {
                FileCheck::WrongMode { expected, found }
            }
        }
    }
}

/// Human-readable problems with the installed package; empty when clean.
pub fn check_installed_files(package: &Package) -> Vec<String> {
    let mut problems = Vec::new();

    for entry in package.entries() {
        let Some(result) = check_entry(entry) else { continue };
        let Some(dst) = entry.dst() else { continue };
        let display = dst.display();
        match result {
            FileCheck::Ok => {}
            FileCheck::Missing => problems.push(format!("The file '{}' is missing.", display)),
            FileCheck::WrongMode { expected, found } => problems.push(format!(
                "The file '{}' has permissions {:04o}; expected {:04o}.",
                display, found, expected
            )),
            FileCheck::NotASymlink => {
                problems.push(format!("The file '{}' is not a symbolic link.", display))
            }
            FileCheck::WrongTarget { expected, found } => problems.push(format!(
                "The symbolic link '{}' points to '{}'; expected '{}'.",
                display, found, expected
            )),
        }
    }

    if problems.is_empty() {
        log::info!("[Verify] All {} installed files check out", package.len());
    } else {
        log::warn!("[Verify] {} installed-file problems", problems.len());
    }
    problems
}
