//! Options file loader and serialization.

use crate::config::InstallerOptions;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the per-user options path: ~/.config/driver-installer/installer.toml
pub fn get_default_options_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;

    Ok(home.join(".config/driver-installer").join("installer.toml"))
}

/// Load options from a TOML file.
pub fn load_options_from_file(path: &Path) -> Result<InstallerOptions, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!(
                "Configuration file not found at: {}",
                path.display()
            ))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let options: InstallerOptions = toml::from_str(&content)?;
    log::debug!("[Config] Loaded options from {}", path.display());

    Ok(options)
}

/// Load `path` if given, else the default file if it exists, else defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<InstallerOptions, ConfigError> {
    if let Some(path) = path {
        return load_options_from_file(path);
    }

    match get_default_options_path() {
        Ok(default_path) if default_path.exists() => load_options_from_file(&default_path),
        _ => Ok(InstallerOptions::default()),
    }
}

/// Save options to a TOML file.
pub fn save_options_to_file(options: &InstallerOptions, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(options)
        .map_err(|e| ConfigError::ValidationFailed(format!("Cannot serialize options: {}", e)))?;
    fs::write(path, content)?;

    Ok(())
}

/// Validate config path (.toml extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "toml" => {}
        Some(ext) => {
            return Err(ConfigError::ValidationFailed(format!(
                "Configuration file must have .toml extension, got .{}",
                ext.to_string_lossy()
            )))
        }
        None => {
            return Err(ConfigError::ValidationFailed(
                "Configuration file must have .toml extension".to_string(),
            ))
        }
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
