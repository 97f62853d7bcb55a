//! Well-known locations on the host.

use std::path::{Path, PathBuf};

use crate::Error;

/// Environment variable which redirects the installation search root.
pub const CCS_PREFIX_ENV: &str = "CCS_PREFIX";

/// Environment variable which redirects the engine support scripts.
pub const SCRIPTS_ENV: &str = "TIFLASH_SCRIPTS";

const TI_DIRECTORY: &str = "ti";
const TARGET_CONFIG_DIRECTORY: &str = "CCSTargetConfigurations";
const BASE_DIRECTORY: &str = ".tiflash";
const SCRIPTS_DIRECTORY: &str = "scripts";

fn home_dir() -> Result<PathBuf, Error> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| Error::NotFound("the home directory of the current user".to_string()))
}

/// The directory below which installations are searched.
///
/// `$CCS_PREFIX` wins over the platform default.
pub fn installation_root() -> Result<PathBuf, Error> {
    if let Some(prefix) = std::env::var_os(CCS_PREFIX_ENV) {
        return Ok(PathBuf::from(prefix));
    }

    if cfg!(target_os = "macos") {
        return Ok(Path::new("/Applications").join(TI_DIRECTORY));
    }

    if cfg!(windows) {
        if let Some(drive) = std::env::var_os("HOMEDRIVE") {
            let mut root = PathBuf::from(drive);
            root.push(std::path::MAIN_SEPARATOR_STR);
            return Ok(root.join(TI_DIRECTORY));
        }
    }

    Ok(home_dir()?.join(TI_DIRECTORY))
}

/// The directory holding persisted target configurations.
pub fn target_config_dir() -> Result<PathBuf, Error> {
    Ok(home_dir()?.join(TI_DIRECTORY).join(TARGET_CONFIG_DIRECTORY))
}

/// The per-user base directory of this tool.
pub fn base_dir() -> Result<PathBuf, Error> {
    Ok(home_dir()?.join(BASE_DIRECTORY))
}

/// The directory holding the engine support scripts.
///
/// `$TIFLASH_SCRIPTS` wins over `~/.tiflash/scripts`.
pub fn scripts_dir() -> Result<PathBuf, Error> {
    if let Some(dir) = std::env::var_os(SCRIPTS_ENV) {
        return Ok(PathBuf::from(dir));
    }

    Ok(base_dir()?.join(SCRIPTS_DIRECTORY))
}

/// Expands a leading `~` to the home directory of the current user.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match home_dir() {
        Ok(home) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
