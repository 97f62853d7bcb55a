//! The store of persisted target configurations.
//!
//! Every configuration lives in a single directory and is named after the
//! identity it was generated for: `<serial>.ccxml`, `<device>.ccxml` or
//! `<connection>.ccxml`.

mod ccxml;

pub use ccxml::{patch_serial, CcxmlError, PersistedConfig};

#[cfg(test)]
pub(crate) use ccxml::generated_ccxml;

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::catalog::DeviceCatalog;
use crate::identity::Resolution;
use crate::{paths, Error};

/// The file extension of target configuration files.
pub const EXTENSION: &str = "ccxml";

/// Something which can synthesize a target configuration file.
///
/// In production this is the debug engine itself, see [`crate::Session`].
#[async_trait]
pub trait ConfigGenerator: Send {
    /// Writes `<directory>/<name>.ccxml` for the given device family and connection.
    async fn generate(
        &mut self,
        directory: &Path,
        name: &str,
        device_family: &str,
        connection_type: &str,
    ) -> Result<(), Error>;
}

/// The directory of persisted target configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// A store in `dir`. The directory is created when the first file is generated.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store in the default location, `~/ti/CCSTargetConfigurations`.
    pub fn open_default() -> Result<Self, Error> {
        Ok(Self::new(paths::target_config_dir()?))
    }

    /// The directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path a configuration keyed by `key` has, whether or not it exists.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file = if key.ends_with(&format!(".{EXTENSION}")) {
            key.to_string()
        } else {
            format!("{key}.{EXTENSION}")
        };
        self.dir.join(file)
    }

    /// The configuration keyed by `key`, if it exists.
    pub fn find(&self, key: &str) -> Option<PathBuf> {
        let path = self.path_for(key);
        path.is_file().then_some(path)
    }

    /// All configurations in the store, sorted by name.
    pub fn list(&self) -> Result<Vec<PathBuf>, Error> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut configs = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == EXTENSION))
            .collect::<Vec<_>>();
        configs.sort();
        Ok(configs)
    }

    /// Deletes the configuration keyed by `key`.
    pub fn remove(&self, key: &str) -> Result<PathBuf, Error> {
        let path = self
            .find(key)
            .ok_or_else(|| Error::NotFound(format!("no target configuration named {key}")))?;
        fs::remove_file(&path)?;
        tracing::info!("Removed {}", path.display());
        Ok(path)
    }

    /// Reads the identity recorded in the configuration at `path`.
    pub fn load(&self, path: &Path) -> Result<PersistedConfig, Error> {
        let text = fs::read_to_string(path)?;
        Ok(PersistedConfig::parse(&text)?)
    }

    fn ensure_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Makes sure a configuration matching the resolved identity exists.
///
/// A new configuration is generated if `force_fresh` is set, if none was found
/// or readable during resolution, or if the loaded one contradicts an
/// explicitly requested field. Otherwise the existing path is returned and
/// nothing is written.
pub async fn ensure_consistent(
    resolution: &Resolution,
    force_fresh: bool,
    generator: &mut dyn ConfigGenerator,
    catalog: &dyn DeviceCatalog,
    store: &ConfigStore,
) -> Result<PathBuf, Error> {
    let identity = &resolution.identity;

    if !force_fresh && !resolution.is_stale() && resolution.loaded.is_some() {
        if let Some(path) = &identity.config_path {
            tracing::debug!("Using target configuration {}", path.display());
            return Ok(path.clone());
        }
    }

    let (device_family, connection_type) = identity.require_complete()?;
    let key = identity.serial_number.as_deref().unwrap_or(device_family);

    tracing::info!("Generating target configuration {key}.{EXTENSION}");
    store.ensure_dir()?;
    generator
        .generate(store.dir(), key, device_family, connection_type)
        .await?;

    let path = store.path_for(key);
    if !path.is_file() {
        return Err(Error::NotFound(format!(
            "the generated target configuration {} does not exist",
            path.display()
        )));
    }

    if let Some(serial) = &identity.serial_number {
        insert_serial(&path, serial, catalog)?;
    }

    Ok(path)
}

fn insert_serial(path: &Path, serial: &str, catalog: &dyn DeviceCatalog) -> Result<(), Error> {
    let text = fs::read_to_string(path)?;
    let config = PersistedConfig::parse(&text)?;

    let descriptor_name = config
        .connection_xml
        .ok_or(CcxmlError::MissingElement("connection instance"))?;
    let descriptor = catalog
        .connection_descriptor(&descriptor_name)
        .ok_or(CcxmlError::MissingDescriptor(descriptor_name))?;

    fs::write(path, patch_serial(&text, &descriptor, serial)?)?;
    tracing::debug!("Selected probe {serial} in {}", path.display());

    Ok(())
}
