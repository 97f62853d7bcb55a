//! Resolving a complete target identity from partial information.
//!
//! Each field is looked up in a fixed order of sources, and the first source
//! which knows the field wins. An explicitly requested value always wins over a
//! persisted one, and a persisted value always wins over one derived from the
//! device catalog.

use std::fmt;
use std::path::PathBuf;

use crate::catalog::DeviceCatalog;
use crate::config::{ConfigStore, PersistedConfig};
use crate::{paths, Error};

/// What the caller knows about the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityRequest {
    /// A target configuration file to use.
    pub config: Option<PathBuf>,
    /// The serial number of the debug probe.
    pub serial_number: Option<String>,
    /// The device family, e.g. `CC1352R1F3`.
    pub device_family: Option<String>,
    /// The connection type, e.g. `Texas Instruments XDS110 USB Debug Probe`.
    pub connection_type: Option<String>,
}

/// A resolved target identity. Fields which could not be determined are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetIdentity {
    pub config_path: Option<PathBuf>,
    pub serial_number: Option<String>,
    pub device_family: Option<String>,
    pub connection_type: Option<String>,
}

impl TargetIdentity {
    /// Returns `true` if both device family and connection type are known.
    pub fn is_complete(&self) -> bool {
        self.device_family.is_some() && self.connection_type.is_some()
    }

    /// The device family and connection type, which every session needs.
    pub fn require_complete(&self) -> Result<(&str, &str), Error> {
        let device_family = self
            .device_family
            .as_deref()
            .ok_or(Error::IdentityIncomplete("device family"))?;
        let connection_type = self
            .connection_type
            .as_deref()
            .ok_or(Error::IdentityIncomplete("connection type"))?;
        Ok((device_family, connection_type))
    }
}

/// Where a resolved field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Requested by the caller.
    Explicit,
    /// Read from a persisted target configuration.
    ConfigFile,
    /// Derived from the device catalog.
    Catalog,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Explicit => "explicit",
            Source::ConfigFile => "configuration file",
            Source::Catalog => "device catalog",
        })
    }
}

/// The source of every resolved field of a [`TargetIdentity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    pub config_path: Option<Source>,
    pub serial_number: Option<Source>,
    pub device_family: Option<Source>,
    pub connection_type: Option<Source>,
}

/// The outcome of a resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The resolved identity.
    pub identity: TargetIdentity,
    /// Where each field of the identity came from.
    pub sources: Sources,
    /// The identity recorded in the configuration file which was found, if any.
    pub loaded: Option<PersistedConfig>,
    request: IdentityRequest,
}

impl Resolution {
    /// Returns `true` if the loaded configuration contradicts an explicitly
    /// requested field and has to be regenerated.
    pub fn is_stale(&self) -> bool {
        let Some(loaded) = &self.loaded else {
            return false;
        };

        let differs = |requested: &Option<String>, recorded: &Option<String>| {
            requested.is_some() && requested != recorded
        };

        differs(&self.request.serial_number, &loaded.serial_number)
            || differs(&self.request.device_family, &loaded.device_family)
            || differs(&self.request.connection_type, &loaded.connection_type)
    }

    /// The request this resolution answers.
    pub fn request(&self) -> &IdentityRequest {
        &self.request
    }
}

type Strategy<'a, T> = (Source, &'a dyn Fn() -> Option<T>);

/// Tries each source in order and returns the first value found.
fn first_present<T>(strategies: &[Strategy<'_, T>]) -> Option<(T, Source)> {
    strategies
        .iter()
        .find_map(|(source, lookup)| lookup().map(|value| (value, *source)))
}

fn split<T>(found: Option<(T, Source)>) -> (Option<T>, Option<Source>) {
    match found {
        Some((value, source)) => (Some(value), Some(source)),
        None => (None, None),
    }
}

/// Resolves identities against a device catalog and a configuration store.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    catalog: &'a dyn DeviceCatalog,
    store: &'a ConfigStore,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a dyn DeviceCatalog, store: &'a ConfigStore) -> Self {
        Self { catalog, store }
    }

    /// Resolves `request` into a target identity.
    ///
    /// Fields which cannot be determined are left empty. The only hard error is
    /// an explicitly requested configuration file which does not exist.
    pub fn resolve(&self, request: &IdentityRequest) -> Result<Resolution, Error> {
        let explicit_config = match &request.config {
            Some(config) => {
                let path = paths::expand_home(config);
                if !path.is_file() {
                    return Err(Error::ConfigNotFound(path));
                }
                Some(path)
            }
            None => None,
        };

        let find = |key: &Option<String>| key.as_deref().and_then(|key| self.store.find(key));
        let (config_path, config_source) = split(first_present::<PathBuf>(&[
            (Source::Explicit, &|| explicit_config.clone()),
            (Source::ConfigFile, &|| find(&request.serial_number)),
            (Source::ConfigFile, &|| find(&request.device_family)),
            (Source::ConfigFile, &|| find(&request.connection_type)),
        ]));

        let loaded = config_path.as_deref().and_then(|path| {
            self.store
                .load(path)
                .map(|config| config.named_by(self.catalog))
                .map_err(|error| {
                    tracing::warn!("Ignoring unreadable configuration {}: {error}", path.display())
                })
                .ok()
        });
        let recorded = loaded.clone().unwrap_or_default();

        let (serial_number, serial_source) = split(first_present::<String>(&[
            (Source::Explicit, &|| request.serial_number.clone()),
            (Source::ConfigFile, &|| recorded.serial_number.clone()),
        ]));

        let (device_family, family_source) = split(first_present::<String>(&[
            (Source::Explicit, &|| request.device_family.clone()),
            (Source::ConfigFile, &|| recorded.device_family.clone()),
            (Source::Catalog, &|| {
                let serial = serial_number.as_deref()?;
                let device = self.catalog.device_for_serial(serial);
                if device.is_none() {
                    tracing::warn!("The device family of probe {serial} is not in the catalog");
                }
                device
            }),
        ]));

        let (connection_type, connection_source) = split(first_present::<String>(&[
            (Source::Explicit, &|| request.connection_type.clone()),
            (Source::ConfigFile, &|| recorded.connection_type.clone()),
            (Source::Catalog, &|| {
                self.catalog.default_connection(device_family.as_deref()?)
            }),
        ]));

        let resolution = Resolution {
            identity: TargetIdentity {
                config_path,
                serial_number,
                device_family,
                connection_type,
            },
            sources: Sources {
                config_path: config_source,
                serial_number: serial_source,
                device_family: family_source,
                connection_type: connection_source,
            },
            loaded,
            request: request.clone(),
        };

        tracing::debug!("Resolved {:?} from {:?}", resolution.identity, resolution.sources);
        if resolution.is_stale() {
            tracing::info!("The target configuration contradicts the requested target");
        }

        Ok(resolution)
    }
}
