//! Read-only lookups into the device and connection database of an installation.

mod targetdb;

pub use targetdb::TargetDb;

#[cfg(test)]
pub(crate) use targetdb::tests as targetdb_tests;

use regex::RegexBuilder;

/// A queryable set of device, connection and CPU records.
///
/// Every lookup answers `None` when the record is unknown; it is up to the
/// caller to decide whether an absent record is an error.
pub trait DeviceCatalog: Send + Sync + std::fmt::Debug {
    /// The device family of a board, determined by the prefix of its probe serial number.
    fn device_for_serial(&self, serial: &str) -> Option<String>;

    /// The connection a device family declares as its default.
    fn default_connection(&self, device_family: &str) -> Option<String>;

    /// The name of the CPU a device family is built around.
    fn cpu_for_device(&self, device_family: &str) -> Option<String>;

    /// The raw XML text of a connection descriptor, by its file name.
    fn connection_descriptor(&self, file_name: &str) -> Option<String>;

    /// The device family a device descriptor describes, by its file name.
    fn device_name(&self, _file_name: &str) -> Option<String> {
        None
    }

    /// The connection type a connection descriptor describes, by its file name.
    fn connection_name(&self, _file_name: &str) -> Option<String> {
        None
    }

    /// The names of all known device families.
    fn devices(&self) -> Vec<String>;

    /// The names of all known connections.
    fn connections(&self) -> Vec<String>;

    /// The names of all known CPUs.
    fn cpus(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Returns every device family whose name matches `pattern`, ignoring case.
pub fn find_devices(catalog: &dyn DeviceCatalog, pattern: &str) -> Vec<String> {
    filter_names(catalog.devices(), pattern)
}

/// Returns every connection whose name matches `pattern`, ignoring case.
pub fn find_connections(catalog: &dyn DeviceCatalog, pattern: &str) -> Vec<String> {
    filter_names(catalog.connections(), pattern)
}

/// Keeps the names matching `pattern`, ignoring case.
pub fn filter_names(names: Vec<String>, pattern: &str) -> Vec<String> {
    // A pattern which is not a valid regex is matched literally.
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        });

    match regex {
        Ok(regex) => names.into_iter().filter(|name| regex.is_match(name)).collect(),
        Err(error) => {
            tracing::debug!("Unusable search pattern {pattern:?}: {error}");
            Vec::new()
        }
    }
}
