//! Locating Code Composer Studio installations.
//!
//! An installation root is recognised by its marker set: the engine launcher
//! below `eclipse/`, the `eclipse/ccs.properties` file and the `ccs_base/`
//! directory. Its version is read from the `ccs_buildid` key of the
//! properties file.

mod version;

pub use version::{Version, VersionParseError};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::{paths, Error};

const PROPERTIES_FILE: &str = "eclipse/ccs.properties";
const BASE_DIRECTORY: &str = "ccs_base";

#[cfg(windows)]
const EXECUTABLE: &str = "eclipse/eclipsec.exe";
#[cfg(target_os = "macos")]
const EXECUTABLE: &str = "eclipse/Ccstudio.app/Contents/MacOS/ccstudio";
#[cfg(not(any(windows, target_os = "macos")))]
const EXECUTABLE: &str = "eclipse/ccstudio";

static BUILD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^ccs_buildid=([0-9]+(?:\.[0-9]+)*)").unwrap());
static PF_FILTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^PF_FILTERS=([a-zA-Z0-9,]*)").unwrap());
static INSTALLATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ccs").unwrap());

/// A verified installation of the debug tooling suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    root: PathBuf,
    version: Version,
}

impl Installation {
    /// Verifies the marker set below `root` and reads the version.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        let invalid = |reason: &str| Error::InvalidPath {
            path: root.to_path_buf(),
            reason: reason.to_string(),
        };

        if !root.join(BASE_DIRECTORY).is_dir() {
            return Err(invalid("the ccs_base directory is missing"));
        }
        if !root.join(EXECUTABLE).is_file() {
            return Err(invalid("the engine launcher is missing"));
        }

        let properties = fs::read_to_string(root.join(PROPERTIES_FILE))
            .map_err(|_| invalid("eclipse/ccs.properties is missing"))?;
        let version = BUILD_ID
            .captures(&properties)
            .and_then(|captures| captures.get(1))
            .ok_or_else(|| invalid("eclipse/ccs.properties does not contain a ccs_buildid"))?
            .as_str()
            .parse()?;

        let root = dunce::canonicalize(root)?;

        Ok(Self { root, version })
    }

    /// The root directory of the installation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The version of the installation.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The engine launcher executable.
    pub fn executable(&self) -> PathBuf {
        self.root.join(EXECUTABLE)
    }

    /// The `ccs_base` directory holding drivers, target database and utilities.
    pub fn base_dir(&self) -> PathBuf {
        self.root.join(BASE_DIRECTORY)
    }

    /// The product filters this installation was installed with.
    pub fn pf_filters(&self) -> Result<Vec<String>, Error> {
        let properties = fs::read_to_string(self.root.join(PROPERTIES_FILE))?;

        Ok(PF_FILTERS
            .captures(&properties)
            .and_then(|captures| captures.get(1))
            .map(|filters| {
                filters
                    .as_str()
                    .split(',')
                    .filter(|filter| !filter.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Finds an installation.
///
/// Without a `custom_root` the search starts at [`paths::installation_root`].
/// With a `version` constraint only installations whose version starts with
/// it are considered; the newest surviving installation is returned.
pub fn find(version: Option<&str>, custom_root: Option<&Path>) -> Result<Installation, Error> {
    let installations = match custom_root {
        Some(root) => {
            let root = paths::expand_home(root);
            let installations = find_all(&root)?;
            if installations.is_empty() {
                return Err(Error::InvalidPath {
                    path: root,
                    reason: "no installation was found below this directory".to_string(),
                });
            }
            installations
        }
        None => {
            let root = paths::installation_root()?;
            if !root.is_dir() {
                return Err(Error::NotFound(format!(
                    "the installation directory {} does not exist",
                    root.display()
                )));
            }
            find_all(&root)?
        }
    };

    tracing::debug!(
        "Found installations: {:?}",
        installations
            .iter()
            .map(|i| i.version().as_str())
            .collect::<Vec<_>>()
    );

    select(installations, version).ok_or_else(|| match version {
        Some(version) => Error::NotFound(format!("no installation matches version {version}")),
        None => Error::NotFound("no installation of Code Composer Studio was found".to_string()),
    })
}

/// Lists every verified installation below `root`, in discovery order.
pub fn find_all(root: &Path) -> Result<Vec<Installation>, Error> {
    if !root.is_dir() {
        return Err(Error::InvalidPath {
            path: root.to_path_buf(),
            reason: "the directory does not exist".to_string(),
        });
    }

    let mut installations = Vec::new();
    search(root, &mut installations)?;
    Ok(installations)
}

fn search(dir: &Path, found: &mut Vec<Installation>) -> Result<(), Error> {
    match Installation::open(dir) {
        Ok(installation) => {
            tracing::debug!(
                "Installation {} at {}",
                installation.version(),
                installation.root().display()
            );
            found.push(installation);
            return Ok(());
        }
        Err(error) => tracing::trace!("{} is not an installation: {error}", dir.display()),
    }

    let mut children = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| INSTALLATION_NAME.is_match(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    children.sort();

    for child in children {
        if let Err(error) = search(&child, found) {
            tracing::trace!("Skipping {}: {error}", child.display());
        }
    }

    Ok(())
}

/// Picks the newest installation matching `version`. Ties go to the first one.
pub fn select(installations: Vec<Installation>, version: Option<&str>) -> Option<Installation> {
    installations
        .into_iter()
        .filter(|installation| version.map_or(true, |v| installation.version.matches(v)))
        .reduce(|best, candidate| {
            if candidate.version > best.version {
                candidate
            } else {
                best
            }
        })
}

/// Creates a fake installation below `dir` for tests.
#[cfg(test)]
pub(crate) fn fake_installation(dir: &Path, version: &str) -> PathBuf {
    fs::create_dir_all(dir.join(BASE_DIRECTORY)).unwrap();
    let executable = dir.join(EXECUTABLE);
    fs::create_dir_all(executable.parent().unwrap()).unwrap();
    fs::write(&executable, "").unwrap();
    fs::write(
        dir.join(PROPERTIES_FILE),
        format!("ccs_buildid={version}\nPF_FILTERS=MSP430,ARM,\n"),
    )
    .unwrap();
    dir.to_path_buf()
}
