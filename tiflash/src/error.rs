use std::path::PathBuf;

use crate::config::CcxmlError;
use crate::installation::VersionParseError;
use crate::xds110::Xds110Error;

/// The error type of every fallible operation in this crate.
///
/// Errors which stem from the debug engine carry the raw text the engine
/// reported, since that is usually the only actionable detail.
#[derive(thiserror::Error, docsplay::Display, Debug)]
pub enum Error {
    /// No installation or configuration was found: {0}
    NotFound(String),

    /// The path {path:?} is not valid: {reason}
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why the path was rejected.
        reason: String,
    },

    /// The target configuration {0:?} does not exist.
    ConfigNotFound(PathBuf),

    /// The target could not be identified: the {0} is unknown. Please provide it explicitly.
    IdentityIncomplete(&'static str),

    /// The debug engine could not be started: {0}
    SessionStart(String),

    /// The debug engine reported a failure: {0}
    Command(String),

    /// The debug engine did not respond in time.
    Timeout,

    /// A target configuration could not be read or patched.
    Ccxml(#[from] CcxmlError),

    /// An installation version could not be parsed.
    Version(#[from] VersionParseError),

    /// An XDS110 utility failed.
    Xds110(#[from] Xds110Error),

    /// An I/O error occurred.
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error means the target could not be identified,
    /// as opposed to a command which ran and failed or timed out.
    pub fn is_identification_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::IdentityIncomplete(_) | Self::Ccxml(_)
        )
    }
}
