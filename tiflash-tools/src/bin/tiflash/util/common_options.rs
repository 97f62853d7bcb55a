use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tiflash::{Dss, IdentityRequest, Installation, TargetDb, TargetOptions, TargetSession};

use crate::util::parse_option;
use crate::Config;

/// Options which identify the target, shared between all commands talking to one.
#[derive(clap::Parser, Debug, Default)]
pub struct TargetCliOptions {
    /// The target configuration (.ccxml) file to use.
    #[arg(
        long,
        value_name = "PATH",
        env = "TIFLASH_CCXML",
        help_heading = "TARGET CONFIGURATION"
    )]
    pub ccxml: Option<PathBuf>,

    /// The serial number of the debug probe.
    #[arg(long, env = "TIFLASH_SERIAL", help_heading = "TARGET CONFIGURATION")]
    pub serial: Option<String>,

    /// The device family, e.g. CC1352R1F3.
    #[arg(long, env = "TIFLASH_DEVICE", help_heading = "TARGET CONFIGURATION")]
    pub device: Option<String>,

    /// The connection type, e.g. "Texas Instruments XDS110 USB Debug Probe".
    #[arg(long, env = "TIFLASH_CONNECTION", help_heading = "TARGET CONFIGURATION")]
    pub connection: Option<String>,

    /// The CPU to open the debug session on. Defaults to the CPU of the device family.
    #[arg(long, env = "TIFLASH_CHIP", help_heading = "TARGET CONFIGURATION")]
    pub chip: Option<String>,

    /// Regenerate the target configuration even if a matching one exists.
    #[arg(long, help_heading = "TARGET CONFIGURATION")]
    pub fresh: bool,

    /// A debug option sent with every command. Can be given multiple times.
    #[arg(
        long = "option",
        value_name = "ID=VALUE",
        value_parser = parse_option,
        help_heading = "TARGET CONFIGURATION"
    )]
    pub options: Vec<(String, String)>,
}

impl TargetCliOptions {
    /// What the command line knows about the target.
    pub fn request(&self) -> IdentityRequest {
        IdentityRequest {
            config: self.ccxml.clone(),
            serial_number: self.serial.clone(),
            device_family: self.device.clone(),
            connection_type: self.connection.clone(),
        }
    }

    /// Identifies the target and opens a debug session on it.
    pub async fn open(self, config: &Config) -> anyhow::Result<TargetSession> {
        let installation = find_installation(config)?;
        let catalog = TargetDb::new(&installation);
        let store = config.store()?;
        let engine = Arc::new(
            Dss::new(&installation).context("The debug engine could not be set up.")?,
        );

        let options = TargetOptions {
            chip: self.chip.clone(),
            force_fresh: self.fresh,
            timeout: config.command_timeout(),
            session: config.session_options(),
        };

        let mut target =
            TargetSession::open(engine, &catalog, &store, &self.request(), &options).await?;
        for (id, value) in self.options {
            target.set_option(id, value);
        }

        Ok(target)
    }
}

/// Closes `target` and passes on the outcome of the command run on it.
///
/// Failing to close the session is only logged.
pub async fn finish<T>(target: TargetSession, result: Result<T, tiflash::Error>) -> anyhow::Result<T> {
    if let Err(error) = target.close().await {
        tracing::warn!("Failed to close the debug session: {error}");
    }
    Ok(result?)
}

/// The installation selected by the configuration.
pub fn find_installation(config: &Config) -> anyhow::Result<Installation> {
    let installation = tiflash::installation::find(
        config.ccs_version.as_deref(),
        config.ccs_prefix.as_deref(),
    )?;
    tracing::debug!(
        "Using installation {} at {}",
        installation.version(),
        installation.root().display()
    );
    Ok(installation)
}
