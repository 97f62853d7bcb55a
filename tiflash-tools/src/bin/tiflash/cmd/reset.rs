use anyhow::Context;

use crate::util::common_options::{find_installation, finish, TargetCliOptions};
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    target: TargetCliOptions,
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut target = self.target.open(config).await?;
        let result = target.reset().await;
        finish(target, result).await
    }
}

/// Resets the probe itself instead of the target, without starting a debug session.
#[derive(clap::Parser)]
pub struct Xds110Cmd {
    /// The serial number of the probe. Defaults to the first probe found.
    #[arg(long, env = "TIFLASH_SERIAL")]
    serial: Option<String>,
}

impl Xds110Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let installation = find_installation(config)?;
        tiflash::xds110::reset(&installation, self.serial.as_deref())
            .await
            .context("Failed to reset the XDS110 probe.")?;

        match self.serial {
            Some(serial) => println!("Reset probe {serial}."),
            None => println!("Reset the probe."),
        }
        Ok(())
    }
}
