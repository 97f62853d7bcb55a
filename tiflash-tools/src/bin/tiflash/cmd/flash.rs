use std::path::PathBuf;

use colored::Colorize;

use crate::util::common_options::{finish, TargetCliOptions};
use crate::util::parse_u64;
use crate::Config;

/// How the image is given.
#[derive(clap::Parser, Debug)]
pub struct ImageOptions {
    /// The image to load, an ELF/COFF object or a hex file unless --binary is given.
    image: PathBuf,

    /// The image is a raw binary and needs --address.
    #[arg(long, requires = "address", help_heading = "IMAGE CONFIGURATION")]
    binary: bool,

    /// The address the binary image is loaded to.
    /// Can be specified in decimal (16), hexadecimal (0x10) or octal (0o20) format.
    #[arg(long, value_parser = parse_u64, help_heading = "IMAGE CONFIGURATION")]
    address: Option<u64>,
}

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    target: TargetCliOptions,

    #[clap(flatten)]
    image: ImageOptions,

    /// Compare the image with the target after programming it.
    #[arg(long)]
    verify: bool,
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let ImageOptions {
            image,
            binary,
            address,
        } = self.image;
        let verify = self.verify;

        let mut target = self.target.open(config).await?;
        let result = async {
            target.flash(&image, binary, address).await?;
            if verify {
                return target.verify(&image, binary, address).await;
            }
            Ok(true)
        }
        .await;
        let matches = finish(target, result).await?;

        anyhow::ensure!(matches, "The target does not match {} after programming.", image.display());
        println!("{} {}", "Programmed".green().bold(), image.display());
        Ok(())
    }
}

#[derive(clap::Parser)]
pub struct VerifyCmd {
    #[clap(flatten)]
    target: TargetCliOptions,

    #[clap(flatten)]
    image: ImageOptions,
}

impl VerifyCmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut target = self.target.open(config).await?;
        let result = target
            .verify(&self.image.image, self.image.binary, self.image.address)
            .await;
        let matches = finish(target, result).await?;

        anyhow::ensure!(
            matches,
            "The target does not match {}.",
            self.image.image.display()
        );
        println!("{} {}", "Verified".green().bold(), self.image.image.display());
        Ok(())
    }
}
