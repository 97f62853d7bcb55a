use crate::util::common_options::{finish, TargetCliOptions};
use crate::util::parse_i64;
use crate::Config;

#[derive(clap::Subcommand)]
pub enum Cmd {
    /// Read a register, e.g. PC
    Read {
        #[clap(flatten)]
        target: TargetCliOptions,

        name: String,
    },
    /// Write a register
    Write {
        #[clap(flatten)]
        target: TargetCliOptions,

        name: String,

        #[clap(value_parser = parse_i64, allow_negative_numbers = true)]
        value: i64,
    },
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        match self {
            Self::Read { target, name } => {
                let mut target = target.open(config).await?;
                let result = target.read_register(&name).await;
                let value = finish(target, result).await?;

                println!("{name} = {value:#x}");
                Ok(())
            }
            Self::Write {
                target,
                name,
                value,
            } => {
                let mut target = target.open(config).await?;
                let result = target.write_register(&name, value).await;
                finish(target, result).await
            }
        }
    }
}
