use crate::util::common_options::{finish, TargetCliOptions};
use crate::util::{parse_i64, parse_u64};
use crate::Config;

#[derive(clap::Subcommand)]
pub enum Cmd {
    /// Read values from target memory
    ///
    /// e.g. tiflash memory read 0x20000000 4
    ///      Reads 4 values starting at address 0x20000000
    #[clap(verbatim_doc_comment)]
    Read {
        #[clap(flatten)]
        target: TargetCliOptions,

        /// The address to start from.
        #[clap(value_parser = parse_u64)]
        address: u64,

        /// Number of values to read.
        count: usize,

        /// The memory page, for targets with separate program and data spaces.
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
    /// Write values to target memory
    Write {
        #[clap(flatten)]
        target: TargetCliOptions,

        /// The address to start from.
        #[clap(value_parser = parse_u64)]
        address: u64,

        /// The values to write.
        #[clap(value_parser = parse_i64, required = true, allow_negative_numbers = true)]
        values: Vec<i64>,

        /// The memory page, for targets with separate program and data spaces.
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        match self {
            Self::Read {
                target,
                address,
                count,
                page,
            } => {
                let mut target = target.open(config).await?;
                let result = target.read_memory(address, count, page).await;
                let values = finish(target, result).await?;

                let values = values
                    .iter()
                    .map(|value| format!("{value:#x}"))
                    .collect::<Vec<_>>();
                println!("{}", values.join(" "));
                Ok(())
            }
            Self::Write {
                target,
                address,
                values,
                page,
            } => {
                let mut target = target.open(config).await?;
                let result = target.write_memory(address, &values, page).await;
                finish(target, result).await
            }
        }
    }
}
