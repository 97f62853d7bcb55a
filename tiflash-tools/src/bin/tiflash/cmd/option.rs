use crate::util::common_options::{finish, TargetCliOptions};
use crate::Config;

#[derive(clap::Subcommand)]
pub enum Cmd {
    /// Read a debug option
    Get {
        #[clap(flatten)]
        target: TargetCliOptions,

        /// The id of the option, e.g. ResetOnRestart.
        id: String,

        /// A flash operation to run before the option is read, e.g. ReadDeviceInfo.
        #[clap(long, value_name = "OPCODE")]
        operation: Option<String>,
    },
    /// Set a debug option and print the value the target reports afterwards
    Set {
        #[clap(flatten)]
        target: TargetCliOptions,

        id: String,

        value: String,
    },
    /// List the debug options the target supports
    List {
        #[clap(flatten)]
        target: TargetCliOptions,

        /// Only list options whose id matches this regular expression.
        filter: Option<String>,
    },
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let (target, id, value, operation) = match self {
            Self::Get {
                target,
                id,
                operation,
            } => (target, id, None, operation),
            Self::Set { target, id, value } => (target, id, Some(value), None),
            Self::List { target, filter } => return list(target, filter, config).await,
        };

        let mut target = target.open(config).await?;
        if let Some(value) = value {
            target.set_option(id.as_str(), value);
        }
        let result = target.get_option(&id, operation.as_deref()).await;
        let value = finish(target, result).await?;

        println!("{id} = {value}");
        Ok(())
    }
}

async fn list(target: TargetCliOptions, filter: Option<String>, config: &Config) -> anyhow::Result<()> {
    let mut target = target.open(config).await?;
    let result = target.list_options(filter.as_deref()).await;
    let ids = finish(target, result).await?;

    match &filter {
        Some(filter) => println!("Options ({filter}):"),
        None => println!("Options:"),
    }
    for id in ids {
        println!("  {id}");
    }
    Ok(())
}
