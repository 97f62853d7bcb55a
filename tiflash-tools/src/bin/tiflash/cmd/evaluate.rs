use crate::util::common_options::{finish, TargetCliOptions};
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    target: TargetCliOptions,

    /// The expression, e.g. "GEL_Reset()" or "*(int *)0x20000000".
    expression: String,
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut target = self.target.open(config).await?;
        let result = target.evaluate(&self.expression).await;
        let value = finish(target, result).await?;

        println!("{value} (0x{value:x})");
        Ok(())
    }
}

#[derive(clap::Parser)]
pub struct OperationCmd {
    #[clap(flatten)]
    target: TargetCliOptions,

    /// The opcode of the operation.
    opcode: String,
}

impl OperationCmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut target = self.target.open(config).await?;
        let result = target.perform_operation(&self.opcode).await;
        finish(target, result).await
    }
}
