use crate::util::common_options::{finish, TargetCliOptions};
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    target: TargetCliOptions,
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let mut target = self.target.open(config).await?;
        let result = target.erase().await;
        finish(target, result).await?;

        println!("Erased the flash of the target.");
        Ok(())
    }
}
