use colored::Colorize;
use tiflash::identity::Source;
use tiflash::{Resolver, TargetDb};

use crate::util::common_options::{find_installation, TargetCliOptions};
use crate::Config;

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(flatten)]
    target: TargetCliOptions,
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let installation = find_installation(config)?;
        let catalog = TargetDb::new(&installation);
        let store = config.store()?;

        let resolution = Resolver::new(&catalog, &store).resolve(&self.target.request())?;
        let identity = &resolution.identity;
        let sources = &resolution.sources;

        let config_path = identity
            .config_path
            .as_deref()
            .map(|path| path.display().to_string());
        print_field("Configuration", config_path.as_deref(), sources.config_path);
        print_field("Serial number", identity.serial_number.as_deref(), sources.serial_number);
        print_field("Device family", identity.device_family.as_deref(), sources.device_family);
        print_field("Connection", identity.connection_type.as_deref(), sources.connection_type);

        if resolution.is_stale() {
            println!(
                "{}",
                "The stored configuration contradicts the request and will be regenerated.".yellow()
            );
        }
        if !identity.is_complete() {
            println!(
                "{}",
                "The target is not fully identified. Pass --device and --connection.".yellow()
            );
        }
        Ok(())
    }
}

fn print_field(label: &str, value: Option<&str>, source: Option<Source>) {
    match (value, source) {
        (Some(value), Some(source)) => println!("{label:<14} {value} ({source})"),
        (Some(value), None) => println!("{label:<14} {value}"),
        (None, _) => println!("{label:<14} {}", "unknown".dimmed()),
    }
}
