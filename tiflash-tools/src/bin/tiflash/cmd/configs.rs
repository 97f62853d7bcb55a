use anyhow::Context;

use crate::Config;

#[derive(clap::Subcommand)]
pub enum Cmd {
    /// List the stored target configurations
    List,
    /// Remove a stored target configuration
    Remove {
        /// The serial number or device family the configuration was stored under.
        key: String,
    },
}

impl Cmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let store = config.store()?;

        match self {
            Self::List => {
                let configs = store.list()?;
                if configs.is_empty() {
                    println!("No target configurations are stored in {}.", store.dir().display());
                }

                for path in configs {
                    match store.load(&path) {
                        Ok(persisted) => println!(
                            "{} [{} / {} / {}]",
                            path.display(),
                            persisted.serial_number.as_deref().unwrap_or("-"),
                            persisted.device_family.as_deref().unwrap_or("-"),
                            persisted.connection_type.as_deref().unwrap_or("-"),
                        ),
                        Err(error) => {
                            tracing::debug!("Unreadable configuration {}: {error}", path.display());
                            println!("{} [unreadable]", path.display());
                        }
                    }
                }
                Ok(())
            }
            Self::Remove { key } => {
                let path = store
                    .remove(&key)
                    .with_context(|| format!("Failed to remove the configuration for {key}."))?;
                println!("Removed {}", path.display());
                Ok(())
            }
        }
    }
}
