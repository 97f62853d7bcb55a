use std::sync::Arc;

use anyhow::Context;
use tiflash::catalog::{filter_names, find_connections, find_devices};
use tiflash::{DeviceCatalog, Dss, ListKind, Session, TargetDb};

use crate::util::common_options::find_installation;
use crate::Config;

#[derive(clap::Parser)]
pub struct InstallationsCmd {}

impl InstallationsCmd {
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let root = match &config.ccs_prefix {
            Some(prefix) => prefix.clone(),
            None => tiflash::paths::installation_root()?,
        };
        let installations = tiflash::installation::find_all(&root)?;

        if installations.is_empty() {
            println!("No installations were found below {}.", root.display());
            return Ok(());
        }

        let selected = tiflash::installation::select(installations.clone(), config.ccs_version.as_deref());
        println!("The following installations were found:");
        for installation in &installations {
            let marker = if selected.as_ref() == Some(installation) { "*" } else { " " };
            println!(
                "{marker} {:<10} {}",
                installation.version().to_string(),
                installation.root().display()
            );
        }
        Ok(())
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Devices,
    Connections,
    Cpus,
}

impl From<Kind> for ListKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Devices => ListKind::Devices,
            Kind::Connections => ListKind::Connections,
            Kind::Cpus => ListKind::Cpus,
        }
    }
}

#[derive(clap::Parser)]
pub struct Cmd {
    #[clap(value_enum)]
    kind: Kind,

    /// Only list names matching this regular expression, ignoring case.
    #[arg(long)]
    filter: Option<String>,

    /// Ask the debug engine instead of reading the target database.
    #[arg(long)]
    from_engine: bool,
}

impl Cmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let installation = find_installation(config)?;

        let names = if self.from_engine {
            let engine = Arc::new(Dss::new(&installation)?);
            let mut session = Session::open(engine, &config.session_options()).await?;
            let result = session
                .list(self.kind.into(), config.command_timeout())
                .await;
            if let Err(error) = session.close().await {
                tracing::warn!("Failed to close the debug session: {error}");
            }
            let names = result.context("The debug engine could not list its catalogue.")?;
            filtered(names, self.filter.as_deref())
        } else {
            let catalog = TargetDb::new(&installation);
            match (self.kind, self.filter.as_deref()) {
                (Kind::Devices, Some(pattern)) => find_devices(&catalog, pattern),
                (Kind::Connections, Some(pattern)) => find_connections(&catalog, pattern),
                (Kind::Devices, None) => catalog.devices(),
                (Kind::Connections, None) => catalog.connections(),
                (Kind::Cpus, filter) => filtered(catalog.cpus(), filter),
            }
        };

        for name in names {
            println!("{name}");
        }
        Ok(())
    }
}

fn filtered(names: Vec<String>, filter: Option<&str>) -> Vec<String> {
    match filter {
        Some(pattern) => filter_names(names, pattern),
        None => names,
    }
}

#[derive(clap::Parser)]
pub struct ProbesCmd {}

impl ProbesCmd {
    pub async fn run(self, config: &Config) -> anyhow::Result<()> {
        let installation = find_installation(config)?;
        let probes = tiflash::xds110::list(&installation).await?;

        if !probes.is_empty() {
            println!("The following XDS110 probes were found:");
            for (num, serial) in probes.iter().enumerate() {
                println!("[{num}]: {serial}");
            }
        } else {
            println!("No XDS110 probes were found.");
        }
        Ok(())
    }
}
