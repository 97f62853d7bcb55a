mod cmd;
mod util;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use figment::providers::{Data, Env, Format as _, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tiflash::channel::DEFAULT_RESULT_PORT;
use tiflash::{ConfigStore, SessionOptions};

use crate::util::logging::{setup_logging, LevelFilter};

/// Keys of the configuration which can be set through `TIFLASH_*` environment variables.
const ENV_KEYS: [&str; 6] = [
    "ccs_version",
    "ccs_prefix",
    "target_config_dir",
    "result_port",
    "timeout",
    "log_level",
];

/// The layered configuration of the CLI.
///
/// Built-in defaults are overridden by `~/.tiflash/config.{toml,json,yaml}`,
/// then by `TIFLASH_*` environment variables, then by command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    /// Only use installations whose version starts with this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ccs_version: Option<String>,
    /// Where installations are searched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ccs_prefix: Option<PathBuf>,
    /// Where target configurations are stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_config_dir: Option<PathBuf>,
    /// The first port tried for the result listener.
    pub result_port: u16,
    /// Seconds a command may take. Negative values wait forever.
    pub timeout: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LevelFilter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ccs_version: None,
            ccs_prefix: None,
            target_config_dir: None,
            result_port: DEFAULT_RESULT_PORT,
            timeout: tiflash::channel::DEFAULT_COMMAND_TIMEOUT.as_secs_f64(),
            log_level: None,
        }
    }
}

impl Config {
    /// How long a command may take, `None` meaning forever.
    pub fn command_timeout(&self) -> Option<Duration> {
        if self.timeout < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.timeout).ok()
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            result_port: self.result_port,
            ..SessionOptions::default()
        }
    }

    /// The store holding target configurations.
    pub fn store(&self) -> Result<ConfigStore> {
        match &self.target_config_dir {
            Some(dir) => Ok(ConfigStore::new(tiflash::paths::expand_home(dir))),
            None => ConfigStore::open_default()
                .context("The target configuration directory could not be determined."),
        }
    }
}

/// Configuration values given on the command line.
#[derive(clap::Parser, Debug, Default, Serialize)]
struct ConfigOverrides {
    /// Only use installations whose version starts with this, e.g. "12" or "12.5".
    #[arg(long, global = true, help_heading = "INSTALLATION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    ccs_version: Option<String>,

    /// The directory installations are searched in.
    #[arg(long, global = true, value_name = "PATH", help_heading = "INSTALLATION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    ccs_prefix: Option<PathBuf>,

    /// The directory target configurations are stored in.
    #[arg(long, global = true, value_name = "PATH", help_heading = "INSTALLATION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    target_config_dir: Option<PathBuf>,

    /// The first port tried for receiving command results.
    #[arg(long, global = true, help_heading = "ENGINE CONFIGURATION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    result_port: Option<u16>,

    /// Seconds a command may take. Negative values wait forever.
    #[arg(
        long,
        global = true,
        allow_negative_numbers = true,
        help_heading = "ENGINE CONFIGURATION"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<f64>,

    /// The level of log messages printed to stderr.
    #[arg(long, global = true, value_enum, help_heading = "LOG CONFIGURATION")]
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<LevelFilter>,
}

#[derive(clap::Parser)]
#[clap(
    name = "tiflash",
    about = "Flash and inspect TI targets through Code Composer Studio",
    version = env!("TIFLASH_VERSION"),
    long_version = env!("TIFLASH_LONG_VERSION")
)]
struct Cli {
    /// Location for a JSON log file
    #[clap(long, global = true, help_heading = "LOG CONFIGURATION")]
    log_file: Option<PathBuf>,

    #[clap(flatten)]
    overrides: ConfigOverrides,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

impl Cli {
    async fn run(self, config: Config) -> Result<()> {
        match self.subcommand {
            Subcommand::ListInstallations(cmd) => cmd.run(&config),
            Subcommand::List(cmd) => cmd.run(&config).await,
            Subcommand::ListProbes(cmd) => cmd.run(&config).await,
            Subcommand::Identify(cmd) => cmd.run(&config),
            Subcommand::Erase(cmd) => cmd.run(&config).await,
            Subcommand::Flash(cmd) => cmd.run(&config).await,
            Subcommand::Verify(cmd) => cmd.run(&config).await,
            Subcommand::Reset(cmd) => cmd.run(&config).await,
            Subcommand::Xds110Reset(cmd) => cmd.run(&config).await,
            Subcommand::Memory(cmd) => cmd.run(&config).await,
            Subcommand::Register(cmd) => cmd.run(&config).await,
            Subcommand::Evaluate(cmd) => cmd.run(&config).await,
            Subcommand::Operation(cmd) => cmd.run(&config).await,
            Subcommand::DebugOption(cmd) => cmd.run(&config).await,
            Subcommand::Configs(cmd) => cmd.run(&config),
        }
    }
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// List all installations found on this machine
    ListInstallations(cmd::list::InstallationsCmd),
    /// List the device families, connections or CPUs an installation supports
    List(cmd::list::Cmd),
    /// List the serial numbers of all connected XDS110 probes
    ListProbes(cmd::list::ProbesCmd),
    /// Show what the given target options resolve to, without starting a session
    Identify(cmd::identify::Cmd),
    /// Erase the flash of the target
    Erase(cmd::erase::Cmd),
    /// Program an image into the target
    Flash(cmd::flash::Cmd),
    /// Compare an image with the contents of the target
    Verify(cmd::flash::VerifyCmd),
    /// Reset the target
    Reset(cmd::reset::Cmd),
    /// Reset an XDS110 probe
    #[clap(name = "xds110-reset")]
    Xds110Reset(cmd::reset::Xds110Cmd),
    /// Read or write target memory
    #[clap(subcommand)]
    Memory(cmd::memory::Cmd),
    /// Read or write a register
    #[clap(subcommand)]
    Register(cmd::register::Cmd),
    /// Evaluate a C expression or GEL function on the target
    Evaluate(cmd::evaluate::Cmd),
    /// Run a flash operation such as Erase or ProgramSecurity
    Operation(cmd::evaluate::OperationCmd),
    /// Read, set or list debug options
    #[clap(subcommand, name = "option")]
    DebugOption(cmd::option::Cmd),
    /// Manage stored target configurations
    #[clap(subcommand)]
    Configs(cmd::configs::Cmd),
}

fn load_config(overrides: &ConfigOverrides) -> Result<Config> {
    let default_config = serde_json::to_string_pretty(&Config::default())?;
    let mut figment = Figment::from(Data::<Json>::string(&default_config));

    match tiflash::paths::base_dir() {
        Ok(base) => {
            let file = base.join("config");
            figment = figment
                .merge(Toml::file(file.with_extension("toml")))
                .merge(Json::file(file.with_extension("json")))
                .merge(Yaml::file(file.with_extension("yaml")));
        }
        Err(error) => tracing::debug!("Not reading a configuration file: {error}"),
    }

    let config = figment
        .merge(Env::prefixed("TIFLASH_").only(&ENV_KEYS))
        .merge(Serialized::defaults(overrides))
        .extract::<Config>()?;

    Ok(config)
}

/// Prints `error` and a hint which kind of failure it is.
fn report(error: &anyhow::Error) {
    eprintln!("{} {error:?}", "Error:".red().bold());

    let Some(error) = error.downcast_ref::<tiflash::Error>() else {
        return;
    };
    let hint = if error.is_identification_error() {
        "The target could not be identified. Pass --device and --connection, or --ccxml."
    } else if matches!(error, tiflash::Error::Timeout) {
        "The command timed out. Use --timeout to wait longer."
    } else {
        return;
    };
    eprintln!("{}", hint.blue());
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.overrides).context("Failed to load configuration.")?;
    let _logger_guard = setup_logging(cli.log_file.as_deref(), config.log_level)?;
    tracing::debug!("{config:?}");

    cli.run(config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report(&error);
            ExitCode::FAILURE
        }
    }
}
