use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::installation::Installation;
use crate::{paths, Error};

const SERVER_SCRIPT: &str = "server.js";
const WORKER_SCRIPT: &str = "main.js";

const LAUNCHER_ARGS: &[&str] = &[
    "-nosplash",
    "-application",
    "com.ti.ccstudio.apps.runScript",
    "-product",
    "com.ti.ccstudio.branding.product",
    "-dss.rhinoArgs",
];

/// How to launch the processes of a debug engine.
///
/// The long-lived server prints `PORT: <n>` once it accepts connections. A
/// worker is started for every command; it posts its result to the result
/// listener on `result_port` and exits.
pub trait Engine: Send + Sync + std::fmt::Debug {
    /// The command starting the long-lived server process.
    fn server_command(&self, workspace: &Path, result_port: u16) -> Command;

    /// The command starting a worker which executes `args`.
    fn worker_command(&self, workspace: &Path, result_port: u16, args: &[String]) -> Command;
}

/// The scripting engine of a Code Composer Studio installation.
#[derive(Debug, Clone)]
pub struct Dss {
    executable: PathBuf,
    scripts: PathBuf,
}

impl Dss {
    /// The engine of `installation`, using the support scripts in the default location.
    pub fn new(installation: &Installation) -> Result<Self, Error> {
        Self::with_scripts(installation, paths::scripts_dir()?)
    }

    /// The engine of `installation`, using the support scripts in `scripts`.
    pub fn with_scripts(installation: &Installation, scripts: impl Into<PathBuf>) -> Result<Self, Error> {
        let scripts = scripts.into();
        for script in [SERVER_SCRIPT, WORKER_SCRIPT] {
            if !scripts.join(script).is_file() {
                return Err(Error::InvalidPath {
                    path: scripts,
                    reason: format!("the engine script {script} is missing"),
                });
            }
        }

        Ok(Self {
            executable: installation.executable(),
            scripts,
        })
    }

    fn command(&self, workspace: &Path, script: &str, result_port: u16, args: &[String]) -> Command {
        // The launcher hands a single string to the script interpreter.
        let mut script_args = vec![
            self.scripts.join(script).display().to_string(),
            self.scripts.display().to_string(),
            result_port.to_string(),
        ];
        script_args.extend(args.iter().cloned());

        let mut command = Command::new(&self.executable);
        command
            .arg("-data")
            .arg(workspace)
            .args(LAUNCHER_ARGS)
            .arg(script_args.join(" "))
            .current_dir(&self.scripts);
        command
    }
}

impl Engine for Dss {
    fn server_command(&self, workspace: &Path, result_port: u16) -> Command {
        self.command(workspace, SERVER_SCRIPT, result_port, &[])
    }

    fn worker_command(&self, workspace: &Path, result_port: u16, args: &[String]) -> Command {
        self.command(workspace, WORKER_SCRIPT, result_port, args)
    }
}
