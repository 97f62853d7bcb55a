//! The command/result channel to the debug engine.
//!
//! A [`Session`] owns one long-lived engine server process, a private
//! workspace directory and a [`ResultListener`]. Every command runs in a fresh
//! worker process which posts its result back to the listener, so exactly one
//! command is in flight at a time.

mod engine;
mod listener;
mod request;

pub use engine::{Dss, Engine};
pub use listener::ResultListener;
pub use request::{
    parse_bool, parse_float, parse_list, parse_number, CommandRequest, CommandResponse,
    CommandStatus, LIST_SEPARATOR,
};

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Child;

use crate::config::ConfigGenerator;
use crate::Error;

/// The port the result listener tries first.
pub const DEFAULT_RESULT_PORT: u16 = 19876;

/// How many consecutive ports the result listener tries.
pub const RESULT_PORT_ATTEMPTS: u16 = 3;

/// How long a command may take unless the caller says otherwise.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the server gets to exit on its own before it is killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// How long the server may take to report its port.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a result may trail the exit of its worker.
const RESULT_SETTLE: Duration = Duration::from_millis(250);

const WORKSPACE_PREFIX: &str = "tiflash-";

static STARTUP_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^PORT: (\d+)").unwrap());

/// Options for opening a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Where the private workspace is created. Defaults to the system temporary directory.
    pub workspace_root: Option<PathBuf>,
    /// The port the result listener tries first.
    pub result_port: u16,
    /// How many consecutive ports the result listener tries.
    pub port_attempts: u16,
    /// How long the server may take to report its port.
    pub startup_timeout: Duration,
    /// How long the server gets to exit on its own when the session is closed.
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            workspace_root: None,
            result_port: DEFAULT_RESULT_PORT,
            port_attempts: RESULT_PORT_ATTEMPTS,
            startup_timeout: STARTUP_TIMEOUT,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// The catalogues the engine can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Installed device families.
    Devices,
    /// Installed connections.
    Connections,
    /// Installed CPUs.
    Cpus,
}

impl ListKind {
    fn flag(self) -> &'static str {
        match self {
            ListKind::Devices => "devices",
            ListKind::Connections => "connections",
            ListKind::Cpus => "cpus",
        }
    }
}

/// A live debug engine.
#[derive(Debug)]
pub struct Session {
    engine: Arc<dyn Engine>,
    workspace: TempDir,
    listener: ResultListener,
    server: Child,
    server_port: u16,
    client: Option<TcpStream>,
    prelude: CommandRequest,
    shutdown_grace: Duration,
    /// The worker of a timed out command, until it exits.
    orphan: Option<Child>,
}

impl Session {
    /// Starts the engine server and waits until it accepts connections.
    pub async fn open(engine: Arc<dyn Engine>, options: &SessionOptions) -> Result<Self, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let workspace = match &options.workspace_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        tracing::debug!("Workspace {}", workspace.path().display());

        let listener = ResultListener::bind(options.result_port, options.port_attempts).await?;

        let mut command = engine.server_command(workspace.path(), listener.port());
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        tracing::debug!("Starting the engine server: {:?}", command.as_std());
        let mut server = command
            .spawn()
            .map_err(|error| Error::SessionStart(format!("the engine could not be spawned: {error}")))?;

        let stdout = server
            .stdout
            .take()
            .ok_or_else(|| Error::SessionStart("the engine output is not available".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut output = Vec::new();
        let startup = tokio::time::timeout(options.startup_timeout, async {
            while let Some(line) = lines.next_line().await? {
                tracing::trace!("engine: {line}");
                if let Some(port) = STARTUP_LINE
                    .captures(&line)
                    .and_then(|captures| captures[1].parse::<u16>().ok())
                {
                    return Ok(Some(port));
                }
                output.push(line);
            }
            Ok::<_, std::io::Error>(None)
        })
        .await;

        let server_port = match startup {
            Ok(Ok(Some(port))) => port,
            Ok(Ok(None)) => {
                return Err(Error::SessionStart(format!(
                    "the engine exited before reporting its port: {}",
                    output.join("\n")
                )))
            }
            Ok(Err(error)) => {
                return Err(Error::SessionStart(format!(
                    "the engine output could not be read: {error}"
                )))
            }
            Err(_) => {
                return Err(Error::SessionStart(format!(
                    "the engine did not report its port within {:?}",
                    options.startup_timeout
                )))
            }
        };
        tracing::debug!("The engine server listens on port {server_port}");

        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!("engine: {line}");
            }
        });

        let client = TcpStream::connect((Ipv4Addr::LOCALHOST, server_port))
            .await
            .map_err(|error| {
                Error::SessionStart(format!(
                    "the engine server on port {server_port} refused the connection: {error}"
                ))
            })?;

        Ok(Self {
            engine,
            workspace,
            listener,
            server,
            server_port,
            client: Some(client),
            prelude: CommandRequest::default(),
            shutdown_grace: options.shutdown_grace,
            orphan: None,
        })
    }

    /// The private workspace directory of this session.
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// The port workers post their results to.
    pub fn result_port(&self) -> u16 {
        self.listener.port()
    }

    /// The port the engine server reported.
    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    /// The operations every command is prefixed with.
    pub fn prelude(&self) -> &CommandRequest {
        &self.prelude
    }

    /// Sets the operations every later command is prefixed with.
    pub fn set_prelude(&mut self, prelude: CommandRequest) {
        self.prelude = prelude;
    }

    /// Executes `request`, prefixed with the prelude.
    ///
    /// With a `timeout` of `None` this waits until the worker answers. When
    /// the timeout elapses a [`CommandStatus::TimedOut`] response is returned;
    /// the worker is left running since it may still be writing to the target.
    /// The next command first waits, within its own timeout, for that worker
    /// to exit.
    pub async fn execute(
        &mut self,
        request: &CommandRequest,
        timeout: Option<Duration>,
    ) -> Result<CommandResponse, Error> {
        let args = self.prelude.clone().extend(request.clone()).to_args();
        self.run(args, timeout).await
    }

    /// Lists a catalogue of the engine. The prelude is not applied.
    pub async fn list(&mut self, kind: ListKind, timeout: Option<Duration>) -> Result<Vec<String>, Error> {
        let request = CommandRequest::new("list").flag(kind.flag());
        let payload = self.run(request.to_args(), timeout).await?.into_result()?;
        Ok(parse_list(&payload))
    }

    async fn run(&mut self, args: Vec<String>, timeout: Option<Duration>) -> Result<CommandResponse, Error> {
        if !self.reap_orphan(timeout).await? {
            tracing::warn!("The worker of a timed out command is still running, not executing");
            return Ok(CommandResponse::timed_out());
        }

        tracing::debug!("Executing {}", args.join(" "));

        let mut result = self.listener.arm();
        let mut worker = self
            .engine
            .worker_command(self.workspace.path(), self.listener.port(), &args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                self.listener.disarm();
                Error::Command(format!("a worker could not be spawned: {error}"))
            })?;

        // Only the result is bounded by the timeout, the exit of a worker
        // which already posted is waited for below.
        let exchange = async {
            tokio::select! {
                payload = &mut result => (payload.ok(), None),
                status = worker.wait() => {
                    let payload = tokio::time::timeout(RESULT_SETTLE, &mut result).await;
                    (payload.ok().and_then(Result::ok), Some(status))
                }
            }
        };

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.ok(),
            None => Some(exchange.await),
        };

        let Some((payload, status)) = outcome else {
            self.listener.disarm();
            tracing::warn!("No result within {timeout:?}; the worker keeps running");
            self.orphan = Some(worker);
            return Ok(CommandResponse::timed_out());
        };

        let status: ExitStatus = match status {
            Some(status) => status?,
            None => worker.wait().await?,
        };
        let response = match payload {
            Some(payload) => CommandResponse::completed(
                status.success(),
                String::from_utf8_lossy(&payload).into_owned(),
            ),
            None => {
                self.listener.disarm();
                tracing::warn!("The worker exited with {status} without reporting a result");
                CommandResponse::completed(false, String::new())
            }
        };

        tracing::debug!(
            "Worker exited with {status}, {} bytes of result",
            response.payload.len()
        );
        Ok(response)
    }

    /// Waits up to `timeout` for the worker of a timed out command to exit.
    ///
    /// Returns `false` if it is still running. A result it posts before
    /// exiting arrives while nobody is waiting and is dropped.
    async fn reap_orphan(&mut self, timeout: Option<Duration>) -> Result<bool, Error> {
        let Some(mut orphan) = self.orphan.take() else {
            return Ok(true);
        };
        tracing::debug!("Waiting for the worker of a timed out command to exit");

        let exited = match timeout {
            Some(limit) => tokio::time::timeout(limit, orphan.wait()).await.ok(),
            None => Some(orphan.wait().await),
        };
        let Some(status) = exited else {
            self.orphan = Some(orphan);
            return Ok(false);
        };
        let status = status?;
        tracing::debug!("A timed out worker exited with {status}");

        tokio::time::sleep(RESULT_SETTLE).await;
        Ok(true)
    }

    /// Asks the engine server to exit and removes the workspace.
    ///
    /// The server is killed if it is still running after the grace period.
    pub async fn close(self) -> Result<(), Error> {
        let Self {
            mut server,
            client,
            workspace,
            shutdown_grace,
            orphan,
            ..
        } = self;

        if orphan.is_some() {
            tracing::warn!("Closing while the worker of a timed out command is still running");
        }

        if let Some(mut client) = client {
            let message = format!("{}\n", serde_json::json!({ "name": "killServer" }));
            if let Err(error) = client.write_all(message.as_bytes()).await {
                tracing::debug!("The engine server did not take the shutdown request: {error}");
            }
            let _ = client.shutdown().await;
        }

        match tokio::time::timeout(shutdown_grace, server.wait()).await {
            Ok(Ok(status)) => tracing::debug!("The engine server exited with {status}"),
            Ok(Err(error)) => tracing::warn!("Waiting for the engine server failed: {error}"),
            Err(_) => {
                tracing::warn!("The engine server is still running after {shutdown_grace:?}, killing it");
                server.kill().await?;
            }
        }

        workspace.close()?;
        Ok(())
    }
}

#[async_trait]
impl ConfigGenerator for Session {
    async fn generate(
        &mut self,
        directory: &Path,
        name: &str,
        device_family: &str,
        connection_type: &str,
    ) -> Result<(), Error> {
        let request = CommandRequest::new("genccxml")
            .arg("directory", directory.display())
            .arg("connection", connection_type)
            .arg("devicetype", device_family)
            .arg("ccxml", name);

        self.run(request.to_args(), Some(DEFAULT_COMMAND_TIMEOUT))
            .await?
            .into_result()
            .map(|_| ())
    }
}
