//! A debug session bound to one identified target.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::DeviceCatalog;
use crate::channel::{
    parse_bool, parse_float, parse_list, parse_number, CommandRequest, CommandResponse, Engine, Session,
    SessionOptions, DEFAULT_COMMAND_TIMEOUT,
};
use crate::config::{ensure_consistent, ConfigStore};
use crate::identity::{IdentityRequest, Resolution, Resolver, TargetIdentity};
use crate::Error;

/// Options for opening a [`TargetSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOptions {
    /// The CPU to open the debug session on. Defaults to the CPU of the device family.
    pub chip: Option<String>,
    /// Regenerates the target configuration even if a matching one exists.
    pub force_fresh: bool,
    /// How long each command may take. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Options for the underlying engine session.
    pub session: SessionOptions,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            chip: None,
            force_fresh: false,
            timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            session: SessionOptions::default(),
        }
    }
}

/// A live engine session for one target.
///
/// Every command is prefixed with a `session` operation selecting the target
/// configuration and CPU, followed by the options set through
/// [`TargetSession::set_option`].
#[derive(Debug)]
pub struct TargetSession {
    session: Session,
    identity: TargetIdentity,
    chip: Option<String>,
    options: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl TargetSession {
    /// Identifies the target and starts an engine session for it.
    ///
    /// The target configuration is regenerated through the engine if it is
    /// missing or contradicts the request.
    pub async fn open(
        engine: Arc<dyn Engine>,
        catalog: &dyn DeviceCatalog,
        store: &ConfigStore,
        request: &IdentityRequest,
        options: &TargetOptions,
    ) -> Result<Self, Error> {
        let resolution = Resolver::new(catalog, store).resolve(request)?;
        resolution.identity.require_complete()?;

        let mut session = Session::open(engine, &options.session).await?;

        match Self::prepare(&mut session, resolution, catalog, store, options).await {
            Ok((identity, chip)) => {
                let mut target = Self {
                    session,
                    identity,
                    chip,
                    options: Vec::new(),
                    timeout: options.timeout,
                };
                target.update_prelude();
                Ok(target)
            }
            Err(error) => {
                if let Err(close_error) = session.close().await {
                    tracing::warn!("Failed to close the engine session: {close_error}");
                }
                Err(error)
            }
        }
    }

    async fn prepare(
        session: &mut Session,
        resolution: Resolution,
        catalog: &dyn DeviceCatalog,
        store: &ConfigStore,
        options: &TargetOptions,
    ) -> Result<(TargetIdentity, Option<String>), Error> {
        let config_path =
            ensure_consistent(&resolution, options.force_fresh, session, catalog, store).await?;

        let mut identity = resolution.identity;
        identity.config_path = Some(config_path);

        let (device_family, _) = identity.require_complete()?;
        let chip = options
            .chip
            .clone()
            .or_else(|| catalog.cpu_for_device(device_family));
        match &chip {
            Some(chip) => tracing::debug!("Using CPU {chip}"),
            None => tracing::warn!("The CPU of {device_family} is unknown, using the first one"),
        }

        Ok((identity, chip))
    }

    fn update_prelude(&mut self) {
        let config = self
            .identity
            .config_path
            .as_deref()
            .map(|path| path.display().to_string());

        let mut prelude = CommandRequest::new("session")
            .arg_opt("ccxml", config)
            .arg_opt("chip", self.chip.as_deref())
            .arg_opt("timeout", self.timeout.map(|t| t.as_millis()));

        if !self.options.is_empty() {
            prelude = prelude.then("setoption");
            for (id, value) in &self.options {
                prelude = prelude.arg(id.as_str(), value);
            }
        }

        self.session.set_prelude(prelude);
    }

    /// The identity of the target.
    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    /// The target configuration in use.
    pub fn config_path(&self) -> Option<&Path> {
        self.identity.config_path.as_deref()
    }

    /// The CPU the debug session is opened on.
    pub fn chip(&self) -> Option<&str> {
        self.chip.as_deref()
    }

    /// The underlying engine session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Executes a raw request after the session prelude.
    pub async fn execute(&mut self, request: &CommandRequest) -> Result<CommandResponse, Error> {
        self.session.execute(request, self.timeout).await
    }

    async fn run(&mut self, request: CommandRequest) -> Result<String, Error> {
        self.execute(&request).await?.into_result()
    }

    /// Erases the entire flash of the target.
    pub async fn erase(&mut self) -> Result<(), Error> {
        self.run(CommandRequest::new("erase")).await.map(|_| ())
    }

    /// Programs `image` into the target.
    ///
    /// A raw binary image needs the `address` to load it to.
    pub async fn flash(&mut self, image: &Path, binary: bool, address: Option<u64>) -> Result<(), Error> {
        let request = image_request("flash", image, binary, address)?;
        self.run(request).await.map(|_| ())
    }

    /// Compares `image` with the contents of the target.
    pub async fn verify(&mut self, image: &Path, binary: bool, address: Option<u64>) -> Result<bool, Error> {
        let request = image_request("verify", image, binary, address)?;
        parse_bool(&self.run(request).await?)
    }

    /// Resets the board.
    pub async fn reset(&mut self) -> Result<(), Error> {
        self.run(CommandRequest::new("reset")).await.map(|_| ())
    }

    /// Reads `count` values from `page` starting at `address`.
    pub async fn read_memory(&mut self, address: u64, count: usize, page: u32) -> Result<Vec<i64>, Error> {
        let request = CommandRequest::new("memory")
            .flag("read")
            .arg("page", page)
            .arg("address", address)
            .arg("numBytes", count);

        parse_list(&self.run(request).await?)
            .iter()
            .map(|value| parse_number(value))
            .collect()
    }

    /// Writes `data` to `page` starting at `address`.
    pub async fn write_memory(&mut self, address: u64, data: &[i64], page: u32) -> Result<(), Error> {
        let request = CommandRequest::new("memory")
            .flag("write")
            .arg("page", page)
            .arg("address", address)
            .arg_list("data", data);
        self.run(request).await.map(|_| ())
    }

    /// Reads the register called `name`.
    pub async fn read_register(&mut self, name: &str) -> Result<i64, Error> {
        let request = CommandRequest::new("register")
            .flag("read")
            .arg("regname", name);
        parse_number(&self.run(request).await?)
    }

    /// Writes `value` to the register called `name`.
    pub async fn write_register(&mut self, name: &str, value: i64) -> Result<(), Error> {
        let request = CommandRequest::new("register")
            .flag("write")
            .arg("regname", name)
            .arg("value", value);
        self.run(request).await.map(|_| ())
    }

    /// Evaluates a C expression or GEL function on the target.
    pub async fn evaluate(&mut self, expression: &str) -> Result<i64, Error> {
        let request = CommandRequest::new("evaluate").arg("expression", expression);
        parse_number(&self.run(request).await?)
    }

    /// Reads the debug option `id`.
    ///
    /// A `pre_operation` such as `DeviceStatus` runs first, in the same worker,
    /// for options whose value is only known after it.
    pub async fn get_option(&mut self, id: &str, pre_operation: Option<&str>) -> Result<String, Error> {
        self.run(option_request(id, pre_operation)).await
    }

    /// Reads a boolean debug option.
    pub async fn get_bool_option(&mut self, id: &str, pre_operation: Option<&str>) -> Result<bool, Error> {
        parse_bool(&self.get_option(id, pre_operation).await?)
    }

    /// Reads a numeric debug option.
    pub async fn get_float_option(&mut self, id: &str, pre_operation: Option<&str>) -> Result<f64, Error> {
        parse_float(&self.get_option(id, pre_operation).await?)
    }

    /// The ids of the debug options the target supports, optionally only
    /// those matching the regular expression `filter`.
    pub async fn list_options(&mut self, filter: Option<&str>) -> Result<Vec<String>, Error> {
        let request = CommandRequest::new("listoptions").arg_opt("id", filter);
        Ok(parse_list(&self.run(request).await?))
    }

    /// Sets the debug option `id` for every later command.
    pub fn set_option(&mut self, id: impl Into<String>, value: impl Into<String>) {
        let id = id.into();
        let value = value.into();
        match self.options.iter_mut().find(|(existing, _)| *existing == id) {
            Some((_, existing)) => *existing = value,
            None => self.options.push((id, value)),
        }
        self.update_prelude();
    }

    /// Runs a flash operation such as `Erase` or `ProgramSecurity`.
    pub async fn perform_operation(&mut self, opcode: &str) -> Result<(), Error> {
        self.run(CommandRequest::new("operation").arg("opcode", opcode))
            .await
            .map(|_| ())
    }

    /// Ends the engine session.
    pub async fn close(self) -> Result<(), Error> {
        self.session.close().await
    }
}

fn option_request(id: &str, pre_operation: Option<&str>) -> CommandRequest {
    let request = match pre_operation {
        Some(opcode) => CommandRequest::new("operation")
            .arg("opcode", opcode)
            .then("getoption"),
        None => CommandRequest::new("getoption"),
    };
    request.arg("id", id)
}

fn image_request(
    operation: &str,
    image: &Path,
    binary: bool,
    address: Option<u64>,
) -> Result<CommandRequest, Error> {
    if !image.is_file() {
        return Err(Error::InvalidPath {
            path: image.to_path_buf(),
            reason: "the image does not exist".to_string(),
        });
    }
    if binary && address.is_none() {
        return Err(Error::InvalidPath {
            path: image.to_path_buf(),
            reason: "a binary image needs a load address".to_string(),
        });
    }

    let image: PathBuf = dunce::canonicalize(image)?;
    let mut request = CommandRequest::new(operation).arg("image", image.display());
    if binary {
        request = request.flag("binary");
    }
    Ok(request.arg_opt("address", address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_images_need_an_address() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.bin");
        std::fs::write(&image, [0u8; 4]).unwrap();

        assert!(matches!(
            image_request("flash", &image, true, None),
            Err(Error::InvalidPath { .. })
        ));

        let request = image_request("flash", &image, true, Some(0x1000)).unwrap();
        let args = request.to_args();
        assert_eq!(args[0], "--flash");
        assert!(args.ends_with(&["-binary".to_string(), "-address".to_string(), "4096".to_string()]));
    }

    #[test]
    fn pre_operation_runs_before_the_option_is_read() {
        assert_eq!(
            option_request("DeviceInfoRevision", Some("ReadDeviceInfo")).to_args(),
            ["--operation", "-opcode", "ReadDeviceInfo", "--getoption", "-id", "DeviceInfoRevision"]
        );
        assert_eq!(
            option_request("ResetOnRestart", None).to_args(),
            ["--getoption", "-id", "ResetOnRestart"]
        );
    }

    #[test]
    fn missing_images_are_rejected() {
        assert!(matches!(
            image_request("verify", Path::new("/does/not/exist.hex"), false, None),
            Err(Error::InvalidPath { .. })
        ));
    }
}
