#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tiflash::{DeviceCatalog, Engine, SessionOptions};
use tokio::process::Command;

pub const XDS110: &str = "Texas Instruments XDS110 USB Debug Probe";

pub const XDS110_DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<connection XML_version="1.2" desc="Texas Instruments XDS110 USB Debug Probe" id="Texas Instruments XDS110 USB Debug Probe">
  <connectionType Type="TIXDS110"/>
  <property Type="choicelist" Value="0" id="Debug Probe Selection" Name="Debug Probe Selection" ID="SEPK.POD_PORT" desc="Select the debug probe">
    <choice Name="Only one XDS110 installed" value="0"/>
    <choice Name="Select by serial number" value="0">
      <property Type="stringfield" Value="" id="-- Enter the serial number" Name="-- Enter the serial number" ID="SEPK.POD_SERIAL"/>
    </choice>
  </property>
</connection>
"#;

/// A target configuration as the engine generates it.
pub fn ccxml(device_family: &str, connection_type: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<configurations XML_version="1.2" id="configurations_0">
    <configuration XML_version="1.2" id="{connection_type}_0">
        <instance XML_version="1.2" desc="{connection_type}_0" href="connections/TIXDS110_Connection.xml" id="{connection_type}_0" xml="TIXDS110_Connection.xml" xmlpath="connections"/>
        <connection XML_version="1.2" id="{connection_type}_0">
            <platform XML_version="1.2" id="platform_0">
                <instance XML_version="1.2" desc="{device_family}_0" href="devices/{device_family}.xml" id="{device_family}_0" xml="{device_family}.xml" xmlpath="devices"/>
            </platform>
        </connection>
    </configuration>
</configurations>
"#
    )
}

/// A target configuration selecting the probe with `serial`.
pub fn ccxml_with_serial(device_family: &str, connection_type: &str, serial: &str) -> String {
    tiflash::config::patch_serial(&ccxml(device_family, connection_type), XDS110_DESCRIPTOR, serial)
        .expect("Failed to patch the serial number into the fixture.")
}

/// A catalog knowing one board, `CC1352R1F3` behind serial numbers starting with `L4`.
#[derive(Debug)]
pub struct FakeCatalog;

impl DeviceCatalog for FakeCatalog {
    fn device_for_serial(&self, serial: &str) -> Option<String> {
        serial.starts_with("L4").then(|| "CC1352R1F3".to_string())
    }

    fn default_connection(&self, device_family: &str) -> Option<String> {
        (device_family == "CC1352R1F3").then(|| XDS110.to_string())
    }

    fn cpu_for_device(&self, device_family: &str) -> Option<String> {
        (device_family == "CC1352R1F3").then(|| "CORTEX_M4".to_string())
    }

    fn connection_descriptor(&self, _file_name: &str) -> Option<String> {
        Some(XDS110_DESCRIPTOR.to_string())
    }

    fn devices(&self) -> Vec<String> {
        vec!["CC1352R1F3".to_string()]
    }

    fn connections(&self) -> Vec<String> {
        vec![XDS110.to_string()]
    }
}

/// How a fake worker answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Posts the payload and exits with the code.
    Post(String, i32),
    /// Posts the payload after the delay from the still running worker, which
    /// exits successfully shortly afterwards.
    Delayed(Duration, String),
    /// Posts the payload and keeps running for the duration before exiting successfully.
    Linger(String, Duration),
    /// Exits with the code without posting anything.
    Exit(i32),
    /// Never answers.
    Hang,
}

type Responder = Box<dyn Fn(&[String]) -> Reply + Send + Sync>;

/// An engine whose processes are shell one-liners.
///
/// The server reports the port of a listener owned by the test. Workers post
/// their result before the process is spawned, and `--genccxml` writes a
/// configuration like the real engine does.
pub struct FakeEngine {
    server: TcpListener,
    server_starts: AtomicUsize,
    generations: AtomicUsize,
    commands: Mutex<Vec<Vec<String>>>,
    responder: Responder,
    failing_server: bool,
}

impl FakeEngine {
    pub fn new(responder: impl Fn(&[String]) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            server: TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
                .expect("Failed to bind the fake server."),
            server_starts: AtomicUsize::new(0),
            generations: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            failing_server: false,
        }
    }

    /// An engine answering every command with an empty success.
    pub fn succeeding() -> Self {
        Self::new(|_| Reply::Post(String::new(), 0))
    }

    /// An engine whose server dies during startup.
    pub fn failing_server() -> Self {
        Self {
            failing_server: true,
            ..Self::succeeding()
        }
    }

    pub fn server_starts(&self) -> usize {
        self.server_starts.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    /// The arguments of every worker so far.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().clone()
    }

    fn generate(&self, args: &[String]) -> Reply {
        let value = |key: &str| {
            args.iter()
                .position(|arg| arg == key)
                .and_then(|i| args.get(i + 1))
                .cloned()
                .unwrap_or_default()
        };

        let path = Path::new(&value("-directory")).join(format!("{}.ccxml", value("-ccxml")));
        fs::write(&path, ccxml(&value("-devicetype"), &value("-connection")))
            .expect("Failed to write the generated configuration.");
        self.generations.fetch_add(1, Ordering::SeqCst);

        Reply::Post(String::new(), 0)
    }
}

impl std::fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

fn shell(script: String) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

impl Engine for FakeEngine {
    fn server_command(&self, _workspace: &Path, _result_port: u16) -> Command {
        self.server_starts.fetch_add(1, Ordering::SeqCst);

        if self.failing_server {
            return shell("echo 'license check failed'; exit 3".to_string());
        }

        let port = self
            .server
            .local_addr()
            .expect("The fake server has no address.")
            .port();
        shell(format!("echo 'starting'; echo 'PORT: {port}'; exec sleep 30"))
    }

    fn worker_command(&self, _workspace: &Path, result_port: u16, args: &[String]) -> Command {
        self.commands.lock().push(args.to_vec());

        let reply = if args.iter().any(|arg| arg == "--genccxml") {
            self.generate(args)
        } else {
            (self.responder)(args)
        };

        match reply {
            Reply::Post(payload, code) => {
                post(result_port, &payload);
                shell(format!("exit {code}"))
            }
            Reply::Delayed(delay, payload) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    // The session may be gone by now.
                    if let Ok(mut stream) = TcpStream::connect((Ipv4Addr::LOCALHOST, result_port)) {
                        let _ = stream.write_all(payload.as_bytes());
                    }
                });
                let exit_after = delay + Duration::from_millis(100);
                shell(format!("sleep {}; exit 0", exit_after.as_secs_f64()))
            }
            Reply::Linger(payload, linger) => {
                post(result_port, &payload);
                shell(format!("sleep {}; exit 0", linger.as_secs_f64()))
            }
            Reply::Exit(code) => shell(format!("exit {code}")),
            Reply::Hang => shell("exec sleep 5".to_string()),
        }
    }
}

fn post(result_port: u16, payload: &str) {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, result_port))
        .expect("Failed to connect to the result listener.");
    stream
        .write_all(payload.as_bytes())
        .expect("Failed to post the result.");
}

/// Session options for tests: any free result port and a short shutdown grace.
pub fn session_options(workspace_root: &Path) -> SessionOptions {
    SessionOptions {
        workspace_root: Some(workspace_root.to_path_buf()),
        result_port: 0,
        port_attempts: 1,
        startup_timeout: Duration::from_secs(10),
        shutdown_grace: Duration::from_millis(200),
    }
}
