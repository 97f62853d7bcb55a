//! Utilities for XDS110 debug probes shipped with an installation.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use crate::installation::Installation;

const XDS110_DIRECTORY: &str = "common/uscif/xds110";
const LIST_TOOL: &str = "xdsdfu";
const RESET_TOOL: &str = "xds110reset";

static SERIAL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Serial Num:\s+([A-Z0-9]{8})").unwrap());

/// An error which can occur while running an XDS110 utility.
#[derive(thiserror::Error, docsplay::Display, Debug)]
pub enum Xds110Error {
    /// The XDS110 utilities are not installed in {0:?}.
    MissingDirectory(PathBuf),

    /// The XDS110 utility {0:?} is not installed.
    MissingExecutable(PathBuf),

    /// {tool} failed: {output}
    Failed {
        /// The utility which failed.
        tool: &'static str,
        /// What the utility printed.
        output: String,
    },

    /// The XDS110 utility could not be run.
    Io(#[from] std::io::Error),
}

fn tool(installation: &Installation, name: &str) -> Result<PathBuf, Xds110Error> {
    let dir = installation.base_dir().join(XDS110_DIRECTORY);
    if !dir.is_dir() {
        return Err(Xds110Error::MissingDirectory(dir));
    }

    let executable = dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX));
    if !executable.is_file() {
        return Err(Xds110Error::MissingExecutable(executable));
    }

    Ok(executable)
}

async fn run(tool: &'static str, executable: &Path, args: &[&str]) -> Result<String, Xds110Error> {
    tracing::debug!("Running {} {}", executable.display(), args.join(" "));

    let Output { status, stdout, .. } = Command::new(executable).args(args).output().await?;
    let output = String::from_utf8_lossy(&stdout).into_owned();

    if !status.success() {
        return Err(Xds110Error::Failed {
            tool,
            output: output.trim().to_string(),
        });
    }

    Ok(output)
}

/// The serial numbers of all XDS110 probes connected to the host.
pub async fn list(installation: &Installation) -> Result<Vec<String>, Xds110Error> {
    let executable = tool(installation, LIST_TOOL)?;
    let output = run(LIST_TOOL, &executable, &["-e"]).await?;

    Ok(SERIAL_NUMBER
        .captures_iter(&output)
        .map(|captures| captures[1].to_string())
        .collect())
}

/// Resets the probe with `serial`, or the first probe found.
pub async fn reset(installation: &Installation, serial: Option<&str>) -> Result<(), Xds110Error> {
    let executable = tool(installation, RESET_TOOL)?;
    let args = match serial {
        Some(serial) => vec!["-s", serial],
        None => Vec::new(),
    };
    run(RESET_TOOL, &executable, &args).await.map(|_| ())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::installation::fake_installation;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn with_tool(name: &str, script: &str) -> (tempfile::TempDir, Installation) {
        let dir = tempfile::tempdir().unwrap();
        let installation = Installation::open(fake_installation(dir.path(), "12.5.0")).unwrap();
        let tools = installation.base_dir().join(XDS110_DIRECTORY);
        fs::create_dir_all(&tools).unwrap();
        let path = tools.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, installation)
    }

    #[tokio::test]
    async fn lists_serial_numbers() {
        let (_dir, installation) = with_tool(
            LIST_TOOL,
            "#!/bin/sh\necho 'Found 2 devices.'\necho '  Serial Num:   L4000123'\necho '  Serial Num:   M4001234'\n",
        );

        assert_eq!(list(&installation).await.unwrap(), vec!["L4000123", "M4001234"]);
    }

    #[tokio::test]
    async fn failing_reset_carries_the_output() {
        let (_dir, installation) = with_tool(RESET_TOOL, "#!/bin/sh\necho \"no probe $2\"\nexit 1\n");

        match reset(&installation, Some("L4000123")).await {
            Err(Xds110Error::Failed { tool, output }) => {
                assert_eq!(tool, RESET_TOOL);
                assert_eq!(output, "no probe L4000123");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_tools_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let installation = Installation::open(fake_installation(dir.path(), "12.5.0")).unwrap();

        assert!(matches!(
            list(&installation).await,
            Err(Xds110Error::MissingDirectory(_))
        ));
    }
}
