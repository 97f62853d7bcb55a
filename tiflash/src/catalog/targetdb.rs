use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::DeviceCatalog;
use crate::installation::Installation;

const DEVICES_DIRECTORY: &str = "common/targetdb/devices";
const CONNECTIONS_DIRECTORY: &str = "common/targetdb/connections";
const CPUS_DIRECTORY: &str = "common/targetdb/cpus";
const BOARD_IDS_FILE: &str = "cloudagent/src/targetDetection/board_ids.json";

/// The target database shipped with an installation.
///
/// Records are read from disk on every lookup, so drivers installed while a
/// program runs are picked up.
#[derive(Debug, Clone)]
pub struct TargetDb {
    base: PathBuf,
    board_ids: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct BoardId {
    #[serde(rename = "deviceXml")]
    device_xml: Option<String>,
}

#[derive(Debug)]
struct DeviceRecord {
    partnum: String,
    default_connection: Option<String>,
    cpu_xml: Option<String>,
}

impl TargetDb {
    /// The database of `installation`.
    pub fn new(installation: &Installation) -> Self {
        Self::from_base_dir(installation.base_dir())
    }

    /// A database rooted at a `ccs_base` directory.
    pub fn from_base_dir(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            board_ids: None,
        }
    }

    /// Uses a custom serial number prefix table instead of the shipped one.
    pub fn with_board_ids(mut self, path: impl Into<PathBuf>) -> Self {
        self.board_ids = Some(path.into());
        self
    }

    fn board_ids_path(&self) -> PathBuf {
        self.board_ids
            .clone()
            .unwrap_or_else(|| self.base.join(BOARD_IDS_FILE))
    }

    fn device_records(&self) -> impl Iterator<Item = DeviceRecord> {
        xml_files(&self.base.join(DEVICES_DIRECTORY))
            .into_iter()
            .filter_map(|path| with_document(&path, parse_device))
    }

    fn device(&self, device_family: &str) -> Option<DeviceRecord> {
        self.device_records()
            .find(|record| record.partnum.eq_ignore_ascii_case(device_family))
    }
}

impl DeviceCatalog for TargetDb {
    fn device_for_serial(&self, serial: &str) -> Option<String> {
        let path = self.board_ids_path();
        let text = fs::read_to_string(&path)
            .map_err(|error| tracing::debug!("Cannot read {}: {error}", path.display()))
            .ok()?;
        let board_ids: BTreeMap<String, BoardId> = serde_json::from_str(&text)
            .map_err(|error| tracing::debug!("Cannot parse {}: {error}", path.display()))
            .ok()?;

        // The longest matching prefix is the most specific board.
        let device_xml = board_ids
            .iter()
            .filter(|(prefix, _)| serial.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, board)| board.device_xml.as_deref())?;

        let path = self
            .base
            .join(DEVICES_DIRECTORY)
            .join(format!("{device_xml}.xml"));
        let record = with_document(&path, parse_device)?;

        tracing::debug!("Serial number {serial} belongs to a {}", record.partnum);
        Some(record.partnum)
    }

    fn default_connection(&self, device_family: &str) -> Option<String> {
        let file = self.device(device_family)?.default_connection?;
        let path = self.base.join(CONNECTIONS_DIRECTORY).join(file);
        with_document(&path, |doc| element_attribute(doc, "connection", "desc"))
    }

    fn cpu_for_device(&self, device_family: &str) -> Option<String> {
        let file = self.device(device_family)?.cpu_xml?;
        let path = self.base.join(CPUS_DIRECTORY).join(file);
        with_document(&path, |doc| element_attribute(doc, "cpu", "desc"))
    }

    fn connection_descriptor(&self, file_name: &str) -> Option<String> {
        let path = self.base.join(CONNECTIONS_DIRECTORY).join(file_name);
        fs::read_to_string(&path)
            .map_err(|error| tracing::debug!("Cannot read {}: {error}", path.display()))
            .ok()
    }

    fn device_name(&self, file_name: &str) -> Option<String> {
        let path = self.base.join(DEVICES_DIRECTORY).join(file_name);
        with_document(&path, |doc| element_attribute(doc, "device", "partnum"))
    }

    fn connection_name(&self, file_name: &str) -> Option<String> {
        let path = self.base.join(CONNECTIONS_DIRECTORY).join(file_name);
        with_document(&path, |doc| element_attribute(doc, "connection", "desc"))
    }

    fn devices(&self) -> Vec<String> {
        self.device_records().map(|record| record.partnum).collect()
    }

    fn connections(&self) -> Vec<String> {
        names(&self.base.join(CONNECTIONS_DIRECTORY), "connection")
    }

    fn cpus(&self) -> Vec<String> {
        names(&self.base.join(CPUS_DIRECTORY), "cpu")
    }
}

fn xml_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!("Cannot list {}: {error}", dir.display());
            return Vec::new();
        }
    };

    let mut files = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "xml"))
        .collect::<Vec<_>>();
    files.sort();
    files
}

fn names(dir: &Path, tag: &str) -> Vec<String> {
    xml_files(dir)
        .iter()
        .filter_map(|path| with_document(path, |doc| element_attribute(doc, tag, "desc")))
        .collect()
}

/// Parses the file at `path` and applies `f`, skipping files which are not XML.
fn with_document<T>(path: &Path, f: impl FnOnce(&roxmltree::Document) -> Option<T>) -> Option<T> {
    let text = fs::read_to_string(path)
        .map_err(|error| tracing::debug!("Cannot read {}: {error}", path.display()))
        .ok()?;
    let document = roxmltree::Document::parse(&text)
        .map_err(|error| tracing::debug!("Skipping {}: {error}", path.display()))
        .ok()?;
    f(&document)
}

fn element_attribute(doc: &roxmltree::Document, tag: &str, attribute: &str) -> Option<String> {
    doc.descendants()
        .filter(|node| node.has_tag_name(tag))
        .find_map(|node| node.attribute(attribute))
        .map(str::to_string)
}

fn parse_device(doc: &roxmltree::Document) -> Option<DeviceRecord> {
    let partnum = element_attribute(doc, "device", "partnum")?;

    let default_connection = doc
        .descendants()
        .find(|node| node.has_tag_name("property") && node.attribute("id") == Some("DefaultConnection"))
        .and_then(|node| node.attribute("Value"))
        .map(str::to_string);

    let cpu_xml = doc
        .descendants()
        .find(|node| node.has_tag_name("instance") && node.attribute("xmlpath") == Some("cpus"))
        .and_then(|node| node.attribute("xml"))
        .map(str::to_string);

    Some(DeviceRecord {
        partnum,
        default_connection,
        cpu_xml,
    })
}
