//! Reading and patching target configuration (`.ccxml`) documents.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::DeviceCatalog;

const PROBE_SELECTION: &str = "Debug Probe Selection";
const POD_PORT: &str = "SEPK.POD_PORT";
const POD_SERIAL: &str = "SEPK.POD_SERIAL";
const SERIAL_CHOICE: &str = "Select by serial number";

static INSTANCE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_\d+$").unwrap());

/// An error which can occur while reading or patching a target configuration.
#[derive(thiserror::Error, docsplay::Display, Debug)]
pub enum CcxmlError {
    /// The document is not valid XML.
    Parse(#[from] roxmltree::Error),

    /// The target configuration has no {0} element.
    MissingElement(&'static str),

    /// The connection does not support selecting the debug probe by serial number.
    NoSerialSupport,

    /// The connection descriptor {0} is not installed.
    MissingDescriptor(String),
}

/// The identity recorded in a target configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedConfig {
    /// The serial number of the selected debug probe, if the file selects one.
    pub serial_number: Option<String>,
    /// The device family, without its instance suffix.
    pub device_family: Option<String>,
    /// The connection type, without its instance suffix.
    pub connection_type: Option<String>,
    /// The file name of the connection descriptor the configuration was built from.
    pub connection_xml: Option<String>,
    /// The file name of the device descriptor the configuration was built from.
    pub device_xml: Option<String>,
}

impl PersistedConfig {
    /// Reads the identity out of a target configuration document.
    pub fn parse(xml: &str) -> Result<Self, CcxmlError> {
        let doc = roxmltree::Document::parse(xml)?;

        let serial_number = doc
            .descendants()
            .find(|node| is_probe_selection(node))
            .and_then(|selection| {
                selection
                    .descendants()
                    .skip(1)
                    .find(|node| node.has_tag_name("property"))
            })
            .and_then(|property| property.attribute("Value"))
            .filter(|serial| !serial.is_empty())
            .map(str::to_string);

        let device = instance(&doc, "devices");
        let connection = instance(&doc, "connections");

        Ok(Self {
            serial_number,
            device_family: device.and_then(instance_name),
            connection_type: connection.and_then(instance_name),
            connection_xml: connection
                .and_then(|node| node.attribute("xml"))
                .map(str::to_string),
            device_xml: device
                .and_then(|node| node.attribute("xml"))
                .map(str::to_string),
        })
    }

    /// Replaces the names taken from the instance ids with the ones in the
    /// descriptors the configuration references, where `catalog` has them.
    pub fn named_by(mut self, catalog: &dyn DeviceCatalog) -> Self {
        if let Some(name) = self.device_xml.as_deref().and_then(|file| catalog.device_name(file)) {
            self.device_family = Some(name);
        }
        if let Some(name) = self
            .connection_xml
            .as_deref()
            .and_then(|file| catalog.connection_name(file))
        {
            self.connection_type = Some(name);
        }
        self
    }
}

fn is_probe_selection(node: &roxmltree::Node) -> bool {
    node.has_tag_name("property") && node.attribute("id") == Some(PROBE_SELECTION)
}

fn instance<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
    xmlpath: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    doc.descendants()
        .find(|node| node.has_tag_name("instance") && node.attribute("xmlpath") == Some(xmlpath))
}

fn instance_name(node: roxmltree::Node) -> Option<String> {
    node.attribute("id")
        .map(|id| INSTANCE_SUFFIX.replace(id, "").into_owned())
}

/// Selects the debug probe with `serial` in a target configuration document.
///
/// The selection property is derived from the connection `descriptor`. An
/// existing selection is replaced, otherwise the property is inserted in front
/// of the `platform` element. The rest of the document is left untouched.
pub fn patch_serial(ccxml: &str, descriptor: &str, serial: &str) -> Result<String, CcxmlError> {
    let property = serial_property(descriptor, serial)?;
    let doc = roxmltree::Document::parse(ccxml)?;

    let mut patched = String::with_capacity(ccxml.len() + property.len());

    if let Some(existing) = doc.descendants().find(|node| is_probe_selection(node)) {
        let range = existing.range();
        patched.push_str(&ccxml[..range.start]);
        patched.push_str(&property);
        patched.push_str(&ccxml[range.end..]);
    } else {
        let platform = doc
            .descendants()
            .find(|node| node.has_tag_name("platform"))
            .ok_or(CcxmlError::MissingElement("platform"))?;
        let start = platform.range().start;
        let indent = indentation(ccxml, start);

        patched.push_str(&ccxml[..start]);
        patched.push_str(&property);
        patched.push('\n');
        patched.push_str(indent);
        patched.push_str(&ccxml[start..]);
    }

    Ok(patched)
}

/// The whitespace in front of the element at `start`, if it starts its line.
fn indentation(text: &str, start: usize) -> &str {
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &text[line_start..start];
    if prefix.chars().all(char::is_whitespace) {
        prefix
    } else {
        ""
    }
}

fn serial_property(descriptor: &str, serial: &str) -> Result<String, CcxmlError> {
    let doc = roxmltree::Document::parse(descriptor)?;

    let port = doc
        .descendants()
        .find(|node| node.has_tag_name("property") && node.attribute("ID") == Some(POD_PORT))
        .ok_or(CcxmlError::NoSerialSupport)?;
    let has_serial_field = port
        .children()
        .filter(|node| is_serial_choice(node))
        .flat_map(|choice| choice.descendants())
        .any(|node| node.has_tag_name("property") && node.attribute("ID") == Some(POD_SERIAL));
    if !has_serial_field {
        return Err(CcxmlError::NoSerialSupport);
    }

    let mut out = String::new();
    write_element(&mut out, port, serial);
    Ok(out)
}

fn is_serial_choice(node: &roxmltree::Node) -> bool {
    node.has_tag_name("choice") && node.attribute("Name") == Some(SERIAL_CHOICE)
}

fn write_element(out: &mut String, node: roxmltree::Node, serial: &str) {
    let tag = node.tag_name().name();
    let is_port = node.attribute("ID") == Some(POD_PORT);

    out.push('<');
    out.push_str(tag);
    for (name, value) in attributes(node, serial) {
        let _ = write!(out, " {name}=\"{}\"", escape(&value));
    }

    let children = node
        .children()
        .filter(|child| child.is_element())
        .filter(|child| !is_port || !child.has_tag_name("choice") || is_serial_choice(child))
        .collect::<Vec<_>>();

    if children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');
    for child in children {
        write_element(out, child, serial);
    }
    let _ = write!(out, "</{tag}>");
}

/// The attributes of `node` as they appear in a target configuration.
///
/// Descriptor properties identify themselves by `ID` and `Name`, while
/// configuration properties only carry an `id` holding the name.
fn attributes(node: roxmltree::Node, serial: &str) -> Vec<(String, String)> {
    let value = match node.attribute("ID") {
        Some(POD_PORT) => "1",
        Some(POD_SERIAL) => serial,
        _ => {
            return node
                .attributes()
                .map(|a| (a.name().to_string(), a.value().to_string()))
                .collect()
        }
    };

    let mut attributes = node
        .attributes()
        .filter(|a| !matches!(a.name(), "ID" | "Name" | "desc" | "id" | "Value"))
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect::<Vec<_>>();
    attributes.push(("Value".to_string(), value.to_string()));
    if let Some(name) = node.attribute("Name") {
        attributes.push(("id".to_string(), name.to_string()));
    }
    attributes
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// A minimal target configuration as the engine generates it, for tests.
#[cfg(test)]
pub(crate) fn generated_ccxml(device_family: &str, connection_type: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<configurations XML_version="1.2" id="configurations_0">
    <configuration XML_version="1.2" id="{connection_type}_0">
        <instance XML_version="1.2" desc="{connection_type}_0" href="connections/TIXDS110_Connection.xml" id="{connection_type}_0" xml="TIXDS110_Connection.xml" xmlpath="connections"/>
        <connection XML_version="1.2" id="{connection_type}_0">
            <instance XML_version="1.2" href="drivers/tixds510cs_dap.xml" id="drivers" xml="tixds510cs_dap.xml" xmlpath="drivers"/>
            <platform XML_version="1.2" id="platform_0">
                <instance XML_version="1.2" desc="{device_family}_0" href="devices/{device_family}.xml" id="{device_family}_0" xml="{device_family}.xml" xmlpath="devices"/>
            </platform>
        </connection>
    </configuration>
</configurations>
"#
    )
}
