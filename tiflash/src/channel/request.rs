use std::fmt;

use crate::Error;

/// Separator between list elements in a response payload.
pub const LIST_SEPARATOR: &str = ";;";

/// One logical request to the debug engine.
///
/// A request is a sequence of operations, each with ordered key-value
/// arguments. On the command line an operation becomes `--<name>` followed by
/// `-<key> <value>` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRequest {
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Operation {
    name: String,
    arguments: Vec<(String, Option<String>)>,
}

impl CommandRequest {
    /// A request for a single operation without arguments.
    pub fn new(operation: impl Into<String>) -> Self {
        Self::default().then(operation)
    }

    /// Appends another operation to the request.
    pub fn then(mut self, operation: impl Into<String>) -> Self {
        self.operations.push(Operation {
            name: operation.into(),
            arguments: Vec::new(),
        });
        self
    }

    /// Adds a `-<key> <value>` argument to the last operation.
    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key.into(), Some(value.to_string()));
        self
    }

    /// Adds a `-<key> <value>` argument to the last operation if `value` is set.
    pub fn arg_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.arg(key, value),
            None => self,
        }
    }

    /// Adds a bare `-<key>` flag to the last operation.
    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.push(key.into(), None);
        self
    }

    /// Adds a `-<key> <a>;;<b>;;...` list argument to the last operation.
    pub fn arg_list<T: ToString>(self, key: impl Into<String>, values: &[T]) -> Self {
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
        self.arg(key, joined)
    }

    fn push(&mut self, key: String, value: Option<String>) {
        if self.operations.is_empty() {
            self.operations.push(Operation {
                name: String::new(),
                arguments: Vec::new(),
            });
        }
        if let Some(operation) = self.operations.last_mut() {
            operation.arguments.push((key, value));
        }
    }

    /// The names of the operations, in order.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.name.as_str())
    }

    /// Appends all operations of `other`.
    pub fn extend(mut self, other: CommandRequest) -> Self {
        self.operations.extend(other.operations);
        self
    }

    /// The request in the engine's argument convention.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for operation in &self.operations {
            if !operation.name.is_empty() {
                args.push(format!("--{}", operation.name));
            }
            for (key, value) in &operation.arguments {
                args.push(format!("-{key}"));
                if let Some(value) = value {
                    args.push(value.clone());
                }
            }
        }
        args
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

/// Whether the engine answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// The worker finished, successfully or not.
    Completed,
    /// No answer arrived in time. The worker may still be running.
    TimedOut,
}

/// The engine's answer to a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Whether the worker reported success.
    pub success: bool,
    /// Whether the engine answered at all.
    pub status: CommandStatus,
    /// The raw result text.
    pub payload: String,
}

impl CommandResponse {
    pub(crate) fn completed(success: bool, payload: String) -> Self {
        Self {
            success,
            status: CommandStatus::Completed,
            payload,
        }
    }

    pub(crate) fn timed_out() -> Self {
        Self {
            success: false,
            status: CommandStatus::TimedOut,
            payload: String::new(),
        }
    }

    /// Returns `true` if the engine reported success.
    pub fn success(&self) -> bool {
        self.success
    }

    /// The payload of a successful response, or the matching error.
    pub fn into_result(self) -> Result<String, Error> {
        match (self.status, self.success) {
            (CommandStatus::TimedOut, _) => Err(Error::Timeout),
            (CommandStatus::Completed, true) => Ok(self.payload),
            (CommandStatus::Completed, false) if self.payload.is_empty() => Err(Error::Command(
                "the worker exited without reporting a result".to_string(),
            )),
            (CommandStatus::Completed, false) => Err(Error::Command(self.payload)),
        }
    }
}

fn malformed(kind: &str, payload: &str) -> Error {
    Error::Command(format!("expected {kind}, got {payload:?}"))
}

/// Parses a `true`/`false` payload, ignoring case.
pub fn parse_bool(payload: &str) -> Result<bool, Error> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(malformed("a boolean", payload)),
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal integer payload.
pub fn parse_number(payload: &str) -> Result<i64, Error> {
    let text = payload.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| malformed("a number", payload))?;

    Ok(if negative { -value } else { value })
}

/// Parses a floating point payload.
pub fn parse_float(payload: &str) -> Result<f64, Error> {
    payload
        .trim()
        .parse()
        .map_err(|_| malformed("a floating point number", payload))
}

/// Splits a list payload into its elements.
pub fn parse_list(payload: &str) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    payload.split(LIST_SEPARATOR).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn nested_arguments_follow_their_operation() {
        let request = CommandRequest::new("session")
            .arg("ccxml", "/tmp/L4000123.ccxml")
            .arg("chip", "CORTEX_M4")
            .then("memory")
            .flag("read")
            .arg("address", 0x2000_0000u32)
            .arg("numBytes", 4);

        assert_eq!(
            request.to_args(),
            vec![
                "--session",
                "-ccxml",
                "/tmp/L4000123.ccxml",
                "-chip",
                "CORTEX_M4",
                "--memory",
                "-read",
                "-address",
                "536870912",
                "-numBytes",
                "4",
            ]
        );
        assert_eq!(request.operations().collect::<Vec<_>>(), vec!["session", "memory"]);
    }

    #[test]
    fn list_arguments_are_joined() {
        let request = CommandRequest::new("memory").arg_list("data", &[1, 2, 255]);
        assert_eq!(request.to_string(), "--memory -data 1;;2;;255");
    }

    #[test]
    fn optional_arguments_are_skipped() {
        let request = CommandRequest::new("flash")
            .arg("image", "fw.hex")
            .arg_opt("address", None::<u32>);
        assert_eq!(request.to_string(), "--flash -image fw.hex");
    }

    #[test_case("true", Ok(true))]
    #[test_case("FALSE", Ok(false))]
    #[test_case("yes", Err(()))]
    fn booleans(payload: &str, expected: Result<bool, ()>) {
        assert_eq!(parse_bool(payload).map_err(|_| ()), expected);
    }

    #[test_case("42", Ok(42))]
    #[test_case("0x20000000", Ok(0x2000_0000))]
    #[test_case("-7", Ok(-7))]
    #[test_case("0xZZ", Err(()))]
    #[test_case("", Err(()))]
    fn numbers(payload: &str, expected: Result<i64, ()>) {
        assert_eq!(parse_number(payload).map_err(|_| ()), expected);
    }

    #[test]
    fn lists_and_floats() {
        assert_eq!(parse_list("PC;;SP;;LR"), vec!["PC", "SP", "LR"]);
        assert!(parse_list("").is_empty());
        assert_eq!(parse_float("1.5").unwrap(), 1.5);
        assert!(matches!(parse_float("abc"), Err(Error::Command(_))));
    }

    #[test]
    fn responses_map_to_errors() {
        assert_eq!(
            CommandResponse::completed(true, "ok".into()).into_result().unwrap(),
            "ok"
        );
        assert!(matches!(
            CommandResponse::completed(false, "Flash failed".into()).into_result(),
            Err(Error::Command(message)) if message == "Flash failed"
        ));
        assert!(matches!(
            CommandResponse::timed_out().into_result(),
            Err(Error::Timeout)
        ));
    }
}
