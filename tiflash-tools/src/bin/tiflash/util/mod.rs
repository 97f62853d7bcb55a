pub mod common_options;
pub mod logging;

use std::num::ParseIntError;

pub fn parse_u64(input: &str) -> Result<u64, ParseIntError> {
    parse_int::parse(input)
}

pub fn parse_i64(input: &str) -> Result<i64, ParseIntError> {
    parse_int::parse(input)
}

/// Parses a debug option given as `ID=VALUE`.
pub fn parse_option(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((id, value)) if !id.trim().is_empty() => {
            Ok((id.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("'{input}' is not of the form ID=VALUE")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("0x1000", 4096; "hex")]
    #[test_case("4096", 4096; "decimal")]
    #[test_case("0o20", 16; "octal")]
    fn addresses(input: &str, expected: u64) {
        assert_eq!(parse_u64(input).unwrap(), expected);
    }

    #[test]
    fn negative_values() {
        assert_eq!(parse_i64("-5").unwrap(), -5);
    }

    #[test]
    fn options() {
        assert_eq!(
            parse_option("ResetOnRestart=true").unwrap(),
            ("ResetOnRestart".to_string(), "true".to_string())
        );
        assert_eq!(
            parse_option("Value= a=b ").unwrap(),
            ("Value".to_string(), "a=b".to_string())
        );
        assert!(parse_option("=true").is_err());
        assert!(parse_option("ResetOnRestart").is_err());
    }
}
