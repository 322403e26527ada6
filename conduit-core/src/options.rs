//! Typed per-family options parsed once from a contract's merged option view

use tracing::warn;

use crate::contract::{Options, FILE_TYPE_KEY};
use crate::format::{CodecOptions, FormatType};
use crate::{ConnectorError, Result};

/// Keys owned by the managed content family; never handed to codecs
pub const MANAGED_CONTENT_KEYS: [&str; 3] = ["token", "api_endpoint", "project"];

/// Options understood by file-like backends and their codecs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOptions {
    /// Explicit format, overriding the path extension
    pub file_type: Option<FormatType>,
    pub delimiter: u8,
    pub has_headers: bool,
    pub as_table: bool,
    /// Number of rotated copies kept by `rotate_backups`
    pub max_backups: usize,
}

impl Default for FileOptions {
    fn default() -> Self {
        FileOptions {
            file_type: None,
            delimiter: b',',
            has_headers: true,
            as_table: false,
            max_backups: 10,
        }
    }
}

impl FileOptions {
    /// Parse from a merged option map
    ///
    /// Unknown keys are logged and ignored. A `file_type` naming no known
    /// format is left for the dispatcher to reject, so the error names the
    /// resource.
    pub fn from_options(options: &Options) -> Result<Self> {
        let mut parsed = FileOptions::default();
        for (key, value) in options {
            match key.as_str() {
                FILE_TYPE_KEY => parsed.file_type = FormatType::from_name(value),
                "delimiter" | "sep" => parsed.delimiter = parse_delimiter(value)?,
                "has_headers" | "header" => parsed.has_headers = parse_bool(key, value)?,
                "as_table" => parsed.as_table = parse_bool(key, value)?,
                "max_backups" => {
                    parsed.max_backups = value.parse().map_err(|_| {
                        ConnectorError::validation(format!("max_backups must be a non-negative integer, got '{value}'"))
                    })?
                }
                k if MANAGED_CONTENT_KEYS.contains(&k) => {}
                other => warn!(option = %other, "Ignoring unrecognised option"),
            }
        }
        Ok(parsed)
    }

    pub fn codec_options(&self, gzip_level: u32) -> CodecOptions {
        CodecOptions {
            delimiter: self.delimiter,
            has_headers: self.has_headers,
            as_table: self.as_table,
            gzip_level,
        }
    }
}

/// Options of the managed content family
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ManagedContentOptions {
    /// Explicit bearer token, fed to the `explicit-arg` credential source
    pub token: Option<String>,
    /// Explicit API endpoint, fed to the `explicit-arg` credential source
    pub api_endpoint: Option<String>,
    pub project: Option<String>,
}

impl std::fmt::Debug for ManagedContentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedContentOptions")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("api_endpoint", &self.api_endpoint)
            .field("project", &self.project)
            .finish()
    }
}

impl ManagedContentOptions {
    /// Take the managed content keys out of `options`, leaving the rest for codecs
    pub fn split(options: &Options) -> (ManagedContentOptions, Options) {
        let mut rest = options.clone();
        let parsed = ManagedContentOptions {
            token: rest.remove("token").filter(|v| !v.is_empty()),
            api_endpoint: rest.remove("api_endpoint").filter(|v| !v.is_empty()),
            project: rest.remove("project").filter(|v| !v.is_empty()),
        };
        (parsed, rest)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConnectorError::validation(format!(
            "{key} must be a boolean, got '{value}'"
        ))),
    }
}

fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "\\t" | "tab" => Ok(b'\t'),
        v if v.len() == 1 && v.is_ascii() => Ok(v.as_bytes()[0]),
        v => Err(ConnectorError::validation(format!(
            "delimiter must be a single ASCII character, got '{v}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let parsed = FileOptions::from_options(&Options::new()).unwrap();
        assert_eq!(parsed, FileOptions::default());
        assert_eq!(parsed.delimiter, b',');
        assert!(parsed.has_headers);
        assert_eq!(parsed.max_backups, 10);
    }

    #[test]
    fn test_typed_values() {
        let parsed = FileOptions::from_options(&opts(&[
            ("file_type", "YAML"),
            ("sep", "\\t"),
            ("has_headers", "false"),
            ("as_table", "yes"),
            ("max_backups", "3"),
            ("something_else", "ignored"),
        ]))
        .unwrap();
        assert_eq!(parsed.file_type, Some(FormatType::Yaml));
        assert_eq!(parsed.delimiter, b'\t');
        assert!(!parsed.has_headers);
        assert!(parsed.as_table);
        assert_eq!(parsed.max_backups, 3);
    }

    #[test]
    fn test_malformed_values_fail_validation() {
        for bad in [
            opts(&[("has_headers", "maybe")]),
            opts(&[("delimiter", ";;")]),
            opts(&[("max_backups", "-1")]),
        ] {
            assert!(matches!(
                FileOptions::from_options(&bad),
                Err(ConnectorError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_managed_content_split_strips_keys() {
        let (mc, rest) = ManagedContentOptions::split(&opts(&[
            ("token", "t0k"),
            ("api_endpoint", "https://api.example"),
            ("project", "demo"),
            ("file_type", "json"),
        ]));
        assert_eq!(mc.token.as_deref(), Some("t0k"));
        assert_eq!(mc.api_endpoint.as_deref(), Some("https://api.example"));
        assert_eq!(mc.project.as_deref(), Some("demo"));
        assert_eq!(rest, opts(&[("file_type", "json")]));
        assert!(!format!("{mc:?}").contains("t0k"));
    }
}
