/*!
Error types for the conduit core.
*/

use conduit_retry::RetryableError;
use thiserror::Error;

/// Result type used throughout the conduit core.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors surfaced by contract parsing, credential resolution and the connector verbs.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Contract is missing required fields or has the wrong shape for the verb
    #[error("Invalid connector contract '{uri}': {reason}")]
    InvalidContract { uri: String, reason: String },

    /// A `${NAME}` placeholder referenced an unset variable
    #[error("Environment variable '{0}' is not set")]
    MissingEnvironmentVariable(String),

    /// Credential resolution order named a source that does not exist
    #[error("Unknown credential resolution source '{0}'")]
    UnknownResolutionSource(String),

    /// The backend has no resource under the key
    #[error("Resource not found during {verb}: {key}")]
    ResourceNotFound { key: String, verb: &'static str },

    /// Requested or inferred file type is outside the adapter's supported set
    #[error("Unsupported format '{format}' for {key}")]
    UnsupportedFormat { format: String, key: String },

    /// Transient backend failure (network, 5xx, throttling)
    #[error("Backend unavailable during {verb} of {key}: {reason}")]
    BackendUnavailable {
        verb: &'static str,
        key: String,
        reason: String,
    },

    /// The backend did not answer within the configured deadline
    #[error("Timed out during {verb} of {key}")]
    Timeout { verb: &'static str, key: String },

    /// Permanent backend failure (access denied, bad bucket, ...)
    #[error("Backend error during {verb} of {key}: {reason}")]
    Backend {
        verb: &'static str,
        key: String,
        reason: String,
    },

    /// Payload bytes do not match the resolved format
    #[error("Failed to decode {key} as {format}: {reason}")]
    Decode {
        key: String,
        format: String,
        reason: String,
    },

    /// Record could not be serialized in the resolved format
    #[error("Failed to encode {key} as {format}: {reason}")]
    Encode {
        key: String,
        format: String,
        reason: String,
    },

    /// Typed option or configuration value failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// I/O errors outside a verb (configuration files, profiles)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors outside a verb (configuration files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConnectorError {
    /// Create a new invalid contract error
    pub fn invalid_contract<U: Into<String>, R: Into<String>>(uri: U, reason: R) -> Self {
        Self::InvalidContract {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<F: Into<String>, K: Into<String>>(format: F, key: K) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
            key: key.into(),
        }
    }

    /// Create a new not-found error
    pub fn not_found<K: Into<String>>(verb: &'static str, key: K) -> Self {
        Self::ResourceNotFound {
            key: key.into(),
            verb,
        }
    }

    /// Create a new transient backend error
    pub fn unavailable<K: Into<String>, R: Into<String>>(verb: &'static str, key: K, reason: R) -> Self {
        Self::BackendUnavailable {
            verb,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a new permanent backend error
    pub fn backend<K: Into<String>, R: Into<String>>(verb: &'static str, key: K, reason: R) -> Self {
        Self::Backend {
            verb,
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True for failures worth retrying on transfer paths
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. } | Self::Timeout { .. })
    }

    /// True when the error means the resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}

impl RetryableError for ConnectorError {
    fn is_transient(&self) -> bool {
        ConnectorError::is_transient(self)
    }
}

/// Failure raised inside a codec, before the dispatcher attaches key and format
#[derive(Error, Debug)]
#[error("{0}")]
pub struct CodecError(pub String);

impl CodecError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self(msg.into())
    }
}

impl From<csv::Error> for CodecError {
    fn from(err: csv::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_yaml::Error> for CodecError {
    fn from(err: serde_yaml::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
