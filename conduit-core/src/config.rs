//! Configuration for backend construction and credential resolution
//!
//! [`ConnectorConfig`] is built once (defaults, or a JSON file) and handed to
//! the backend registry. Per-contract options live in [`crate::options`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use conduit_retry::RetryPolicy;

use crate::credentials::ResolutionSource;
use crate::{ConnectorError, Result};

/// Environment variable read by the `local-process-env` token source
pub const DEFAULT_TOKEN_ENV_VAR: &str = "API_TOKEN";
/// Environment variable read by the `local-process-env` endpoint source
pub const DEFAULT_ENDPOINT_ENV_VAR: &str = "API_ENDPOINT";
/// Environment variable read by the `daemon-sidecar-env` token source
pub const DEFAULT_DAEMON_TOKEN_ENV_VAR: &str = "startup.token";
/// Fixed endpoint returned by the `daemon-sidecar-env` source
pub const DEFAULT_DAEMON_ENDPOINT: &str = "http://content-gateway.default.svc.cluster.local:8000";

/// Credential resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Source names tried in order when resolving a token
    pub token_order: Vec<String>,
    /// Source names tried in order when resolving an endpoint
    pub endpoint_order: Vec<String>,
    pub token_env_var: String,
    pub endpoint_env_var: String,
    pub daemon_token_env_var: String,
    pub daemon_endpoint: String,
    /// Profile file; defaults to `~/.conduit/config`
    pub profile_path: Option<PathBuf>,
    /// Profile to read; defaults to the file's `currentProfile`
    pub profile_name: Option<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        let order: Vec<String> = ResolutionSource::DEFAULT_ORDER
            .iter()
            .map(|source| source.to_string())
            .collect();
        CredentialConfig {
            token_order: order.clone(),
            endpoint_order: order,
            token_env_var: DEFAULT_TOKEN_ENV_VAR.to_string(),
            endpoint_env_var: DEFAULT_ENDPOINT_ENV_VAR.to_string(),
            daemon_token_env_var: DEFAULT_DAEMON_TOKEN_ENV_VAR.to_string(),
            daemon_endpoint: DEFAULT_DAEMON_ENDPOINT.to_string(),
            profile_path: None,
            profile_name: None,
        }
    }
}

/// Transfer behaviour shared by every backend client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Retries on transient upload/download failures; `None` keeps the adapter default
    pub retries: Option<usize>,
    /// Deadline applied by network clients to each request
    pub timeout_secs: u64,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            retries: None,
            timeout_secs: 30,
            initial_backoff_ms: 100,
        }
    }
}

impl TransferConfig {
    /// Retry policy for an adapter whose own default is `family_default` retries
    pub fn retry_policy(&self, family_default: usize) -> RetryPolicy {
        RetryPolicy::with_retries(self.retries.unwrap_or(family_default))
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local filesystem backend settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Base directory for relative paths (defaults to the working directory)
    pub base_path: Option<PathBuf>,
}

/// Amazon S3 backend settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// AWS region (defaults to the environment)
    pub region: Option<String>,
    /// Custom endpoint, e.g. a LocalStack or MinIO URL
    pub endpoint_url: Option<String>,
}

/// Google Cloud Storage backend settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    /// Prefix prepended to every object key
    pub prefix: Option<String>,
}

/// Top-level configuration handed to the backend registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub credentials: CredentialConfig,
    pub transfer: TransferConfig,
    pub local: LocalConfig,
    pub s3: S3Config,
    pub gcs: GcsConfig,
    /// Gzip compression level (0-9)
    pub gzip_level: u32,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            credentials: CredentialConfig::default(),
            transfer: TransferConfig::default(),
            local: LocalConfig::default(),
            s3: S3Config::default(),
            gcs: GcsConfig::default(),
            gzip_level: 6,
        }
    }
}

impl ConnectorConfig {
    /// Configuration rooted at a base directory for local contracts
    pub fn with_local_base<P: AsRef<Path>>(base: P) -> Self {
        let mut config = Self::default();
        config.local.base_path = Some(base.as_ref().to_path_buf());
        config
    }

    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ConnectorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.gzip_level > 9 {
            return Err(ConnectorError::validation(format!(
                "gzip_level must be between 0 and 9, got {}",
                self.gzip_level
            )));
        }
        if self.transfer.timeout_secs == 0 {
            return Err(ConnectorError::validation("transfer.timeout_secs must be positive"));
        }
        for name in self
            .credentials
            .token_order
            .iter()
            .chain(self.credentials.endpoint_order.iter())
        {
            name.parse::<ResolutionSource>()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConnectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gzip_level, 6);
        assert_eq!(config.transfer.timeout_secs, 30);
        assert_eq!(config.credentials.token_env_var, "API_TOKEN");
        assert_eq!(config.credentials.token_order.len(), 5);
        assert_eq!(config.credentials.token_order[0], "explicit-arg");
    }

    #[test]
    fn test_retry_policy_uses_family_default_unless_overridden() {
        let mut transfer = TransferConfig::default();
        assert_eq!(transfer.retry_policy(2).max_retries, 2);
        assert_eq!(transfer.retry_policy(0).max_retries, 0);

        transfer.retries = Some(5);
        assert_eq!(transfer.retry_policy(2).max_retries, 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ConnectorConfig::default();
        config.gzip_level = 12;
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.transfer.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ConnectorConfig::default();
        config.credentials.token_order = vec!["vault".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConnectorError::UnknownResolutionSource(_))
        ));
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"gzip_level": 9, "transfer": {{"retries": 1}}, "local": {{"base_path": "/srv/data"}}}}"#
        )
        .unwrap();

        let config = ConnectorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.gzip_level, 9);
        assert_eq!(config.transfer.retries, Some(1));
        assert_eq!(config.transfer.timeout_secs, 30);
        assert_eq!(config.local.base_path, Some(PathBuf::from("/srv/data")));
        assert_eq!(config.credentials, CredentialConfig::default());
    }

    #[test]
    fn test_with_local_base() {
        let config = ConnectorConfig::with_local_base("/tmp/conduit");
        assert_eq!(config.local.base_path, Some(PathBuf::from("/tmp/conduit")));
    }
}
