/*!
Local filesystem backend.
*/

use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::BackendClient;
use crate::change::Fingerprint;
use crate::{ConnectorError, Result};

/// Local filesystem client
///
/// Keys are file paths. Relative keys resolve against the base directory when
/// one is set, otherwise against the working directory. Parent directories
/// are created on write.
///
/// # Example
/// ```rust
/// use conduit_core::storage::{BackendClient, LocalFileClient};
///
/// let dir = tempfile::tempdir()?;
/// let client = LocalFileClient::with_base_dir(dir.path());
/// client.write("reports/daily.csv", b"a,b\n1,2\n", "text/csv")?;
/// assert!(client.exists("reports/daily.csv")?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalFileClient {
    base_dir: Option<PathBuf>,
}

impl LocalFileClient {
    /// Client that uses keys as-is
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Client that resolves relative keys under `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(key),
            None => PathBuf::from(key),
        }
    }

    fn ensure_parent_dir(&self, key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ConnectorError::backend(
                        "write",
                        key,
                        format!("failed to create directory {}: {e}", parent.display()),
                    )
                })?;
            }
        }
        Ok(())
    }
}

fn map_io_error(verb: &'static str, key: &str, path: &Path, error: std::io::Error) -> ConnectorError {
    match error.kind() {
        ErrorKind::NotFound => ConnectorError::not_found(verb, key),
        ErrorKind::TimedOut => ConnectorError::Timeout {
            verb,
            key: key.to_string(),
        },
        ErrorKind::Interrupted | ErrorKind::WouldBlock => {
            ConnectorError::unavailable(verb, key, format!("{}: {error}", path.display()))
        }
        _ => ConnectorError::backend(verb, key, format!("{}: {error}", path.display())),
    }
}

impl BackendClient for LocalFileClient {
    fn name(&self) -> &'static str {
        "local"
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve_path(key);
        let data = fs::read(&path).map_err(|e| map_io_error("read", key, &path, e))?;
        debug!(path = %path.display(), size = data.len(), "Read local file");
        Ok(data)
    }

    fn write(&self, key: &str, data: &[u8], _content_type: &str) -> Result<()> {
        let path = self.resolve_path(key);
        self.ensure_parent_dir(key, &path)?;
        fs::write(&path, data).map_err(|e| map_io_error("write", key, &path, e))?;
        debug!(path = %path.display(), size = data.len(), "Wrote local file");
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve_path(key);
        path.try_exists()
            .map(|found| found && path.is_file())
            .map_err(|e| map_io_error("exists", key, &path, e))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve_path(key);
        fs::remove_file(&path).map_err(|e| map_io_error("delete", key, &path, e))
    }

    fn fingerprint(&self, key: &str) -> Result<Fingerprint> {
        let path = self.resolve_path(key);
        match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => Ok(Fingerprint::Modified(DateTime::<Utc>::from(modified))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Fingerprint::Absent),
            Err(e) => Err(map_io_error("fingerprint", key, &path, e)),
        }
    }
}
