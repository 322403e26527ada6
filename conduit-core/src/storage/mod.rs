/*!
Backend clients for connector I/O.

This module defines the backend abstraction (port) every connector talks to
and its concrete implementations (adapters). The connector and the format
dispatcher only ever see [`BackendClient`], so adding a backend means adding
an adapter here and an entry in the registry.
*/

#[cfg(feature = "gcs")]
pub mod gcs;
pub mod local;
#[cfg(feature = "managed-content")]
pub mod managed_content;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use conduit_retry::{retry_blocking_notify, RetryPolicy};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::change::Fingerprint;
use crate::Result;

/// Acknowledgement returned by a successful persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Backend key the payload was written under
    pub key: String,
    /// Encoded payload size
    pub bytes: usize,
    /// MIME type sent with the payload
    pub content_type: String,
}

/// What a load does when the backend has nothing under the key
///
/// Each backend family documents its own choice; the connector applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingResource {
    /// Missing or zero-length resources load as the empty-table sentinel
    EmptyResult,
    /// Missing or zero-length resources fail with `ResourceNotFound`
    NotFound,
}

/// Byte-level access to one backend
///
/// Implementations are blocking and must bound their own network calls,
/// surfacing an elapsed deadline as `ConnectorError::Timeout`. A missing key
/// is reported as `ConnectorError::ResourceNotFound` by `read`, `delete` and
/// the default `fingerprint`.
#[cfg_attr(test, mockall::automock)]
pub trait BackendClient: Send + Sync {
    /// Short backend label used in logs and metrics
    fn name(&self) -> &'static str;

    /// Fetch the full payload stored under `key`
    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous payload
    fn write(&self, key: &str, data: &[u8], content_type: &str) -> Result<()>;

    /// Whether anything is stored under `key`
    fn exists(&self, key: &str) -> Result<bool>;

    /// Remove the payload stored under `key`
    fn delete(&self, key: &str) -> Result<()>;

    /// Cheap summary of the current state of `key`
    ///
    /// The default hashes the full payload; backends with native metadata
    /// (etags, modification times) should override it.
    fn fingerprint(&self, key: &str) -> Result<Fingerprint> {
        match self.read(key) {
            Ok(data) => Ok(Fingerprint::Etag(content_etag(&data))),
            Err(e) if e.is_not_found() => Ok(Fingerprint::Absent),
            Err(e) => Err(e),
        }
    }
}

/// Hex SHA-256 of a payload
pub fn content_etag(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Wraps a client so reads and writes are retried on transient failures
///
/// Probes (`exists`, `delete`, `fingerprint`) go straight through.
pub struct RetryingClient<'a> {
    inner: &'a dyn BackendClient,
    policy: &'a RetryPolicy,
}

impl<'a> RetryingClient<'a> {
    pub fn new(inner: &'a dyn BackendClient, policy: &'a RetryPolicy) -> Self {
        Self { inner, policy }
    }

    fn on_retry(&self, verb: &'static str) -> impl FnMut(usize, &crate::ConnectorError) + '_ {
        move |attempt: usize, error: &crate::ConnectorError| {
            warn!(
                backend = self.inner.name(),
                verb,
                attempt,
                error = %error,
                "Transient backend failure"
            );
            #[cfg(feature = "metrics")]
            crate::observability::ConnectorMetrics::global().record_retry(self.inner.name(), verb);
        }
    }
}

impl BackendClient for RetryingClient<'_> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        retry_blocking_notify("read", self.policy, |_| self.inner.read(key), self.on_retry("read"))
    }

    fn write(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        retry_blocking_notify(
            "write",
            self.policy,
            |_| self.inner.write(key, data, content_type),
            self.on_retry("write"),
        )
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn fingerprint(&self, key: &str) -> Result<Fingerprint> {
        self.inner.fingerprint(key)
    }
}

#[cfg(feature = "gcs")]
pub use gcs::GcsClient;
pub use local::LocalFileClient;
#[cfg(feature = "managed-content")]
pub use managed_content::ManagedContentClient;
pub use memory::MemoryClient;
#[cfg(feature = "s3")]
pub use s3::S3Client;
