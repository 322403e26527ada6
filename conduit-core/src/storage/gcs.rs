/*!
Google Cloud Storage backend.

Wraps the Google Cloud Storage client library on a private Tokio runtime and
exposes it through the blocking [`BackendClient`] interface.
*/

use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::BackendClient;
use crate::change::Fingerprint;
use crate::config::{GcsConfig, TransferConfig};
use crate::{ConnectorError, Result};

/// GCS client bound to one bucket
///
/// # Authentication
/// Uses the default GCP credential chain: `GOOGLE_APPLICATION_CREDENTIALS`,
/// then the metadata server of the compute instance, then gcloud user
/// credentials.
pub struct GcsClient {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    timeout: Duration,
    runtime: Arc<Runtime>,
}

impl GcsClient {
    /// Build a client for `bucket`
    ///
    /// # Errors
    /// Fails when the runtime cannot be created or authentication fails.
    pub fn new(bucket: impl Into<String>, config: &GcsConfig, transfer: &TransferConfig) -> Result<Self> {
        let bucket = bucket.into();
        let runtime = Runtime::new().map_err(|e| {
            ConnectorError::backend("connect", &bucket, format!("failed to create async runtime: {e}"))
        })?;

        let client_config = runtime
            .block_on(async { ClientConfig::default().with_auth().await })
            .map_err(|e| ConnectorError::backend("connect", &bucket, format!("GCS authentication failed: {e}")))?;

        info!(bucket = %bucket, prefix = ?config.prefix, "Initialized GCS client");

        Ok(GcsClient {
            client: Client::new(client_config),
            bucket,
            prefix: config.prefix.clone(),
            timeout: transfer.timeout(),
            runtime: Arc::new(runtime),
        })
    }

    fn object_path(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) if prefix.ends_with('/') => format!("{prefix}{key}"),
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn block_on<T, F>(&self, verb: &'static str, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, fut)
                .await
                .map_err(|_| ConnectorError::Timeout {
                    verb,
                    key: key.to_string(),
                })?
        })
    }

    /// Object etag, `None` when the object does not exist
    fn head(&self, verb: &'static str, key: &str) -> Result<Option<String>> {
        let object = self.object_path(key);
        self.block_on(verb, key, async {
            let req = GetObjectRequest {
                bucket: self.bucket.clone(),
                object,
                ..Default::default()
            };
            match self.client.get_object(&req).await {
                Ok(found) => Ok(Some(found.etag)),
                Err(e) => match map_gcs_error(verb, &e, key) {
                    err if err.is_not_found() => Ok(None),
                    err => Err(err),
                },
            }
        })
    }
}

impl BackendClient for GcsClient {
    fn name(&self) -> &'static str {
        "gcs"
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let object = self.object_path(key);
        debug!(bucket = %self.bucket, object = %object, "Downloading object from GCS");
        let result = self.block_on("read", key, async {
            let req = GetObjectRequest {
                bucket: self.bucket.clone(),
                object,
                ..Default::default()
            };
            self.client
                .download_object(&req, &Range::default())
                .await
                .map_err(|e| map_gcs_error("read", &e, key))
        });

        if let Err(e) = &result {
            if !e.is_not_found() {
                error!(bucket = %self.bucket, key = %key, error = %e, "Failed to load object from GCS");
            }
        }
        result
    }

    fn write(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        let object = self.object_path(key);
        debug!(bucket = %self.bucket, object = %object, size = data.len(), "Uploading object to GCS");
        let result = self.block_on("write", key, async {
            let req = UploadObjectRequest {
                bucket: self.bucket.clone(),
                ..Default::default()
            };
            let mut media = Media::new(object);
            media.content_type = content_type.to_string().into();
            self.client
                .upload_object(&req, data.to_vec(), &UploadType::Simple(media))
                .await
                .map(|_| ())
                .map_err(|e| map_gcs_error("write", &e, key))
        });

        if let Err(e) = &result {
            error!(bucket = %self.bucket, key = %key, error = %e, "Failed to save object to GCS");
        }
        result
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head("exists", key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let object = self.object_path(key);
        self.block_on("delete", key, async {
            let req = DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object,
                ..Default::default()
            };
            self.client
                .delete_object(&req)
                .await
                .map_err(|e| map_gcs_error("delete", &e, key))
        })
    }

    fn fingerprint(&self, key: &str) -> Result<Fingerprint> {
        Ok(match self.head("fingerprint", key)? {
            Some(etag) if !etag.is_empty() => Fingerprint::Etag(etag),
            Some(_) => Fingerprint::Unknown,
            None => Fingerprint::Absent,
        })
    }
}

/// Classify a GCS error by the status text it carries
fn map_gcs_error(verb: &'static str, error: &google_cloud_storage::http::Error, key: &str) -> ConnectorError {
    classify_gcs_message(verb, &error.to_string(), key)
}

fn classify_gcs_message(verb: &'static str, message: &str, key: &str) -> ConnectorError {
    let lowered = message.to_lowercase();
    if message.contains("404") || lowered.contains("not found") {
        ConnectorError::not_found(verb, key)
    } else if message.contains("403") || message.contains("401") {
        ConnectorError::backend(verb, key, format!("GCS permission denied: {message}"))
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        ConnectorError::Timeout {
            verb,
            key: key.to_string(),
        }
    } else if ["429", "500", "502", "503", "504"].iter().any(|code| message.contains(code))
        || lowered.contains("connection")
        || lowered.contains("network")
    {
        ConnectorError::unavailable(verb, key, format!("GCS transient error: {message}"))
    } else {
        ConnectorError::backend(verb, key, format!("GCS error: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(classify_gcs_message("read", "HTTP status 404: No such object", "k").is_not_found());
        assert!(classify_gcs_message("write", "HTTP status 503", "k").is_transient());
        assert!(classify_gcs_message("write", "connection reset by peer", "k").is_transient());
        assert!(matches!(
            classify_gcs_message("read", "operation timed out", "k"),
            ConnectorError::Timeout { .. }
        ));
        assert!(matches!(
            classify_gcs_message("read", "HTTP status 403: forbidden", "k"),
            ConnectorError::Backend { .. }
        ));
    }
}
