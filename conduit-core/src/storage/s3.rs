/*!
Amazon S3 backend.

Uses the official AWS SDK on a private Tokio runtime and exposes it through
the blocking [`BackendClient`] interface. Each call is bounded by the
transfer timeout from [`TransferConfig`].
*/

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error, info};

use super::BackendClient;
use crate::change::Fingerprint;
use crate::config::{S3Config, TransferConfig};
use crate::{ConnectorError, Result};

/// S3 client bound to one bucket
///
/// # Authentication
/// Credentials come from the standard AWS provider chain: environment
/// variables, the shared credentials file, then instance or task roles.
///
/// # Example
/// ```rust,no_run
/// use conduit_core::config::{S3Config, TransferConfig};
/// use conduit_core::storage::{BackendClient, S3Client};
///
/// let client = S3Client::new("my-bucket", &S3Config::default(), &TransferConfig::default())?;
/// client.write("reports/daily.csv", b"a,b\n1,2\n", "text/csv")?;
/// # Ok::<(), conduit_core::ConnectorError>(())
/// ```
#[derive(Debug)]
pub struct S3Client {
    client: Client,
    bucket: String,
    timeout: Duration,
    runtime: Arc<Runtime>,
}

impl S3Client {
    /// Build a client for `bucket`
    ///
    /// # Errors
    /// Fails when the runtime cannot be created or no AWS credentials are
    /// available.
    pub fn new(bucket: impl Into<String>, config: &S3Config, transfer: &TransferConfig) -> Result<Self> {
        let bucket = bucket.into();
        let runtime = Runtime::new().map_err(|e| {
            ConnectorError::backend("connect", &bucket, format!("failed to create async runtime: {e}"))
        })?;

        let sdk_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            if let Some(endpoint) = &config.endpoint_url {
                loader = loader.endpoint_url(endpoint);
            }
            loader.load().await
        });

        if sdk_config.credentials_provider().is_none() {
            return Err(ConnectorError::backend(
                "connect",
                &bucket,
                "AWS credentials not found; set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY and AWS_REGION",
            ));
        }

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if config.endpoint_url.is_some() {
            s3_config = s3_config.force_path_style(true);
        }
        let client = Client::from_conf(s3_config.build());

        info!(bucket = %bucket, endpoint = ?config.endpoint_url, "Initialized S3 client");

        Ok(S3Client {
            client,
            bucket,
            timeout: transfer.timeout(),
            runtime: Arc::new(runtime),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run `fut` on the private runtime under the transfer deadline
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

    fn head(&self, verb: &'static str, key: &str) -> Result<Option<Option<String>>> {
        self.block_on(verb, key, async {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => Ok(Some(output.e_tag().map(str::to_string))),
                Err(e) => match map_s3_error(verb, e, key) {
                    err if err.is_not_found() => Ok(None),
                    err => Err(err),
                },
            }
        })
    }
}

impl BackendClient for S3Client {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        debug!(bucket = %self.bucket, key = %key, "Starting S3 get_object");
        let result = self.block_on("read", key, async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_s3_error("read", e, key))?;
            let data = output.body.collect().await.map_err(|e| {
                ConnectorError::unavailable("read", key, format!("failed to read S3 object stream: {e}"))
            })?;
            Ok(data.into_bytes().to_vec())
        });

        match &result {
            Ok(data) => debug!(bucket = %self.bucket, key = %key, size = data.len(), "Loaded object from S3"),
            Err(e) if !e.is_not_found() => {
                error!(bucket = %self.bucket, key = %key, error = %e, "Failed to load object from S3")
            }
            Err(_) => {}
        }
        result
    }

    fn write(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        debug!(bucket = %self.bucket, key = %key, size = data.len(), "Starting S3 put_object");
        let result = self.block_on("write", key, async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| map_s3_error("write", e, key))
        });

        if let Err(e) = &result {
            error!(bucket = %self.bucket, key = %key, error = %e, "Failed to save object to S3");
        }
        result
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let exists = self.head("exists", key)?.is_some();
        debug!(bucket = %self.bucket, key = %key, exists, "S3 existence check completed");
        Ok(exists)
    }

    fn delete(&self, key: &str) -> Result<()> {
        // delete_object succeeds on absent keys, so probe first
        if self.head("delete", key)?.is_none() {
            return Err(ConnectorError::not_found("delete", key));
        }
        self.block_on("delete", key, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| map_s3_error("delete", e, key))
        })
    }

    fn fingerprint(&self, key: &str) -> Result<Fingerprint> {
        Ok(match self.head("fingerprint", key)? {
            Some(Some(etag)) => Fingerprint::Etag(etag),
            Some(None) => Fingerprint::Unknown,
            None => Fingerprint::Absent,
        })
    }
}

/// Map AWS SDK errors onto connector errors, keeping transient failures retryable
fn map_s3_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    verb: &'static str,
    error: SdkError<E>,
    key: &str,
) -> ConnectorError {
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            ConnectorError::unavailable(verb, key, format!("S3 request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => ConnectorError::Timeout {
            verb,
            key: key.to_string(),
        },
        SdkError::ResponseError(response_err) => {
            ConnectorError::unavailable(verb, key, format!("S3 response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            match service_err.err().code() {
                Some("NoSuchKey") | Some("NotFound") => ConnectorError::not_found(verb, key),
                Some("NoSuchBucket") => ConnectorError::backend(verb, key, "S3 bucket not found"),
                Some("AccessDenied") | Some("Forbidden") => ConnectorError::backend(
                    verb,
                    key,
                    "access denied to S3 (check credentials and permissions)",
                ),
                Some("SlowDown") | Some("InternalError") | Some("ServiceUnavailable") => {
                    ConnectorError::unavailable(verb, key, format!("S3 service error ({status})"))
                }
                _ if status == 404 => ConnectorError::not_found(verb, key),
                _ if status >= 500 || status == 429 => ConnectorError::unavailable(
                    verb,
                    key,
                    format!(
                        "S3 service error ({status}): {}",
                        service_err.err().message().unwrap_or("unknown error")
                    ),
                ),
                code => ConnectorError::backend(
                    verb,
                    key,
                    format!(
                        "S3 service error ({}): {}",
                        code.unwrap_or("unknown"),
                        service_err.err().message().unwrap_or("unknown error")
                    ),
                ),
            }
        }
        _ => ConnectorError::backend(verb, key, format!("S3 error: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::get_object::GetObjectError;

    #[test]
    fn test_timeout_maps_to_timeout() {
        let timeout_error: SdkError<GetObjectError> = SdkError::timeout_error("request exceeded deadline");
        let mapped = map_s3_error("read", timeout_error, "test-key");
        match mapped {
            ConnectorError::Timeout { verb, key } => {
                assert_eq!(verb, "read");
                assert_eq!(key, "test-key");
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_mapped_errors_keep_retry_classification() {
        let timeout_error: SdkError<GetObjectError> = SdkError::timeout_error("request exceeded deadline");
        assert!(map_s3_error("write", timeout_error, "k").is_transient());
    }
}
