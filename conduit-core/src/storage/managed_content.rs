/*!
Managed content backend.

Content objects are addressed per project over an authenticated HTTP API:
`GET`/`POST`/`HEAD`/`DELETE {endpoint}/fabric/v4/projects/{project}/content/{key}`.
The bearer token and endpoint come from the credential resolver.
*/

use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_TYPE, ETAG};
use reqwest::StatusCode;
use tracing::{debug, error, info};

use super::BackendClient;
use crate::change::Fingerprint;
use crate::config::TransferConfig;
use crate::{ConnectorError, Result};

/// HTTP client for one project's managed content
pub struct ManagedContentClient {
    http: Client,
    endpoint: String,
    project: String,
    token: Option<String>,
}

impl std::fmt::Debug for ManagedContentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedContentClient")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ManagedContentClient {
    pub fn new(
        endpoint: impl Into<String>,
        project: impl Into<String>,
        token: Option<String>,
        transfer: &TransferConfig,
    ) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let project = project.into();
        let http = Client::builder()
            .timeout(transfer.timeout())
            .build()
            .map_err(|e| ConnectorError::backend("connect", &endpoint, format!("failed to build HTTP client: {e}")))?;

        info!(endpoint = %endpoint, project = %project, authenticated = token.is_some(), "Initialized managed content client");

        Ok(Self {
            http,
            endpoint,
            project,
            token,
        })
    }

    /// URL of the content object stored under `key`
    pub fn content_url(&self, key: &str) -> String {
        format!(
            "{}/fabric/v4/projects/{}/content/{}",
            self.endpoint,
            urlencoding::encode(&self.project),
            key.trim_start_matches('/')
        )
    }

    fn send(
        &self,
        verb: &'static str,
        key: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        request.send().map_err(|e| map_request_error(verb, key, &e))
    }

    fn head(&self, verb: &'static str, key: &str) -> Result<Option<Response>> {
        let response = self.send(verb, key, self.http.head(self.content_url(key)))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => Err(status_error(verb, key, status)),
        }
    }
}

fn map_request_error(verb: &'static str, key: &str, error: &reqwest::Error) -> ConnectorError {
    if error.is_timeout() {
        ConnectorError::Timeout {
            verb,
            key: key.to_string(),
        }
    } else if error.is_connect() || error.is_request() {
        ConnectorError::unavailable(verb, key, error.to_string())
    } else {
        ConnectorError::backend(verb, key, error.to_string())
    }
}

fn status_error(verb: &'static str, key: &str, status: StatusCode) -> ConnectorError {
    if status == StatusCode::NOT_FOUND {
        ConnectorError::not_found(verb, key)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        ConnectorError::Timeout {
            verb,
            key: key.to_string(),
        }
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ConnectorError::unavailable(verb, key, format!("managed content returned {status}"))
    } else {
        ConnectorError::backend(verb, key, format!("managed content returned {status}"))
    }
}

impl BackendClient for ManagedContentClient {
    fn name(&self) -> &'static str {
        "managed-content"
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let response = self.send("read", key, self.http.get(self.content_url(key)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("read", key, status));
        }
        let data = response
            .bytes()
            .map_err(|e| map_request_error("read", key, &e))?
            .to_vec();
        debug!(key = %key, size = data.len(), "Downloaded managed content");
        Ok(data)
    }

    fn write(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        let request = self
            .http
            .post(self.content_url(key))
            .header(CONTENT_TYPE, content_type)
            .body(data.to_vec());
        let response = self.send("write", key, request)?;
        let status = response.status();
        if !status.is_success() {
            let err = status_error("write", key, status);
            error!(key = %key, status = %status, "Managed content upload rejected");
            return Err(err);
        }
        debug!(key = %key, size = data.len(), content_type = %content_type, "Uploaded managed content");
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head("exists", key)?.is_some())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let response = self.send("delete", key, self.http.delete(self.content_url(key)))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error("delete", key, status))
        }
    }

    fn fingerprint(&self, key: &str) -> Result<Fingerprint> {
        let Some(response) = self.head("fingerprint", key)? else {
            return Ok(Fingerprint::Absent);
        };
        Ok(response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|etag| Fingerprint::Etag(etag.trim_matches('"').to_string()))
            .unwrap_or(Fingerprint::Unknown))
    }
}
