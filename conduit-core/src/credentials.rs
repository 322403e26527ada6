/*!
Layered token and endpoint resolution.

A [`CredentialResolver`] walks an ordered list of [`ResolutionSource`]s and
returns the first value a source can produce. Sources that cannot produce a
value (unset variable, unreadable profile, malformed launch payload) yield
`None` and the chain moves on; only an unknown source name is an error.
*/

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::debug;

use crate::config::CredentialConfig;
use crate::contract::{EnvSource, ProcessEnv};
use crate::{ConnectorError, Result};

/// Named place a token or endpoint can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionSource {
    /// Value passed directly when the connector is built
    ExplicitArg,
    /// Field of the local profile file
    LocalCliProfile,
    /// Fixed process environment variable
    LocalProcessEnv,
    /// JSON payload passed as the first command-line argument
    JobLaunchPayload,
    /// Sidecar-provided values available inside a managed runtime
    DaemonSidecarEnv,
}

impl ResolutionSource {
    /// Order used when the configuration does not name one
    pub const DEFAULT_ORDER: [ResolutionSource; 5] = [
        ResolutionSource::ExplicitArg,
        ResolutionSource::LocalCliProfile,
        ResolutionSource::LocalProcessEnv,
        ResolutionSource::JobLaunchPayload,
        ResolutionSource::DaemonSidecarEnv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::ExplicitArg => "explicit-arg",
            ResolutionSource::LocalCliProfile => "local-cli-profile",
            ResolutionSource::LocalProcessEnv => "local-process-env",
            ResolutionSource::JobLaunchPayload => "job-launch-payload",
            ResolutionSource::DaemonSidecarEnv => "daemon-sidecar-env",
        }
    }

    /// Parse every name in `names`, failing on the first unknown one
    pub fn parse_order<S: AsRef<str>>(names: &[S]) -> Result<Vec<ResolutionSource>> {
        names.iter().map(|name| name.as_ref().parse()).collect()
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionSource {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "explicit-arg" | "args" => Ok(ResolutionSource::ExplicitArg),
            "local-cli-profile" | "local-cli" => Ok(ResolutionSource::LocalCliProfile),
            "local-process-env" | "local-env" => Ok(ResolutionSource::LocalProcessEnv),
            "job-launch-payload" | "job" => Ok(ResolutionSource::JobLaunchPayload),
            "daemon-sidecar-env" | "daemon" => Ok(ResolutionSource::DaemonSidecarEnv),
            other => Err(ConnectorError::UnknownResolutionSource(other.to_string())),
        }
    }
}

/// Token and endpoint resolved for one connector instance
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Token,
    Endpoint,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileFile {
    #[serde(rename = "currentProfile")]
    current_profile: Option<String>,
    #[serde(default)]
    profiles: HashMap<String, Profile>,
}

#[derive(Debug, Default, Deserialize)]
struct Profile {
    token: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LaunchPayload {
    token: Option<String>,
    #[serde(rename = "apiEndpoint")]
    api_endpoint: Option<String>,
}

/// Resolves tokens and endpoints through an ordered fallback chain
///
/// Nothing is cached: every call re-runs the chain against the current
/// environment, profile file and launch payload.
#[derive(Debug, Clone)]
pub struct CredentialResolver<E = ProcessEnv> {
    env: E,
    config: CredentialConfig,
    launch_payload: Option<String>,
}

impl CredentialResolver<ProcessEnv> {
    /// Resolver over the process environment and the real first CLI argument
    pub fn from_config(config: &CredentialConfig) -> Self {
        Self {
            env: ProcessEnv,
            config: config.clone(),
            launch_payload: std::env::args().nth(1),
        }
    }
}

impl<E: EnvSource> CredentialResolver<E> {
    /// Resolver over a custom environment; no launch payload unless one is set
    pub fn with_env(env: E, config: &CredentialConfig) -> Self {
        Self {
            env,
            config: config.clone(),
            launch_payload: None,
        }
    }

    /// Replace the launch payload consulted by `job-launch-payload`
    pub fn with_launch_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.launch_payload = Some(payload.into());
        self
    }

    /// Resolve a token through `order`
    ///
    /// Every name is validated before any source is consulted, so a bad
    /// order fails the same way regardless of which sources hold values.
    pub fn resolve_token<S: AsRef<str>>(&self, order: &[S], explicit: Option<&str>) -> Result<Option<String>> {
        let order = ResolutionSource::parse_order(order)?;
        Ok(self.resolve_in(Field::Token, &order, explicit))
    }

    /// Resolve an endpoint through `order`
    pub fn resolve_endpoint<S: AsRef<str>>(&self, order: &[S], explicit: Option<&str>) -> Result<Option<String>> {
        let order = ResolutionSource::parse_order(order)?;
        Ok(self.resolve_in(Field::Endpoint, &order, explicit))
    }

    /// Resolve both values using the configured orders
    pub fn resolve(&self, explicit_token: Option<&str>, explicit_endpoint: Option<&str>) -> Result<Credential> {
        Ok(Credential {
            token: self.resolve_token(&self.config.token_order, explicit_token)?,
            endpoint: self.resolve_endpoint(&self.config.endpoint_order, explicit_endpoint)?,
        })
    }

    fn resolve_in(&self, field: Field, order: &[ResolutionSource], explicit: Option<&str>) -> Option<String> {
        for source in order {
            if let Some(value) = self.lookup(*source, field, explicit) {
                debug!(source = %source, field = ?field, "Credential value resolved");
                return Some(value);
            }
        }
        debug!(field = ?field, "No credential source produced a value");
        None
    }

    /// A present value ends the chain even when it is empty
    fn lookup(&self, source: ResolutionSource, field: Field, explicit: Option<&str>) -> Option<String> {
        match source {
            ResolutionSource::ExplicitArg => explicit.map(str::to_string),
            ResolutionSource::LocalCliProfile => self.profile_value(field),
            ResolutionSource::LocalProcessEnv => match field {
                Field::Token => self.env.var(&self.config.token_env_var),
                Field::Endpoint => self.env.var(&self.config.endpoint_env_var),
            },
            ResolutionSource::JobLaunchPayload => self.payload_value(field),
            ResolutionSource::DaemonSidecarEnv => match field {
                Field::Token => self.env.var(&self.config.daemon_token_env_var),
                Field::Endpoint => Some(self.config.daemon_endpoint.clone()),
            },
        }
    }

    fn profile_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.profile_path {
            return Some(path.clone());
        }
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".conduit").join("config"))
    }

    fn profile_value(&self, field: Field) -> Option<String> {
        let path = self.profile_path()?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Profile file not readable");
                return None;
            }
        };
        let file: ProfileFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Profile file is not valid JSON");
                return None;
            }
        };

        let name = self
            .config
            .profile_name
            .clone()
            .or(file.current_profile)?;
        let profile = file.profiles.get(&name)?;
        match field {
            Field::Token => profile.token.clone(),
            Field::Endpoint => profile.url.clone(),
        }
    }

    fn payload_value(&self, field: Field) -> Option<String> {
        let raw = self.launch_payload.as_deref()?;
        let payload: LaunchPayload = match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Launch payload is not a JSON object");
                return None;
            }
        };
        match field {
            Field::Token => payload.token,
            Field::Endpoint => payload.api_endpoint,
        }
    }
}
