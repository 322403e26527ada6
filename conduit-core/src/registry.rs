/*!
Static backend registry.

Every backend family is a [`BackendKind`] tag bound to a constructor
function at compile time. A contract's scheme selects the tag; the
constructor builds the client, derives the backend key from the contract
path and reports the family's [`AdapterPolicy`]. Families whose cargo
feature is disabled stay in the table and fail with `InvalidContract`, so
the error names the missing feature instead of an unknown scheme.
*/

use std::fmt;

use tracing::debug;

use crate::config::ConnectorConfig;
use crate::connector::AdapterPolicy;
use crate::contract::ResolvedContract;
use crate::credentials::Credential;
use crate::format::FormatType;
use crate::storage::{BackendClient, LocalFileClient, MemoryClient, MissingResource};
use crate::{ConnectorError, Result};

/// Backend families known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Local,
    Memory,
    S3,
    Gcs,
    ManagedContent,
}

/// Builds a backend binding for a parsed contract
pub type Constructor = fn(&ResolvedContract, &ConnectorConfig) -> Result<BackendBinding>;

/// Everything a connector needs from its backend family
pub struct BackendBinding {
    pub client: Box<dyn BackendClient>,
    /// Backend key derived from the contract path
    pub key: String,
    pub policy: AdapterPolicy,
    /// Resolved credential, for auth-bearing families
    pub credential: Option<Credential>,
}

impl fmt::Debug for BackendBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendBinding")
            .field("client", &self.client.name())
            .field("key", &self.key)
            .field("policy", &self.policy)
            .field("credential", &self.credential)
            .finish()
    }
}

static REGISTRY: [(BackendKind, &[&str], Constructor); 5] = [
    (BackendKind::Local, &["file", "local"], build_local),
    (BackendKind::Memory, &["mem", "memory"], build_memory),
    (BackendKind::S3, &["s3"], build_s3),
    (BackendKind::Gcs, &["gs", "gcs"], build_gcs),
    (BackendKind::ManagedContent, &["mc"], build_managed_content),
];

impl BackendKind {
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Local,
        BackendKind::Memory,
        BackendKind::S3,
        BackendKind::Gcs,
        BackendKind::ManagedContent,
    ];

    /// Case-insensitive scheme lookup
    pub fn from_scheme(scheme: &str) -> Option<BackendKind> {
        let scheme = scheme.to_ascii_lowercase();
        REGISTRY
            .iter()
            .find(|(_, schemes, _)| schemes.contains(&scheme.as_str()))
            .map(|(kind, _, _)| *kind)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Memory => "memory",
            BackendKind::S3 => "s3",
            BackendKind::Gcs => "gcs",
            BackendKind::ManagedContent => "managed-content",
        }
    }

    pub fn schemes(&self) -> &'static [&'static str] {
        self.entry().1
    }

    /// Whether the family's client is compiled into this build
    pub fn is_enabled(&self) -> bool {
        match self {
            BackendKind::Local | BackendKind::Memory => true,
            BackendKind::S3 => cfg!(feature = "s3"),
            BackendKind::Gcs => cfg!(feature = "gcs"),
            BackendKind::ManagedContent => cfg!(feature = "managed-content"),
        }
    }

    /// The family's documented defaults, before configuration overrides
    pub fn default_policy(&self) -> AdapterPolicy {
        match self {
            BackendKind::Memory => AdapterPolicy::new(MissingResource::EmptyResult, 0, FormatType::Csv),
            BackendKind::ManagedContent => AdapterPolicy::new(MissingResource::EmptyResult, 2, FormatType::Csv),
            BackendKind::Local | BackendKind::S3 | BackendKind::Gcs => {
                AdapterPolicy::new(MissingResource::NotFound, 0, FormatType::Csv)
            }
        }
    }

    pub fn constructor(&self) -> Constructor {
        self.entry().2
    }

    fn entry(&self) -> &'static (BackendKind, &'static [&'static str], Constructor) {
        // every kind has exactly one row
        let idx = match self {
            BackendKind::Local => 0,
            BackendKind::Memory => 1,
            BackendKind::S3 => 2,
            BackendKind::Gcs => 3,
            BackendKind::ManagedContent => 4,
        };
        &REGISTRY[idx]
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Select the backend family for `contract` and build its binding
pub fn bind(contract: &ResolvedContract, config: &ConnectorConfig) -> Result<(BackendKind, BackendBinding)> {
    let kind = BackendKind::from_scheme(&contract.scheme).ok_or_else(|| {
        ConnectorError::invalid_contract(
            &contract.raw_uri,
            format!("no backend registered for scheme '{}'", contract.scheme),
        )
    })?;
    debug!(scheme = %contract.scheme, backend = %kind, "Selected backend");
    let binding = (kind.constructor())(contract, config)?;
    Ok((kind, binding))
}

#[cfg(not(all(feature = "s3", feature = "gcs", feature = "managed-content")))]
fn feature_disabled(contract: &ResolvedContract, kind: BackendKind, feature: &str) -> ConnectorError {
    ConnectorError::invalid_contract(
        &contract.raw_uri,
        format!("backend '{kind}' is not compiled into this build; enable the `{feature}` feature"),
    )
}

/// Where a contract points within its backend family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Bucket or project the client is bound to, for scoped families
    pub scope: Option<String>,
    pub key: String,
}

impl BackendKind {
    /// Derive the scope and backend key a contract addresses
    ///
    /// Bucket families take the bucket from the first path segment; managed
    /// content takes its project from the `project` option when present.
    pub fn locate(&self, contract: &ResolvedContract) -> Result<Location> {
        let location = match self {
            BackendKind::Local => Location {
                scope: None,
                key: contract.path.clone(),
            },
            BackendKind::Memory => Location {
                scope: None,
                key: contract.relative_path().to_string(),
            },
            BackendKind::S3 | BackendKind::Gcs => {
                let (bucket, key) = contract.bucket_and_key()?;
                Location { scope: Some(bucket), key }
            }
            BackendKind::ManagedContent => match contract.options().get("project").filter(|p| !p.is_empty()) {
                Some(project) => Location {
                    scope: Some(project.clone()),
                    key: contract.relative_path().to_string(),
                },
                None => {
                    let (project, key) = contract.bucket_and_key()?;
                    Location { scope: Some(project), key }
                }
            },
        };
        if location.key.is_empty() {
            return Err(ConnectorError::invalid_contract(&contract.raw_uri, "missing resource path"));
        }
        Ok(location)
    }
}

fn build_local(contract: &ResolvedContract, config: &ConnectorConfig) -> Result<BackendBinding> {
    let location = BackendKind::Local.locate(contract)?;
    let client = match &config.local.base_path {
        Some(base) => LocalFileClient::with_base_dir(base),
        None => LocalFileClient::new(),
    };
    Ok(BackendBinding {
        client: Box::new(client),
        key: location.key,
        policy: BackendKind::Local.default_policy(),
        credential: None,
    })
}

fn build_memory(contract: &ResolvedContract, _config: &ConnectorConfig) -> Result<BackendBinding> {
    let location = BackendKind::Memory.locate(contract)?;
    Ok(BackendBinding {
        client: Box::new(MemoryClient::shared()),
        key: location.key,
        policy: BackendKind::Memory.default_policy(),
        credential: None,
    })
}

#[cfg(feature = "s3")]
fn build_s3(contract: &ResolvedContract, config: &ConnectorConfig) -> Result<BackendBinding> {
    let Location { scope, key } = BackendKind::S3.locate(contract)?;
    let client = crate::storage::S3Client::new(scope.unwrap_or_default(), &config.s3, &config.transfer)?;
    Ok(BackendBinding {
        client: Box::new(client),
        key,
        policy: BackendKind::S3.default_policy(),
        credential: None,
    })
}

#[cfg(not(feature = "s3"))]
fn build_s3(contract: &ResolvedContract, _config: &ConnectorConfig) -> Result<BackendBinding> {
    Err(feature_disabled(contract, BackendKind::S3, "s3"))
}

#[cfg(feature = "gcs")]
fn build_gcs(contract: &ResolvedContract, config: &ConnectorConfig) -> Result<BackendBinding> {
    let Location { scope, key } = BackendKind::Gcs.locate(contract)?;
    let client = crate::storage::GcsClient::new(scope.unwrap_or_default(), &config.gcs, &config.transfer)?;
    Ok(BackendBinding {
        client: Box::new(client),
        key,
        policy: BackendKind::Gcs.default_policy(),
        credential: None,
    })
}

#[cfg(not(feature = "gcs"))]
fn build_gcs(contract: &ResolvedContract, _config: &ConnectorConfig) -> Result<BackendBinding> {
    Err(feature_disabled(contract, BackendKind::Gcs, "gcs"))
}

/// `mc://project/key` or `mc://key?project=...`
///
/// The token and endpoint go through the credential resolver, with the
/// `token` and `api_endpoint` options feeding its `explicit-arg` source.
#[cfg(feature = "managed-content")]
fn build_managed_content(contract: &ResolvedContract, config: &ConnectorConfig) -> Result<BackendBinding> {
    use crate::credentials::CredentialResolver;
    use crate::options::ManagedContentOptions;

    let Location { scope, key } = BackendKind::ManagedContent.locate(contract)?;
    let (options, _) = ManagedContentOptions::split(&contract.options());

    let credential = CredentialResolver::from_config(&config.credentials)
        .resolve(options.token.as_deref(), options.api_endpoint.as_deref())?;
    let endpoint = credential.endpoint.clone().ok_or_else(|| {
        ConnectorError::invalid_contract(&contract.raw_uri, "no managed content endpoint could be resolved")
    })?;

    let client = crate::storage::ManagedContentClient::new(
        endpoint,
        scope.unwrap_or_default(),
        credential.token.clone(),
        &config.transfer,
    )?;
    Ok(BackendBinding {
        client: Box::new(client),
        key,
        policy: BackendKind::ManagedContent.default_policy(),
        credential: Some(credential),
    })
}

#[cfg(not(feature = "managed-content"))]
fn build_managed_content(contract: &ResolvedContract, _config: &ConnectorConfig) -> Result<BackendBinding> {
    Err(feature_disabled(contract, BackendKind::ManagedContent, "managed-content"))
}
