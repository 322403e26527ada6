/*!
Connector contract parsing.

A connector contract is a URI of the form
`scheme://[user[:password]@]host[:port]/path[?key=value&...]` plus two
auxiliary option maps: explicit `kwargs` and an externally supplied `query`.
Parsing substitutes `${NAME}` (or `${NAME:-default}`) placeholders from the
environment and produces an immutable [`ResolvedContract`]. Substituted
values are literal text of the component they land in: a password holding
`/` or `@` stays a password.

Authorities that carry only a host (no user, no port) are folded into the
path: object stores and local schemes address buckets and directories there,
so `s3://bucket/key.csv` resolves to the path `bucket/key.csv`.
*/

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use url::Url;

use crate::{ConnectorError, Result};

/// Option map attached to a contract. Keys are case-sensitive.
pub type Options = BTreeMap<String, String>;

/// Option key that names the file type explicitly
pub const FILE_TYPE_KEY: &str = "file_type";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)(?::-([^}]*))?\}")
        .expect("placeholder pattern is a valid regex")
});

/// Source of environment variables for placeholder substitution and credential lookup
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, name: &str) -> Option<String> {
        (**self).var(name)
    }
}

/// Replace every `${NAME}` / `${NAME:-default}` token in `input`
///
/// Fails with [`ConnectorError::MissingEnvironmentVariable`] when a variable
/// is unset and the token has no default.
pub fn substitute_env<E: EnvSource + ?Sized>(input: &str, env: &E) -> Result<String> {
    expand(input, env, |_| Component::Verbatim)
}

/// Part of a contract address a placeholder expands into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Verbatim,
    UserInfo,
    Location,
    Query,
}

impl Component {
    /// Escape a substituted value so it stays inside its component
    fn escape(self, value: &str) -> String {
        match self {
            Component::Verbatim => value.to_string(),
            Component::UserInfo | Component::Query => urlencoding::encode(value).into_owned(),
            Component::Location => value
                .replace('%', "%25")
                .replace('?', "%3F")
                .replace('#', "%23"),
        }
    }
}

/// Substitute placeholders in a contract address, component by component
///
/// Components are located on the address with its placeholders masked out,
/// so a substituted value never moves a separator. Addresses whose
/// `scheme://` prefix itself comes from a placeholder are substituted as is.
fn substitute_address<E: EnvSource + ?Sized>(uri: &str, env: &E) -> Result<String> {
    let masked = PLACEHOLDER.replace_all(uri, |caps: &Captures| "x".repeat(caps[0].len()));
    let Some(scheme_end) = masked.find("://") else {
        return substitute_env(uri, env);
    };

    let rest_start = scheme_end + 3;
    let rest = &masked[rest_start..];
    let authority_end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let userinfo_end = rest[..authority_end].rfind('@').map(|at| rest_start + at);
    let query_start = rest.find('?').map(|q| rest_start + q);

    expand(uri, env, |start| {
        if start < rest_start {
            Component::Verbatim
        } else if userinfo_end.is_some_and(|end| start < end) {
            Component::UserInfo
        } else if query_start.is_some_and(|q| start > q) {
            Component::Query
        } else {
            Component::Location
        }
    })
}

fn expand<E: EnvSource + ?Sized>(
    input: &str,
    env: &E,
    component_at: impl Fn(usize) -> Component,
) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = match env.var(name.as_str()) {
            Some(value) => value,
            None => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    return Err(ConnectorError::MissingEnvironmentVariable(
                        name.as_str().to_string(),
                    ))
                }
            },
        };
        out.push_str(&input[last..whole.start()]);
        out.push_str(&component_at(whole.start()).escape(&value));
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}

/// Network authority of a contract
#[derive(Clone, PartialEq, Eq)]
pub struct Authority {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A fully parsed connector contract. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContract {
    /// Original address string, before substitution
    pub raw_uri: String,
    /// Connector family discriminator
    pub scheme: String,
    /// Present for network backends (user or port given)
    pub authority: Option<Authority>,
    /// Resource locator within the backend
    pub path: String,
    /// Explicit options attached to the contract
    pub kwargs: Options,
    /// Options from the URI query string and the external query map
    pub query: Options,
}

impl ResolvedContract {
    /// Fresh merged view of `query` and `kwargs`; `kwargs` wins on collision
    pub fn options(&self) -> Options {
        let mut merged = self.query.clone();
        merged.extend(self.kwargs.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Merged view with per-call overrides applied last
    pub fn options_with(&self, overrides: &Options) -> Options {
        let mut merged = self.options();
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Extension of the final path segment, empty when there is none
    pub fn extension(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or("");
        match name.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => "",
        }
    }

    /// Explicit `file_type` option, else the path extension, else empty
    pub fn file_type_hint(&self) -> String {
        self.file_type_hint_with(&Options::new())
    }

    /// Like [`file_type_hint`](Self::file_type_hint) with per-call overrides considered
    pub fn file_type_hint_with(&self, overrides: &Options) -> String {
        self.options_with(overrides)
            .get(FILE_TYPE_KEY)
            .cloned()
            .unwrap_or_else(|| self.extension().to_string())
    }

    /// Split the path into a bucket (first segment) and an object key
    pub fn bucket_and_key(&self) -> Result<(String, String)> {
        let trimmed = self.path.trim_start_matches('/');
        let (bucket, key) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        if bucket.is_empty() {
            return Err(ConnectorError::invalid_contract(
                &self.raw_uri,
                "missing bucket name",
            ));
        }
        Ok((bucket.to_string(), key.to_string()))
    }

    /// The path with any leading slash removed
    pub fn relative_path(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

impl fmt::Display for ResolvedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(auth) = &self.authority {
            if let Some(user) = &auth.user {
                write!(f, "{user}")?;
                if auth.password.is_some() {
                    write!(f, ":***")?;
                }
                write!(f, "@")?;
            }
            write!(f, "{}", auth.host)?;
            if let Some(port) = auth.port {
                write!(f, ":{port}")?;
            }
            write!(f, "/")?;
        }
        write!(f, "{}", self.path)
    }
}

/// Parses connector contracts against an environment snapshot
#[derive(Debug, Clone, Default)]
pub struct ContractParser<E = ProcessEnv> {
    env: E,
}

impl ContractParser<ProcessEnv> {
    /// Parser reading placeholders from the process environment
    pub fn new() -> Self {
        Self { env: ProcessEnv }
    }
}

impl<E: EnvSource> ContractParser<E> {
    /// Parser reading placeholders from a custom environment
    pub fn with_env(env: E) -> Self {
        Self { env }
    }

    /// Parse `uri` with its auxiliary option maps
    ///
    /// Externally supplied `query` entries win over the URI's own query string.
    /// Bare paths without a `scheme://` prefix are read as `file` contracts.
    pub fn parse(&self, uri: &str, kwargs: &Options, query: &Options) -> Result<ResolvedContract> {
        if uri.trim().is_empty() {
            return Err(ConnectorError::invalid_contract(uri, "empty contract address"));
        }

        let address = substitute_address(uri, &self.env)?;
        let (scheme, authority, path, mut uri_query) = if address.contains("://") {
            split_uri(uri, &address)?
        } else {
            split_bare_path(uri, &address)?
        };

        for (key, value) in query {
            uri_query.insert(key.clone(), substitute_env(value, &self.env)?);
        }

        let mut resolved_kwargs = Options::new();
        for (key, value) in kwargs {
            resolved_kwargs.insert(key.clone(), substitute_env(value, &self.env)?);
        }

        Ok(ResolvedContract {
            raw_uri: uri.to_string(),
            scheme,
            authority,
            path,
            kwargs: resolved_kwargs,
            query: uri_query,
        })
    }
}

/// Parse with the process environment
pub fn parse(uri: &str, kwargs: &Options, query: &Options) -> Result<ResolvedContract> {
    ContractParser::new().parse(uri, kwargs, query)
}

fn decode(raw_uri: &str, component: &str) -> Result<String> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ConnectorError::invalid_contract(raw_uri, format!("invalid percent-encoding: {e}")))
}

type Parts = (String, Option<Authority>, String, Options);

fn split_uri(raw_uri: &str, address: &str) -> Result<Parts> {
    let url = Url::parse(address)
        .map_err(|e| ConnectorError::invalid_contract(raw_uri, e.to_string()))?;

    let scheme = url.scheme().to_string();
    let host = url.host_str().unwrap_or("").to_string();
    let url_path = decode(raw_uri, url.path())?;

    let authority = if !url.username().is_empty() || url.port().is_some() {
        if host.is_empty() {
            return Err(ConnectorError::invalid_contract(raw_uri, "authority has no host"));
        }
        Some(Authority {
            host: decode(raw_uri, &host)?,
            port: url.port(),
            user: match url.username() {
                "" => None,
                user => Some(decode(raw_uri, user)?),
            },
            password: url.password().map(|p| decode(raw_uri, p)).transpose()?,
        })
    } else {
        None
    };

    let path = match (&authority, host.is_empty()) {
        (Some(_), _) => url_path.trim_start_matches('/').to_string(),
        (None, true) => url_path,
        (None, false) => format!("{}{url_path}", decode(raw_uri, &host)?),
    };

    let query = url.query_pairs().into_owned().collect();
    Ok((scheme, authority, path, query))
}

fn split_bare_path(raw_uri: &str, address: &str) -> Result<Parts> {
    let (path, query) = match address.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (address, None),
    };
    if path.is_empty() {
        return Err(ConnectorError::invalid_contract(raw_uri, "empty path"));
    }
    let query = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    Ok(("file".to_string(), None, path.to_string(), query))
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod contract_tests;
